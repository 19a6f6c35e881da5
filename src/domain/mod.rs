pub mod error;
pub mod ports;
pub mod repair;
pub mod report;
pub mod row;
pub mod signature;
pub mod span_summary;
pub mod structure_diff;
pub mod value_objects;
