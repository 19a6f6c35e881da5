pub mod bucket_diff;
pub mod ddl_diff;
pub mod monitoring;
pub mod object_set;
pub mod reconcile;
pub mod repair_sql;
pub mod row_diff;
