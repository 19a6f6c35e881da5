use serde::Serialize;

use crate::domain::value_objects::ObjectDescriptor;

/// How an object's definition compares across the two databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureState {
    Identical,
    Differs,
    MissingInTarget,
    MissingInSource,
}

/// Outcome of diffing one object's definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureDiff {
    pub object: ObjectDescriptor,
    pub state: StructureState,
    /// One per detected mismatch, or 1 for a missing object.
    pub diff_count: usize,
    /// Statements that bring the target's definition in line with the source.
    pub repair_statements: Vec<String>,
    /// Column reorders and unsupported differences (keys, partitions, options).
    pub notes: Vec<String>,
    /// Set when at least one difference has no generated repair.
    pub unsupported: bool,
}

impl StructureDiff {
    pub fn identical(object: ObjectDescriptor) -> Self {
        Self {
            object,
            state: StructureState::Identical,
            diff_count: 0,
            repair_statements: Vec::new(),
            notes: Vec::new(),
            unsupported: false,
        }
    }

    pub fn missing(object: ObjectDescriptor, state: StructureState, repair: Vec<String>) -> Self {
        Self {
            object,
            state,
            diff_count: 1,
            repair_statements: repair,
            notes: Vec::new(),
            unsupported: false,
        }
    }

    /// Primary keys differ between sides. Never repaired.
    pub fn key_mismatch(object: ObjectDescriptor, note: impl Into<String>) -> Self {
        Self {
            object,
            state: StructureState::Differs,
            diff_count: 1,
            repair_statements: Vec::new(),
            notes: vec![note.into()],
            unsupported: true,
        }
    }

    pub fn is_identical(&self) -> bool {
        self.state == StructureState::Identical
    }
}
