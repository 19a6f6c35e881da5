use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype to avoid confusion between schema names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema(pub String);

/// Newtype for table names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TableName(pub String);

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Newtype for column names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ColumnName(pub String);

impl ColumnName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// List of columns to exclude from the comparison (e.g., updated_at)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExcludedColumns(pub Vec<String>);

impl ExcludedColumns {
    pub fn contains(&self, col: &str) -> bool {
        self.0.iter().any(|c| c == col)
    }
}

/// Bucket key: the first `span_key_length` hex characters of a row's pk hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Span(pub String);

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable per-table column layout passed into every engine call.
///
/// `compare_columns` is the fixed, schema-derived order in which values are
/// concatenated for the content signature; `pk_columns` the order for the
/// key signature. Both sides of a comparison must use the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub pk_columns: Vec<ColumnName>,
    pub compare_columns: Vec<ColumnName>,
}

impl TableSchema {
    pub fn new(pk_columns: Vec<ColumnName>, compare_columns: Vec<ColumnName>) -> Self {
        Self {
            pk_columns,
            compare_columns,
        }
    }

    pub fn is_pk_column(&self, col: &str) -> bool {
        self.pk_columns.iter().any(|c| c.0 == col)
    }

    /// Columns fetched for hashing and repair: compare columns, then any key
    /// column that was excluded from comparison.
    pub fn projection(&self) -> Vec<ColumnName> {
        let mut cols = self.compare_columns.clone();
        for pk in &self.pk_columns {
            if !cols.contains(pk) {
                cols.push(pk.clone());
            }
        }
        cols
    }
}

/// Column names/types and key columns of one table as reported by a row source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableShape {
    /// `(column_name, data_type)` in ordinal order.
    pub columns: Vec<(String, String)>,
    pub primary_key: Vec<String>,
}

impl TableShape {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_column(&self, col: &str) -> bool {
        self.columns.iter().any(|(name, _)| name == col)
    }
}

/// Schema object kinds the engine enumerates and diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectType {
    Event,
    Function,
    Procedure,
    Table,
    Trigger,
    View,
}

impl ObjectType {
    pub const ALL: [ObjectType; 6] = [
        ObjectType::Table,
        ObjectType::View,
        ObjectType::Trigger,
        ObjectType::Procedure,
        ObjectType::Function,
        ObjectType::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Event => "EVENT",
            ObjectType::Function => "FUNCTION",
            ObjectType::Procedure => "PROCEDURE",
            ObjectType::Table => "TABLE",
            ObjectType::Trigger => "TRIGGER",
            ObjectType::View => "VIEW",
        }
    }

    /// Parse the type names found in catalog queries (`BASE TABLE`, `VIEW`, …).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "TABLE" | "BASE TABLE" => Some(ObjectType::Table),
            "VIEW" => Some(ObjectType::View),
            "TRIGGER" => Some(ObjectType::Trigger),
            "PROCEDURE" => Some(ObjectType::Procedure),
            "FUNCTION" => Some(ObjectType::Function),
            "EVENT" => Some(ObjectType::Event),
            _ => None,
        }
    }

    /// Object kinds whose rows can be reconciled.
    pub fn holds_rows(&self) -> bool {
        matches!(self, ObjectType::Table | ObjectType::View)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(type, name)` pair identifying one schema object. Ordered by type, then
/// name, which matches sorting the `TYPE:name` strings lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub object_type: ObjectType,
    pub name: String,
}

impl ObjectDescriptor {
    pub fn new(object_type: ObjectType, name: impl Into<String>) -> Self {
        Self {
            object_type,
            name: name.into(),
        }
    }

    pub fn table(name: impl Into<String>) -> Self {
        Self::new(ObjectType::Table, name)
    }
}

impl fmt::Display for ObjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.name)
    }
}
