use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which database of the pair an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Failures that end (or prevent) one table or object comparison.
///
/// None of these abort sibling comparisons; the orchestrator records them on
/// the affected report and moves on.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
pub enum ReconcileError {
    #[error("{side} database error: {message}")]
    Connection { side: Side, message: String },

    #[error("primary key of {table} differs: source {source_key:?}, target {target_key:?}")]
    SchemaMismatch {
        table: String,
        source_key: Vec<String>,
        target_key: Vec<String>,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("comparison of {table} was cancelled")]
    Cancelled { table: String },

    #[error("comparison of {table} timed out after {secs}s")]
    Timeout { table: String, secs: u64 },
}

impl ReconcileError {
    /// Wrap a port failure, keeping the whole context chain in the message.
    pub fn connection(side: Side, err: &anyhow::Error) -> Self {
        ReconcileError::Connection {
            side,
            message: format!("{:#}", err),
        }
    }

    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        ReconcileError::InvalidSchema(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        ReconcileError::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn connection_error_keeps_context_chain() {
        let err: anyhow::Result<()> =
            Err(anyhow::anyhow!("connection refused")).context("Failed to query users");
        let e = ReconcileError::connection(Side::Target, &err.unwrap_err());
        assert_eq!(
            e.to_string(),
            "target database error: Failed to query users: connection refused"
        );
    }

    #[test]
    fn schema_mismatch_names_both_keys() {
        let e = ReconcileError::SchemaMismatch {
            table: "orders".into(),
            source_key: vec!["id".into()],
            target_key: vec!["id".into(), "tenant_id".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("tenant_id"));
    }
}
