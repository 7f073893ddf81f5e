//! Processor contracts
//!
//! An [`ImportProcessor`] says which headers an upload must carry, how each
//! row is validated, and what happens to a valid row. An
//! [`ExportProcessor`] supplies the records to export and how each record
//! becomes a flat row. Both may override the pipeline defaults.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::rules::Rule;
use super::source::{Record, RecordSource};
use super::types::Row;

/// A flat output row; column order follows insertion order
pub type FormattedRow = Map<String, Value>;

#[async_trait]
pub trait ImportProcessor: Send + Sync {
    /// Headers the uploaded file must contain, compared snake_cased
    fn expected_headers(&self) -> Vec<String>;

    /// Rules for one row; `row_index` is the 1-based position in the file
    fn rules(&self, _row: &Row, _row_index: u64) -> Vec<Rule> {
        Vec::new()
    }

    /// Apply one validated row
    async fn process(&self, row: &Row, row_index: u64) -> anyhow::Result<()>;

    fn chunk_size(&self) -> Option<u64> {
        None
    }
}

pub trait ExportProcessor: Send + Sync {
    fn source(&self) -> Arc<dyn RecordSource>;

    fn format_row(&self, record: Record) -> anyhow::Result<FormattedRow> {
        default_format_row(record)
    }

    fn chunk_size(&self) -> Option<u64> {
        None
    }

    /// Base name of the published file, without extension
    fn name(&self) -> Option<String> {
        None
    }

    fn disk(&self) -> Option<String> {
        None
    }

    fn directory(&self) -> Option<String> {
        None
    }

    fn allow_failures(&self) -> Option<bool> {
        None
    }
}

/// Objects are used as-is, any other record becomes a single `value` column
pub fn default_format_row(record: Record) -> anyhow::Result<FormattedRow> {
    Ok(match record {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    })
}

/// Text of one output cell: nested values are JSON-encoded, null is empty
pub fn flatten_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_cell() {
        assert_eq!(flatten_cell(&json!(null)), "");
        assert_eq!(flatten_cell(&json!("Ada")), "Ada");
        assert_eq!(flatten_cell(&json!(3.5)), "3.5");
        assert_eq!(flatten_cell(&json!(["a", "b"])), r#"["a","b"]"#);
        assert_eq!(flatten_cell(&json!({"k": 1})), r#"{"k":1}"#);
    }

    #[test]
    fn test_default_format_row_keeps_column_order() {
        let row = default_format_row(json!({"zeta": 1, "alpha": 2})).unwrap();
        let keys: Vec<_> = row.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);

        let scalar = default_format_row(json!(42)).unwrap();
        assert_eq!(scalar.get("value"), Some(&json!(42)));
    }
}
