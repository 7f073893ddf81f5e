//! Core types shared by the import and export pipelines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::status::Status;

/// Which table a job record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Import,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Export => "export",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a job across both tables, displayed as `import-12`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub kind: JobKind,
    pub id: i64,
}

impl JobKey {
    pub fn import(id: i64) -> Self {
        Self {
            kind: JobKind::Import,
            id,
        }
    }

    pub fn export(id: i64) -> Self {
        Self {
            kind: JobKind::Export,
            id,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

/// Whoever started a job; the reference is opaque to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiator {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A persisted import or export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    pub initiator: Option<Initiator>,
    pub filename: Option<String>,
    pub status: Status,
    pub processor: String,
    pub file_total_rows: i64,
    pub total_rows_processed: i64,
    pub total_rows_failed: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey {
            kind: self.kind,
            id: self.id,
        }
    }

    /// Rows neither processed nor failed yet
    pub fn remaining_rows(&self) -> i64 {
        (self.file_total_rows - self.total_rows_processed - self.total_rows_failed).max(0)
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.file_total_rows == 0 {
            return if self.status == Status::Completed {
                100.0
            } else {
                0.0
            };
        }
        let done = self.total_rows_processed + self.total_rows_failed;
        (done as f64 / self.file_total_rows as f64) * 100.0
    }
}

/// A contiguous, 1-based chunk of a job's rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// 1-based position of the chunk, also used as the export page number
    pub index: u32,
    /// Number of rows preceding this chunk
    pub offset: u64,
    /// Number of rows in this chunk, the last one may be short
    pub size: u64,
}

impl ChunkDescriptor {
    /// 1-based index of the first row in the chunk
    pub fn first_row(&self) -> u64 {
        self.offset + 1
    }

    /// 1-based index of the last row in the chunk
    pub fn last_row(&self) -> u64 {
        self.offset + self.size
    }
}

/// One data row of an uploaded file, keyed by snake_cased header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl Row {
    /// Missing trailing cells become empty strings, surplus cells are dropped
    pub fn new(headers: Arc<[String]>, mut values: Vec<String>) -> Self {
        values.resize(headers.len(), String::new());
        Self { headers, values }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (headers, values): (Vec<String>, Vec<String>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            headers: headers.into(),
            values,
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == field)
            .map(|i| self.values[i].as_str())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A row that could not be imported, plus where it came from and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub origin_row: u64,
    pub row: Row,
    pub error: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_display() {
        assert_eq!(JobKey::import(12).to_string(), "import-12");
        assert_eq!(JobKey::export(3).to_string(), "export-3");
    }

    #[test]
    fn test_row_pads_and_truncates() {
        let headers: Arc<[String]> = vec!["a".to_string(), "b".to_string()].into();
        let short = Row::new(headers.clone(), vec!["1".to_string()]);
        assert_eq!(short.get("b"), Some(""));

        let long = Row::new(headers, vec!["1".into(), "2".into(), "3".into()]);
        assert_eq!(long.values(), ["1", "2"]);
    }

    #[test]
    fn test_row_lookup() {
        let row = Row::from_pairs([("email", "a@b.c"), ("name", "Ada")]);
        assert_eq!(row.get("name"), Some("Ada"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.iter().count(), 2);
    }

    #[test]
    fn test_chunk_bounds() {
        let chunk = ChunkDescriptor {
            index: 3,
            offset: 2000,
            size: 500,
        };
        assert_eq!(chunk.first_row(), 2001);
        assert_eq!(chunk.last_row(), 2500);
    }
}
