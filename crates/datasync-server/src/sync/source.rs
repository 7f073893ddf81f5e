//! Row sources: uploaded delimited files for imports, paged record sources
//! for exports

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::SyncResult;
use super::types::Row;
use datasync_common::text::snake_case_all;

/// One exportable record
pub type Record = Value;

/// Paged access to the records of an export
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn count(&self) -> anyhow::Result<u64>;

    /// Records of the 1-based `page`; past the end this is empty
    async fn page(&self, page: u64, per_page: u64) -> anyhow::Result<Vec<Record>>;
}

/// Records held in memory
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: Arc<Vec<Record>>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }
}

#[async_trait]
impl RecordSource for VecSource {
    async fn count(&self) -> anyhow::Result<u64> {
        Ok(self.records.len() as u64)
    }

    async fn page(&self, page: u64, per_page: u64) -> anyhow::Result<Vec<Record>> {
        if page == 0 || per_page == 0 {
            anyhow::bail!("pages are 1-based and non-empty");
        }
        let start = ((page - 1) * per_page) as usize;
        Ok(self
            .records
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect())
    }
}

/// A delimited file on local disk whose first line holds the headers.
///
/// Headers are snake_cased. Reads run on the blocking pool.
#[derive(Debug, Clone)]
pub struct DelimitedFile {
    path: PathBuf,
    delimiter: u8,
}

impl DelimitedFile {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> csv::Result<csv::Reader<std::fs::File>> {
        ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(Trim::All)
            .from_path(&self.path)
    }

    fn read_headers(&self) -> csv::Result<Vec<String>> {
        let mut reader = self.reader()?;
        Ok(snake_case_all(reader.headers()?.iter()))
    }

    pub async fn headers(&self) -> SyncResult<Vec<String>> {
        let file = self.clone();
        Ok(tokio::task::spawn_blocking(move || file.read_headers()).await??)
    }

    /// Data rows, blank lines excluded
    pub async fn count_rows(&self) -> SyncResult<u64> {
        let file = self.clone();
        let count = tokio::task::spawn_blocking(move || -> csv::Result<u64> {
            let mut reader = file.reader()?;
            let mut record = StringRecord::new();
            let mut count = 0;
            while reader.read_record(&mut record)? {
                if !is_blank(&record) {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await??;
        Ok(count)
    }

    /// Rows `skip + 1 ..= skip + take`, blank lines excluded
    pub async fn read_rows(&self, skip: u64, take: u64) -> SyncResult<Vec<Row>> {
        let file = self.clone();
        let rows = tokio::task::spawn_blocking(move || -> csv::Result<Vec<Row>> {
            let mut reader = file.reader()?;
            let headers: Arc<[String]> = snake_case_all(reader.headers()?.iter()).into();

            let mut rows = Vec::with_capacity(take.min(10_000) as usize);
            let mut record = StringRecord::new();
            let mut seen = 0u64;
            while (rows.len() as u64) < take && reader.read_record(&mut record)? {
                if is_blank(&record) {
                    continue;
                }
                seen += 1;
                if seen <= skip {
                    continue;
                }
                let values = record.iter().map(str::to_string).collect();
                rows.push(Row::new(headers.clone(), values));
            }
            Ok(rows)
        })
        .await??;
        Ok(rows)
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.is_empty())
}

/// Headers the processor expects but the file lacks, compared snake_cased
pub fn missing_headers(expected: &[String], actual: &[String]) -> Vec<String> {
    let expected = snake_case_all(expected.iter());
    expected
        .into_iter()
        .filter(|h| !actual.contains(h))
        .collect()
}
