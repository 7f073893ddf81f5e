//! Lookup of processors by identifier
//!
//! Only registered identifiers resolve; anything else is rejected with
//! [`SyncError::UnknownProcessor`].

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{SyncError, SyncResult};
use super::processor::{ExportProcessor, ImportProcessor};

#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    imports: BTreeMap<String, Arc<dyn ImportProcessor>>,
    exports: BTreeMap<String, Arc<dyn ExportProcessor>>,
}

fn validate_id(id: &str) -> SyncResult<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SyncError::Other(anyhow::anyhow!(
            "Processor id '{}' must be lowercase letters, digits, '_' or '-'",
            id
        )))
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_import(
        &mut self,
        id: &str,
        processor: Arc<dyn ImportProcessor>,
    ) -> SyncResult<()> {
        validate_id(id)?;
        if self.imports.contains_key(id) {
            return Err(SyncError::DuplicateProcessor(id.to_string()));
        }
        self.imports.insert(id.to_string(), processor);
        Ok(())
    }

    pub fn register_export(
        &mut self,
        id: &str,
        processor: Arc<dyn ExportProcessor>,
    ) -> SyncResult<()> {
        validate_id(id)?;
        if self.exports.contains_key(id) {
            return Err(SyncError::DuplicateProcessor(id.to_string()));
        }
        self.exports.insert(id.to_string(), processor);
        Ok(())
    }

    pub fn import(&self, id: &str) -> SyncResult<Arc<dyn ImportProcessor>> {
        self.imports
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownProcessor(id.to_string()))
    }

    pub fn export(&self, id: &str) -> SyncResult<Arc<dyn ExportProcessor>> {
        self.exports
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownProcessor(id.to_string()))
    }

    pub fn import_ids(&self) -> impl Iterator<Item = &str> {
        self.imports.keys().map(String::as_str)
    }

    pub fn export_ids(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}
