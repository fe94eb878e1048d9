//! Converter registry
//!
//! An explicit, ordered id-to-converter mapping constructed at startup
//! and passed by reference into validation, readers and the engine.
//! Registration order is significant: it is the order predicates are
//! tried at fetch time.

use crate::{BlobConverter, Converter, DateTimeIso8601Converter};
use datapluck_core::schema::{BLOB_ID, DATE_TIME_ISO8601_ID};
use datapluck_core::ConverterLookup;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ConverterRegistry {
    entries: Vec<(String, Arc<dyn Converter>)>,
}

impl ConverterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock converters pre-registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DATE_TIME_ISO8601_ID, Arc::new(DateTimeIso8601Converter));
        registry.register(BLOB_ID, Arc::new(BlobConverter));
        registry
    }

    /// Register a converter; re-registering an id replaces it in place
    pub fn register(&mut self, id: impl Into<String>, converter: Arc<dyn Converter>) {
        let id = id.into();

        if let Some(entry) = self.entries.iter_mut().find(|(eid, _)| *eid == id) {
            entry.1 = converter;
        } else {
            self.entries.push((id, converter));
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.entries.iter().any(|(eid, _)| eid == id)
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<dyn Converter>> {
        self.entries
            .iter()
            .find(|(eid, _)| eid == id)
            .map(|(_, converter)| Arc::clone(converter))
    }

    /// Resolve a list of declared ids into converter instances,
    /// preserving declaration order
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<Arc<dyn Converter>>, String> {
        ids.iter()
            .map(|id| self.lookup(id).ok_or_else(|| id.clone()))
            .collect()
    }
}

impl ConverterLookup for ConverterRegistry {
    fn exists(&self, id: &str) -> bool {
        ConverterRegistry::exists(self, id)
    }
}
