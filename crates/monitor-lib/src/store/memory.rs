//! In-process repository backed by a concurrent map

use super::{Entity, Filter, Repository};
use crate::error::MonitorError;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Repository holding records in memory, keyed by id
///
/// Used when the core runs without a remote entity API and as the test
/// double for every component.
pub struct MemoryRepository<T> {
    records: DashMap<String, T>,
}

impl<T: Entity> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Seed a repository with existing records
    pub fn with_records(records: impl IntoIterator<Item = T>) -> Self {
        let repo = Self::new();
        for record in records {
            repo.records.insert(record.id().to_string(), record);
        }
        repo
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: Entity> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MemoryRepository<T> {
    async fn filter(&self, filter: &Filter) -> Result<Vec<T>> {
        let mut matched = Vec::new();
        for entry in self.records.iter() {
            let value = serde_json::to_value(entry.value())
                .with_context(|| format!("Failed to serialize {} {}", T::COLLECTION, entry.key()))?;
            if filter.matches(&value) {
                matched.push(entry.value().clone());
            }
        }
        Ok(matched)
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn create(&self, record: T) -> Result<T> {
        match self.records.entry(record.id().to_string()) {
            Entry::Occupied(existing) => bail!("{} {} already exists", T::COLLECTION, existing.key()),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(&self, record: T) -> Result<T> {
        match self.records.get_mut(record.id()) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(MonitorError::NotFound {
                kind: T::COLLECTION,
                id: record.id().to_string(),
            }
            .into()),
        }
    }
}
