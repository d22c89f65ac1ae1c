//! Entity persistence seam
//!
//! The monitoring core never owns storage. It reads time-windowed
//! collections and writes new or updated records through [`Repository`],
//! which is implemented by the remote entity API ([`HttpEntityStore`]) and
//! by an in-process map ([`MemoryRepository`]).
//!
//! The store is assumed to make a single create or update atomic. Nothing
//! here adds application-level locking on top of that.

mod filter;
mod http;
mod memory;

pub use filter::{Filter, Op, Predicate};
pub use http::HttpEntityStore;
pub use memory::MemoryRepository;

use crate::models::{
    AlertNotification, AlertWorkflow, Anomaly, Camera, Event, Organization, Stream,
    StreamCallbackLog, Task,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// A record addressable in a named collection
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name on the entity API
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

macro_rules! entity {
    ($ty:ty, $collection:literal) => {
        impl Entity for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

entity!(Event, "Event");
entity!(Camera, "Camera");
entity!(Stream, "Stream");
entity!(Anomaly, "PlatformAnomaly");
entity!(AlertWorkflow, "AlertWorkflow");
entity!(AlertNotification, "AlertNotification");
entity!(StreamCallbackLog, "StreamCallbackLog");
entity!(Organization, "Organization");
entity!(Task, "Task");

/// Typed CRUD access to one collection
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Records matching every predicate of `filter`
    async fn filter(&self, filter: &Filter) -> Result<Vec<T>>;

    /// The record with `id`, or `None` when absent
    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// Insert a new record; fails if its id is already taken
    async fn create(&self, record: T) -> Result<T>;

    /// Replace the stored record that has the same id
    async fn update(&self, record: T) -> Result<T>;

    /// Every record in the collection
    async fn list(&self) -> Result<Vec<T>> {
        self.filter(&Filter::new()).await
    }
}

/// One repository per collection the core touches
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn Repository<Event>>,
    pub cameras: Arc<dyn Repository<Camera>>,
    /// Per-stream health records
    pub streams: Arc<dyn Repository<Stream>>,
    /// `PlatformAnomaly` collection
    pub anomalies: Arc<dyn Repository<Anomaly>>,
    pub workflows: Arc<dyn Repository<AlertWorkflow>>,
    pub notifications: Arc<dyn Repository<AlertNotification>>,
    /// Restart attempts by the health monitor and watchdog
    pub callback_logs: Arc<dyn Repository<StreamCallbackLog>>,
    pub organizations: Arc<dyn Repository<Organization>>,
    /// Follow-up tasks created by workflow actions
    pub tasks: Arc<dyn Repository<Task>>,
}

impl Stores {
    /// Fresh, empty in-process collections
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(MemoryRepository::new()),
            cameras: Arc::new(MemoryRepository::new()),
            streams: Arc::new(MemoryRepository::new()),
            anomalies: Arc::new(MemoryRepository::new()),
            workflows: Arc::new(MemoryRepository::new()),
            notifications: Arc::new(MemoryRepository::new()),
            callback_logs: Arc::new(MemoryRepository::new()),
            organizations: Arc::new(MemoryRepository::new()),
            tasks: Arc::new(MemoryRepository::new()),
        }
    }

    /// Every collection served by the remote entity API
    pub fn remote(store: HttpEntityStore) -> Self {
        let store = Arc::new(store);
        Self {
            events: store.clone(),
            cameras: store.clone(),
            streams: store.clone(),
            anomalies: store.clone(),
            workflows: store.clone(),
            notifications: store.clone(),
            callback_logs: store.clone(),
            organizations: store.clone(),
            tasks: store,
        }
    }
}
