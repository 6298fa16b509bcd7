//! Directory wiring
//!
//! Opens the database and assembles the services around one shared store,
//! lock manager and read cache.
//!
//! ```no_run
//! # use directory_core::config::DirectoryConfig;
//! # use directory_core::services::Directory;
//! # use directory_core::CancelToken;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = Directory::open(&DirectoryConfig::default()).await?;
//! let cancel = CancelToken::new();
//! let main = directory.hierarchy.create_node("Head office", "main", None, &cancel).await?;
//! let roots = directory.queries.list_roots(1, 20, 3).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::config::{ConfigError, DirectoryConfig};
use crate::db::{DatabaseError, DatabaseService, NodeStore, RowLockManager};
use crate::services::cache::ReadCache;
use crate::services::clock::{Clock, SystemClock};
use crate::services::collaborators::{LocationDeactivator, NoopLocations};
use crate::services::compaction::CompactionJob;
use crate::services::hierarchy_service::HierarchyService;
use crate::services::query_service::QueryService;

/// Fully wired directory services
pub struct Directory {
    pub store: NodeStore,
    pub cache: Arc<ReadCache>,
    pub clock: Arc<dyn Clock>,
    pub hierarchy: HierarchyService,
    pub queries: QueryService,
    config: DirectoryConfig,
}

impl Directory {
    /// Open with the system clock and no location registry
    pub async fn open(config: &DirectoryConfig) -> Result<Self, DatabaseError> {
        DirectoryBuilder::new(config.clone()).open().await
    }

    pub fn builder(config: DirectoryConfig) -> DirectoryBuilder {
        DirectoryBuilder::new(config)
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Compaction job sharing this directory's store, clock and cache
    pub fn compaction_job(&self) -> Result<CompactionJob, ConfigError> {
        CompactionJob::new(
            self.store.clone(),
            Arc::clone(&self.clock),
            self.cache.clone(),
            self.config.compaction.clone(),
        )
    }
}

/// Overrides for the injected collaborators
pub struct DirectoryBuilder {
    config: DirectoryConfig,
    clock: Arc<dyn Clock>,
    locations: Arc<dyn LocationDeactivator>,
}

impl DirectoryBuilder {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            locations: Arc::new(NoopLocations),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn locations(mut self, locations: Arc<dyn LocationDeactivator>) -> Self {
        self.locations = locations;
        self
    }

    pub async fn open(self) -> Result<Directory, DatabaseError> {
        let db = Arc::new(DatabaseService::new(self.config.database_path.clone()).await?);
        let store = NodeStore::new(db, RowLockManager::new(self.config.lock_timeout()));
        let cache = Arc::new(ReadCache::with_ttl(self.config.cache_ttl()));

        let hierarchy = HierarchyService::new(
            store.clone(),
            Arc::clone(&self.clock),
            self.locations,
            cache.clone(),
        );
        let queries = QueryService::new(store.clone(), cache.clone());

        Ok(Directory {
            store,
            cache,
            clock: self.clock,
            hierarchy,
            queries,
            config: self.config,
        })
    }
}
