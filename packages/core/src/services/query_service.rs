//! Query Service - cached listings of the department forest
//!
//! Lock-free autocommit reads served through the [`ReadCache`]. Keys carry
//! [`CACHE_PREFIX`] so a single prefix removal after any mutation drops every
//! listing at once.

use std::sync::Arc;

use crate::db::NodeStore;
use crate::models::validation::{validate_node_id, validate_page, validate_prefetch};
use crate::models::{NodeId, NodeSummary, NodeWithChildren};
use crate::services::cache::{ReadCache, CACHE_PREFIX};
use crate::services::error::DirectoryError;

pub struct QueryService {
    store: NodeStore,
    cache: Arc<ReadCache>,
}

fn offset(page: u32, page_size: u32) -> u32 {
    (page - 1).saturating_mul(page_size)
}

impl QueryService {
    pub fn new(store: NodeStore, cache: Arc<ReadCache>) -> Self {
        Self { store, cache }
    }

    /// One page of a department's children, oldest first
    pub async fn list_children(
        &self,
        parent_id: NodeId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<NodeSummary>, DirectoryError> {
        let mut errors = validate_node_id("parentId", parent_id);
        errors.extend(validate_page(page, page_size));
        if !errors.is_empty() {
            return Err(DirectoryError::Validation(errors));
        }

        let key = format!("{CACHE_PREFIX}children_{parent_id}_{page}_{page_size}");
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let children = self
            .store
            .list_children(parent_id, page_size, offset(page, page_size))
            .await?;
        self.cache.insert(key, &children).await;
        Ok(children)
    }

    /// One page of roots, oldest first, each with up to `prefetch` children
    pub async fn list_roots(
        &self,
        page: u32,
        page_size: u32,
        prefetch: u32,
    ) -> Result<Vec<NodeWithChildren>, DirectoryError> {
        let mut errors = validate_page(page, page_size);
        errors.extend(validate_prefetch(prefetch));
        if !errors.is_empty() {
            return Err(DirectoryError::Validation(errors));
        }

        let key = format!("{CACHE_PREFIX}roots_{page}_{page_size}_{prefetch}");
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let roots = self
            .store
            .list_roots(page_size, offset(page, page_size), prefetch)
            .await?;
        self.cache.insert(key, &roots).await;
        Ok(roots)
    }
}
