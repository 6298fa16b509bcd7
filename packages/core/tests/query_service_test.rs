//! Integration tests for QueryService
//!
//! Tests cover:
//! - Children paging and ordering
//! - Roots with prefetched children and `hasMoreChildren`
//! - Cache hits and invalidation after mutations
//! - Paging parameter validation

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use directory_core::{
    CancelToken, Directory, DirectoryConfig, ErrorKind, ManualClock, NodeId,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// Test helper: Create a directory on a fresh database with a manual clock
async fn create_test_env() -> Result<(Directory, Arc<ManualClock>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = DirectoryConfig {
        database_path: temp_dir.path().join("test.db"),
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
    ));
    let directory = Directory::builder(config)
        .clock(clock.clone())
        .open()
        .await?;

    Ok((directory, clock, temp_dir))
}

async fn create(
    directory: &Directory,
    clock: &ManualClock,
    identifier: &str,
    parent: Option<NodeId>,
) -> Result<NodeId> {
    clock.advance(Duration::seconds(1));
    let id = directory
        .hierarchy
        .create_node(
            &format!("Department {}", identifier),
            identifier,
            parent,
            &CancelToken::new(),
        )
        .await?;
    Ok(id)
}

// =========================================================================
// Children Listing Tests
// =========================================================================

#[tokio::test]
async fn test_list_children_pages_oldest_first() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    let main = create(&directory, &clock, "main", None).await?;
    let mut children = Vec::new();
    for identifier in ["alpha", "bravo", "charlie", "delta", "echo"] {
        children.push(create(&directory, &clock, identifier, Some(main)).await?);
    }
    create(&directory, &clock, "nested", Some(children[1])).await?;

    let first = directory.queries.list_children(main, 1, 2).await?;
    let second = directory.queries.list_children(main, 2, 2).await?;
    let third = directory.queries.list_children(main, 3, 2).await?;

    let identifiers: Vec<&str> = first
        .iter()
        .chain(second.iter())
        .chain(third.iter())
        .map(|c| c.identifier.as_str())
        .collect();
    assert_eq!(identifiers, ["alpha", "bravo", "charlie", "delta", "echo"]);

    assert!(!first[0].has_more_children);
    assert!(first[1].has_more_children);
    assert_eq!(first[1].path, "main.bravo");
    assert_eq!(first[1].depth, 2);
    assert_eq!(first[1].parent_id, Some(main));
    Ok(())
}

#[tokio::test]
async fn test_list_children_of_leaf_is_empty() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    let main = create(&directory, &clock, "main", None).await?;

    assert!(directory.queries.list_children(main, 1, 20).await?.is_empty());
    assert!(directory
        .queries
        .list_children(NodeId::new(), 1, 20)
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_inactive_children_are_listed_with_state() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    let main = create(&directory, &clock, "main", None).await?;
    let moscow = create(&directory, &clock, "moscow", Some(main)).await?;
    directory
        .hierarchy
        .deactivate_node(moscow, &CancelToken::new())
        .await?;

    let children = directory.queries.list_children(main, 1, 20).await?;
    assert_eq!(children.len(), 1);
    assert!(!children[0].active);
    assert_eq!(children[0].identifier, "deleted-moscow");
    Ok(())
}

// =========================================================================
// Roots Listing Tests
// =========================================================================

#[tokio::test]
async fn test_list_roots_prefetches_children() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    let main = create(&directory, &clock, "main", None).await?;
    for identifier in ["alpha", "bravo", "charlie", "delta"] {
        create(&directory, &clock, identifier, Some(main)).await?;
    }
    let sales = create(&directory, &clock, "sales", None).await?;
    create(&directory, &clock, "shops", Some(sales)).await?;
    create(&directory, &clock, "empty", None).await?;

    let roots = directory.queries.list_roots(1, 20, 3).await?;
    assert_eq!(roots.len(), 3);

    assert_eq!(roots[0].node.identifier, "main");
    assert_eq!(roots[0].children.len(), 3);
    assert!(roots[0].node.has_more_children);

    assert_eq!(roots[1].node.identifier, "sales");
    assert_eq!(roots[1].children.len(), 1);
    assert!(!roots[1].node.has_more_children);

    assert_eq!(roots[2].node.identifier, "empty");
    assert!(roots[2].children.is_empty());
    assert!(!roots[2].node.has_more_children);
    Ok(())
}

#[tokio::test]
async fn test_list_roots_serializes_flat_with_children() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    let main = create(&directory, &clock, "main", None).await?;
    create(&directory, &clock, "moscow", Some(main)).await?;

    let roots = directory.queries.list_roots(1, 20, 0).await?;
    let value = serde_json::to_value(&roots)?;

    assert_eq!(value[0]["identifier"], json!("main"));
    assert_eq!(value[0]["hasMoreChildren"], json!(true));
    assert_eq!(value[0]["children"], json!([]));
    assert!(value[0].get("node").is_none());
    Ok(())
}

// =========================================================================
// Cache Tests
// =========================================================================

#[tokio::test]
async fn test_listing_served_from_cache_until_mutation() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    create(&directory, &clock, "main", None).await?;

    let first = directory.queries.list_roots(1, 20, 3).await?;
    assert_eq!(directory.cache.len().await, 1);

    let second = directory.queries.list_roots(1, 20, 3).await?;
    assert_eq!(first, second);
    assert_eq!(directory.cache.len().await, 1);

    create(&directory, &clock, "sales", None).await?;
    assert!(directory.cache.is_empty().await);

    let third = directory.queries.list_roots(1, 20, 3).await?;
    assert_eq!(third.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_move_invalidates_children_listings() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    let main = create(&directory, &clock, "main", None).await?;
    let sales = create(&directory, &clock, "sales", None).await?;

    assert!(directory.queries.list_children(main, 1, 20).await?.is_empty());

    directory
        .hierarchy
        .move_node(sales, Some(main), &CancelToken::new())
        .await?;

    let children = directory.queries.list_children(main, 1, 20).await?;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].path, "main.sales");
    Ok(())
}

// =========================================================================
// Validation Tests
// =========================================================================

#[tokio::test]
async fn test_paging_parameters_validated() -> Result<()> {
    let (directory, clock, _temp_dir) = create_test_env().await?;
    let main = create(&directory, &clock, "main", None).await?;

    let err = directory.queries.list_children(main, 0, 20).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.field(), Some("page"));

    let err = directory.queries.list_children(main, 1, 51).await.unwrap_err();
    assert_eq!(err.field(), Some("pageSize"));

    let err = directory.queries.list_roots(1, 20, 21).await.unwrap_err();
    assert_eq!(err.field(), Some("prefetch"));

    let err = directory.queries.list_roots(0, 0, 0).await.unwrap_err();
    assert_eq!(err.to_response().errors.len(), 2);
    Ok(())
}
