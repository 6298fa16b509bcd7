//! Hierarchy Service - structural mutations of the department forest
//!
//! Owns every invariant of the tree: materialized paths and depths stay in
//! sync with the `parent_id` chain, active identifiers stay unique and no
//! move can create a cycle.
//!
//! # Operation Shape
//!
//! Every mutation except create runs the same loop:
//!
//! 1. Shape-validate the input (no locks, no store access)
//! 2. Lock the target, the new parent (moves) and a snapshot of the subtree
//! 3. Open a write transaction and re-read everything under the locks
//! 4. If the subtree grew since the snapshot, roll back, lock the newcomers
//!    and go again (bounded by [`MAX_LOCK_ATTEMPTS`])
//! 5. Write, commit, release locks, invalidate cached listings
//!
//! Preconditions (existence, state, cycle, uniqueness) are always evaluated
//! in step 3, so a request that waited behind another sees its result.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::db::{DatabaseError, LockSet, NodeStore, StoreTransaction};
use crate::models::validation::{validate_create, validate_move, validate_node_id};
use crate::models::{compute_depth, Identifier, Node, NodeId, NodePath, NodeState};
use crate::services::cache::CACHE_PREFIX;
use crate::services::clock::Clock;
use crate::services::collaborators::{CacheInvalidator, LocationDeactivator};
use crate::services::error::DirectoryError;

/// Attempts at settling a subtree's lock set before giving up
pub const MAX_LOCK_ATTEMPTS: usize = 5;

/// Outcome of one pass inside a transaction
pub(crate) enum Step<T> {
    Done(T),
    /// Descendants appeared that this transaction does not hold locks for
    NeedLocks(Vec<NodeId>),
}

pub(crate) enum Settled<T> {
    Committed(T),
    Retry(LockSet),
}

pub(crate) fn unlocked(tx: &StoreTransaction, nodes: &[Node]) -> Vec<NodeId> {
    nodes
        .iter()
        .map(|n| n.id)
        .filter(|id| !tx.holds(*id))
        .collect()
}

pub(crate) fn subtree_ids(target: &Node, descendants: &[Node]) -> Vec<NodeId> {
    std::iter::once(target.id)
        .chain(descendants.iter().map(|n| n.id))
        .collect()
}

/// Commit, roll back, or extend the lock set for another pass
pub(crate) async fn settle<T>(
    tx: StoreTransaction,
    step: Result<Step<T>, DirectoryError>,
    cancel: &CancelToken,
) -> Result<Settled<T>, DirectoryError> {
    match step {
        Ok(Step::Done(value)) => {
            tx.commit(cancel).await?;
            Ok(Settled::Committed(value))
        }
        Ok(Step::NeedLocks(missing)) => {
            debug!(
                "Subtree changed under lock, acquiring {} more rows",
                missing.len()
            );
            let mut locks = tx.rollback_keep_locks().await?;
            locks.acquire_all(missing, cancel).await?;
            Ok(Settled::Retry(locks))
        }
        Err(e) => {
            abort(tx).await;
            Err(e)
        }
    }
}

pub(crate) async fn abort(tx: StoreTransaction) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}

fn conflict_or_storage(err: DatabaseError, identifier: &Identifier) -> DirectoryError {
    if err.is_unique_violation() {
        DirectoryError::conflict(identifier.as_str())
    } else {
        err.into()
    }
}

/// Create, move, deactivate and reactivate departments
pub struct HierarchyService {
    store: NodeStore,
    clock: Arc<dyn Clock>,
    locations: Arc<dyn LocationDeactivator>,
    cache: Arc<dyn CacheInvalidator>,
}

impl HierarchyService {
    pub fn new(
        store: NodeStore,
        clock: Arc<dyn Clock>,
        locations: Arc<dyn LocationDeactivator>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            store,
            clock,
            locations,
            cache,
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Uncached point read
    pub async fn get_node(&self, id: NodeId) -> Result<Node, DirectoryError> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| DirectoryError::not_found("departmentId", id))
    }

    /// Create an active department under `parent_id`, or as a root
    pub async fn create_node(
        &self,
        name: &str,
        identifier: &str,
        parent_id: Option<NodeId>,
        cancel: &CancelToken,
    ) -> Result<NodeId, DirectoryError> {
        let errors = validate_create(name, identifier, parent_id);
        if !errors.is_empty() {
            return Err(DirectoryError::Validation(errors));
        }
        let identifier = Identifier::parse(identifier)?;

        // No row locks: the parent is read inside the write transaction
        let tx = self.store.begin(self.store.lock_set()).await?;
        let node = match self.insert_under(&tx, name, identifier, parent_id).await {
            Ok(node) => node,
            Err(e) => {
                abort(tx).await;
                return Err(e);
            }
        };
        tx.commit(cancel).await?;

        info!(
            "Created department {} '{}' at depth {}",
            node.id, node.path, node.depth
        );
        self.invalidate_listings().await;
        Ok(node.id)
    }

    async fn insert_under(
        &self,
        tx: &StoreTransaction,
        name: &str,
        identifier: Identifier,
        parent_id: Option<NodeId>,
    ) -> Result<Node, DirectoryError> {
        let parent = match parent_id {
            Some(pid) => Some(
                tx.get_node(pid)
                    .await?
                    .ok_or_else(|| DirectoryError::not_found("parentId", pid))?,
            ),
            None => None,
        };

        if tx.find_active_by_identifier(&identifier).await?.is_some() {
            return Err(DirectoryError::conflict(identifier.as_str()));
        }

        let node = Node::new_at(
            name.to_string(),
            identifier,
            parent.as_ref(),
            self.clock.now(),
        )?;
        tx.insert_node(&node)
            .await
            .map_err(|e| conflict_or_storage(e, &node.identifier))?;
        Ok(node)
    }

    /// Move a department and its whole subtree under `new_parent_id`
    ///
    /// `None` promotes the department to a root. Moving to the current parent
    /// succeeds without touching any row.
    pub async fn move_node(
        &self,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
        cancel: &CancelToken,
    ) -> Result<(), DirectoryError> {
        let errors = validate_move(node_id, new_parent_id);
        if !errors.is_empty() {
            return Err(DirectoryError::Validation(errors));
        }
        if new_parent_id == Some(node_id) {
            return Err(DirectoryError::SelfParent { id: node_id });
        }

        let mut locks = self.store.lock_set();
        locks.acquire(node_id, cancel).await?;
        if let Some(parent_id) = new_parent_id {
            locks.acquire(parent_id, cancel).await?;
        }
        locks
            .acquire_all(self.store.descendant_ids(node_id).await?, cancel)
            .await?;

        for _ in 0..MAX_LOCK_ATTEMPTS {
            let tx = self.store.begin(locks).await?;
            let step = self.apply_move(&tx, node_id, new_parent_id).await;
            match settle(tx, step, cancel).await? {
                Settled::Committed(Some(rewritten)) => {
                    info!(
                        "Moved department {} under {:?} ({} rows rewritten)",
                        node_id, new_parent_id, rewritten
                    );
                    self.invalidate_listings().await;
                    return Ok(());
                }
                Settled::Committed(None) => {
                    debug!("Department {} already under {:?}", node_id, new_parent_id);
                    return Ok(());
                }
                Settled::Retry(more) => locks = more,
            }
        }

        Err(Self::contention(node_id))
    }

    async fn apply_move(
        &self,
        tx: &StoreTransaction,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
    ) -> Result<Step<Option<u64>>, DirectoryError> {
        let target = tx
            .get_node(node_id)
            .await?
            .ok_or_else(|| DirectoryError::not_found("departmentId", node_id))?;

        let new_parent = match new_parent_id {
            Some(pid) => Some(
                tx.get_node(pid)
                    .await?
                    .ok_or_else(|| DirectoryError::not_found("parentId", pid))?,
            ),
            None => None,
        };

        if target.parent_id == new_parent_id {
            return Ok(Step::Done(None));
        }

        if let Some(parent) = &new_parent {
            if Self::is_within(tx, parent, &target).await? {
                return Err(DirectoryError::Cycle {
                    node_id,
                    new_parent_id: parent.id,
                });
            }
        }

        let descendants = tx.descendants(&target).await?;
        let missing = unlocked(tx, &descendants);
        if !missing.is_empty() {
            return Ok(Step::NeedLocks(missing));
        }

        let new_path = NodePath::compute(new_parent.as_ref().map(|p| &p.path), &target.identifier)?;
        let new_depth = compute_depth(new_parent.as_ref().map(|p| p.depth));
        let now = self.clock.now();

        let rewritten = tx
            .rewrite_subtree(
                &subtree_ids(&target, &descendants),
                &target.path,
                Some(&new_path),
                new_depth - target.depth,
                now,
            )
            .await?;
        tx.set_parent(target.id, new_parent_id, now).await?;

        debug!("Rebased '{}' -> '{}'", target.path, new_path);
        Ok(Step::Done(Some(rewritten)))
    }

    /// True when `candidate` is `ancestor` or lies below it
    ///
    /// The path prefix answers almost every case; the parent chain is walked
    /// to confirm because inactive siblings can share a path.
    async fn is_within(
        tx: &StoreTransaction,
        candidate: &Node,
        ancestor: &Node,
    ) -> Result<bool, DirectoryError> {
        if !candidate.path.is_self_or_descendant_of(&ancestor.path) {
            return Ok(false);
        }

        let mut current = Some(candidate.clone());
        while let Some(node) = current {
            if node.id == ancestor.id {
                return Ok(true);
            }
            current = match node.parent_id {
                Some(parent_id) => tx.get_node(parent_id).await?,
                None => None,
            };
        }
        Ok(false)
    }

    /// Soft-delete a department
    ///
    /// The identifier gets the deactivation marker, so the bare slug can be
    /// reused; descendant paths follow the renamed segment but descendants
    /// keep their own `active` flag. Locations attached only to the
    /// department are retired once the deactivation has committed.
    pub async fn deactivate_node(
        &self,
        node_id: NodeId,
        cancel: &CancelToken,
    ) -> Result<(), DirectoryError> {
        let errors = validate_node_id("departmentId", node_id);
        if !errors.is_empty() {
            return Err(DirectoryError::Validation(errors));
        }

        let mut locks = self.lock_subtree(node_id, cancel).await?;
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let tx = self.store.begin(locks).await?;
            let step = self.apply_deactivate(&tx, node_id).await;
            match settle(tx, step, cancel).await? {
                Settled::Committed(locations) => {
                    info!("Deactivated department {}", node_id);
                    self.retire_locations(node_id, &locations).await;
                    self.invalidate_listings().await;
                    return Ok(());
                }
                Settled::Retry(more) => locks = more,
            }
        }

        Err(Self::contention(node_id))
    }

    async fn apply_deactivate(
        &self,
        tx: &StoreTransaction,
        node_id: NodeId,
    ) -> Result<Step<Vec<String>>, DirectoryError> {
        let target = tx
            .get_node(node_id)
            .await?
            .ok_or_else(|| DirectoryError::not_found("departmentId", node_id))?;
        if !target.active {
            return Err(DirectoryError::AlreadyInState {
                id: node_id,
                state: NodeState::Inactive,
            });
        }

        let descendants = tx.descendants(&target).await?;
        let missing = unlocked(tx, &descendants);
        if !missing.is_empty() {
            return Ok(Step::NeedLocks(missing));
        }

        let marked = target.identifier.deactivated();
        let new_path = target.path.with_last_segment(&marked)?;
        let now = self.clock.now();

        tx.rewrite_subtree(
            &subtree_ids(&target, &descendants),
            &target.path,
            Some(&new_path),
            0,
            now,
        )
        .await?;
        tx.set_activation(target.id, &marked, false, Some(now), now)
            .await?;

        // Read under the subtree locks; retired only after COMMIT
        let locations = self.locations.locations_of(node_id).await?;
        Ok(Step::Done(locations))
    }

    async fn retire_locations(&self, node_id: NodeId, locations: &[String]) {
        if locations.is_empty() {
            return;
        }
        match self
            .locations
            .deactivate_exclusive(node_id, locations)
            .await
        {
            Ok(()) => debug!(
                "Deactivated locations exclusive to department {}: {:?}",
                node_id, locations
            ),
            Err(e) => error!(
                "Department {} deactivated but its locations {:?} were not retired: {}",
                node_id, locations, e
            ),
        }
    }

    /// Undo a deactivation, restoring the bare identifier
    pub async fn reactivate_node(
        &self,
        node_id: NodeId,
        cancel: &CancelToken,
    ) -> Result<(), DirectoryError> {
        let errors = validate_node_id("departmentId", node_id);
        if !errors.is_empty() {
            return Err(DirectoryError::Validation(errors));
        }

        let mut locks = self.lock_subtree(node_id, cancel).await?;
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let tx = self.store.begin(locks).await?;
            let step = self.apply_reactivate(&tx, node_id).await;
            match settle(tx, step, cancel).await? {
                Settled::Committed(()) => {
                    info!("Reactivated department {}", node_id);
                    self.invalidate_listings().await;
                    return Ok(());
                }
                Settled::Retry(more) => locks = more,
            }
        }

        Err(Self::contention(node_id))
    }

    async fn apply_reactivate(
        &self,
        tx: &StoreTransaction,
        node_id: NodeId,
    ) -> Result<Step<()>, DirectoryError> {
        let target = tx
            .get_node(node_id)
            .await?
            .ok_or_else(|| DirectoryError::not_found("departmentId", node_id))?;
        if target.active {
            return Err(DirectoryError::AlreadyInState {
                id: node_id,
                state: NodeState::Active,
            });
        }

        let bare = target.identifier.reactivated()?;
        if let Some(holder) = tx.find_active_by_identifier(&bare).await? {
            if holder.id != node_id {
                return Err(DirectoryError::conflict(bare.as_str()));
            }
        }

        let descendants = tx.descendants(&target).await?;
        let missing = unlocked(tx, &descendants);
        if !missing.is_empty() {
            return Ok(Step::NeedLocks(missing));
        }

        let new_path = target.path.with_last_segment(&bare)?;
        let now = self.clock.now();

        tx.rewrite_subtree(
            &subtree_ids(&target, &descendants),
            &target.path,
            Some(&new_path),
            0,
            now,
        )
        .await?;
        tx.set_activation(target.id, &bare, true, None, now)
            .await
            .map_err(|e| conflict_or_storage(e, &bare))?;

        Ok(Step::Done(()))
    }

    /// Lock the target and a snapshot of its descendants
    async fn lock_subtree(
        &self,
        node_id: NodeId,
        cancel: &CancelToken,
    ) -> Result<LockSet, DirectoryError> {
        let mut locks = self.store.lock_set();
        locks.acquire(node_id, cancel).await?;
        locks
            .acquire_all(self.store.descendant_ids(node_id).await?, cancel)
            .await?;
        Ok(locks)
    }

    pub(crate) fn contention(node_id: NodeId) -> DirectoryError {
        DatabaseError::LockContention {
            row_id: node_id.to_string(),
            attempts: MAX_LOCK_ATTEMPTS,
        }
        .into()
    }

    async fn invalidate_listings(&self) {
        if let Err(e) = self.cache.remove_by_prefix(CACHE_PREFIX).await {
            warn!("Failed to invalidate cached listings: {}", e);
        }
    }
}
