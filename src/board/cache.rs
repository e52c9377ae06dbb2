//! Client-side mirror of task positions for optimistic reordering.
//!
//! A `PositionCache` is an explicit value owned by whoever renders the board;
//! there is no global instance. Each group is fetched at most once until it
//! is invalidated. A drag-and-drop writes the locally computed result
//! immediately, then the server's answer overwrites it. On failure the guess
//! is dropped and the group is re-fetched.

use std::collections::{HashMap, HashSet};

use super::client::PositionSource;
use super::models::{ContextKey, MoveOutcome, MoveRequest, TaskPosition};
use super::reorder::{self, MovePlan};
use crate::errors::PositionError;

#[derive(Debug, Default)]
pub struct PositionCache {
    groups: HashMap<ContextKey, HashMap<i64, i32>>,
    loaded: HashSet<ContextKey>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, key: &ContextKey) -> bool {
        self.loaded.contains(key)
    }

    pub fn position_of(&self, key: &ContextKey, task_id: i64) -> Option<i32> {
        self.groups.get(key).and_then(|g| g.get(&task_id)).copied()
    }

    /// Local positions of a group, ascending.
    pub fn positions(&self, key: &ContextKey) -> Vec<TaskPosition> {
        let mut out: Vec<TaskPosition> = self
            .groups
            .get(key)
            .map(|g| {
                g.iter()
                    .map(|(task_id, position)| TaskPosition {
                        task_id: *task_id,
                        position: *position,
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|p| (p.position, p.task_id));
        out
    }

    /// Forget a group so the next `ensure_loaded` fetches it again.
    pub fn invalidate(&mut self, key: &ContextKey) {
        self.groups.remove(key);
        self.loaded.remove(key);
    }

    /// Replace a group wholesale with a fresh server listing.
    pub fn replace(&mut self, key: &ContextKey, positions: &[TaskPosition]) {
        let group = positions.iter().map(|p| (p.task_id, p.position)).collect();
        self.groups.insert(*key, group);
        self.loaded.insert(*key);
    }

    /// Fetch a group unless it is already loaded.
    pub async fn ensure_loaded(
        &mut self,
        source: &dyn PositionSource,
        key: &ContextKey,
    ) -> Result<(), PositionError> {
        if self.is_loaded(key) {
            return Ok(());
        }
        let positions = source.fetch_positions(key).await?;
        tracing::debug!(group = %key, count = positions.len(), "loaded positions");
        self.replace(key, &positions);
        Ok(())
    }

    /// Sort tasks for rendering: known positions first (ascending), the rest
    /// by ascending task id.
    pub fn sorted_tasks<T, F>(&self, tasks: Vec<T>, key: &ContextKey, id_of: F) -> Vec<T>
    where
        F: Fn(&T) -> i64,
    {
        let empty = HashMap::new();
        let group = self.groups.get(key).unwrap_or(&empty);
        let ids: Vec<i64> = tasks.iter().map(&id_of).collect();
        let order = reorder::fallback_order(group, &ids);

        let mut by_id: HashMap<i64, T> = tasks.into_iter().map(|t| (id_of(&t), t)).collect();
        order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
    }

    /// Apply the move locally, exactly as the server will: known positions in
    /// order, unknown visible ids appended by id, then the shift.
    ///
    /// `target` is the 1-based slot, i.e. the dropped item's new index + 1.
    pub fn apply_optimistic_move(
        &mut self,
        key: &ContextKey,
        visible_ids: &[i64],
        task_id: i64,
        target: i32,
    ) -> MovePlan {
        let group = self.groups.entry(*key).or_default();

        let mut members: Vec<i64> = group.keys().copied().collect();
        members.extend(visible_ids.iter().copied().filter(|id| !group.contains_key(id)));
        members.sort_unstable();
        members.dedup();
        let order = reorder::fallback_order(group, &members);

        let mut list: Vec<TaskPosition> = order
            .into_iter()
            .enumerate()
            .map(|(idx, id)| TaskPosition {
                task_id: id,
                position: idx as i32 + 1,
            })
            .collect();
        if !list.iter().any(|p| p.task_id == task_id) {
            list.push(TaskPosition {
                task_id,
                position: list.len() as i32 + 1,
            });
        }

        let plan = reorder::apply_move(&mut list, task_id, target).unwrap_or(MovePlan {
            task_id,
            from: target,
            to: target,
        });
        group.clear();
        group.extend(list.iter().map(|p| (p.task_id, p.position)));
        plan
    }

    /// Overwrite local entries with the server's values. `positions` is a
    /// complete group, so the key counts as loaded afterwards.
    pub fn merge_authoritative(&mut self, key: &ContextKey, positions: &[TaskPosition]) {
        let group = self.groups.entry(*key).or_default();
        for p in positions {
            group.insert(p.task_id, p.position);
        }
        self.loaded.insert(*key);
    }

    /// Optimistically move a task, then reconcile with the server.
    ///
    /// On failure the local group is discarded and re-fetched, and the
    /// original error is returned so the caller can surface or retry it.
    pub async fn reorder(
        &mut self,
        source: &dyn PositionSource,
        key: &ContextKey,
        visible_ids: &[i64],
        task_id: i64,
        target: i32,
    ) -> Result<MoveOutcome, PositionError> {
        let req = MoveRequest {
            task_id,
            context: key.context(),
            context_id: key.context_id(),
            position: target,
            task_ids: visible_ids.to_vec(),
        };
        req.validate()?;

        let plan = self.apply_optimistic_move(key, visible_ids, task_id, target);
        tracing::debug!(group = %key, task_id, from = plan.from, to = plan.to, "optimistic move");

        match source.move_position(&req).await {
            Ok(outcome) => {
                self.merge_authoritative(key, &outcome.positions);
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(group = %key, task_id, error = %err, "move failed, resyncing");
                self.invalidate(key);
                if let Err(refetch) = self.ensure_loaded(source, key).await {
                    tracing::warn!(group = %key, error = %refetch, "resync failed");
                }
                Err(err)
            }
        }
    }
}
