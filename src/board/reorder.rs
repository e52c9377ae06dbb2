//! Position arithmetic shared by the store and the client cache.
//!
//! Nothing in here touches I/O. The store feeds it rows read inside a
//! transaction and persists whatever comes back dirty; the client cache feeds
//! it its local mirror so an optimistic move lands on exactly the positions
//! the server will compute.

use std::collections::{HashMap, HashSet};

use super::models::{PositionEntry, TaskPosition};

/// Anything that carries a task id and a mutable 1-based position.
pub trait Positioned {
    fn task_id(&self) -> i64;
    fn position(&self) -> i32;
    fn set_position(&mut self, position: i32);
}

impl Positioned for PositionEntry {
    fn task_id(&self) -> i64 {
        PositionEntry::task_id(self)
    }

    fn position(&self) -> i32 {
        PositionEntry::position(self)
    }

    fn set_position(&mut self, position: i32) {
        PositionEntry::set_position(self, position)
    }
}

impl Positioned for TaskPosition {
    fn task_id(&self) -> i64 {
        self.task_id
    }

    fn position(&self) -> i32 {
        self.position
    }

    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

/// A persisted `task_positions` row as read from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredPosition {
    pub row_id: i64,
    pub task_id: i64,
    pub position: i32,
}

/// Where a task was and where it ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    pub task_id: i64,
    pub from: i32,
    pub to: i32,
}

impl MovePlan {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Merge persisted rows with the client's view of the group.
///
/// Stored rows keep their relative order (position, then task id) and are
/// renumbered densely from 1, which compacts any gap left behind by a
/// deleted task. Ids from `all_task_ids` that have no row are appended after
/// them in ascending id order as `Derived` entries.
pub fn resolve_group(stored: &[StoredPosition], all_task_ids: &[i64]) -> Vec<PositionEntry> {
    let mut rows = stored.to_vec();
    rows.sort_by_key(|r| (r.position, r.task_id));

    let mut entries: Vec<PositionEntry> = rows
        .iter()
        .enumerate()
        .map(|(idx, r)| PositionEntry::Stored {
            row_id: r.row_id,
            task_id: r.task_id,
            stored: r.position,
            position: idx as i32 + 1,
        })
        .collect();

    let known: HashSet<i64> = rows.iter().map(|r| r.task_id).collect();
    let mut missing: Vec<i64> = all_task_ids
        .iter()
        .copied()
        .filter(|id| !known.contains(id))
        .collect();
    missing.sort_unstable();
    missing.dedup();

    let base = entries.len() as i32;
    entries.extend(
        missing
            .into_iter()
            .enumerate()
            .map(|(idx, task_id)| PositionEntry::Derived {
                task_id,
                position: base + idx as i32 + 1,
            }),
    );
    entries
}

pub fn clamp_target(target: i32, count: usize) -> i32 {
    let count = count.max(1) as i32;
    target.clamp(1, count)
}

/// Move `task_id` to `target` inside a contiguous `1..=N` group.
///
/// Tasks between the old and new slot shift by one towards the vacated slot.
/// The slice is left sorted by position. Returns `None` when `task_id` is not
/// a member; callers append it at `N + 1` first.
pub fn apply_move<P: Positioned>(entries: &mut [P], task_id: i64, target: i32) -> Option<MovePlan> {
    let from = entries.iter().find(|e| e.task_id() == task_id)?.position();
    let to = clamp_target(target, entries.len());

    if from < to {
        for e in entries.iter_mut() {
            let p = e.position();
            if p > from && p <= to {
                e.set_position(p - 1);
            }
        }
    } else if from > to {
        for e in entries.iter_mut() {
            let p = e.position();
            if p >= to && p < from {
                e.set_position(p + 1);
            }
        }
    }

    if let Some(moved) = entries.iter_mut().find(|e| e.task_id() == task_id) {
        moved.set_position(to);
    }
    entries.sort_by_key(|e| (e.position(), e.task_id()));

    Some(MovePlan { task_id, from, to })
}

/// Order task ids the way the board renders them: positioned tasks by
/// position, then the rest by ascending id.
pub fn fallback_order(positions: &HashMap<i64, i32>, task_ids: &[i64]) -> Vec<i64> {
    let mut positioned: Vec<(i32, i64)> = Vec::new();
    let mut unpositioned: Vec<i64> = Vec::new();
    for id in task_ids {
        match positions.get(id) {
            Some(p) => positioned.push((*p, *id)),
            None => unpositioned.push(*id),
        }
    }
    positioned.sort_unstable();
    unpositioned.sort_unstable();

    positioned
        .into_iter()
        .map(|(_, id)| id)
        .chain(unpositioned)
        .collect()
}
