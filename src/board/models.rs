use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PositionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub created_at: String,
}

/// A configurable kanban column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub organization_id: i64,
    pub project_id: Option<i64>,
    pub status_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Which ordered list a position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionContext {
    Project,
    AllProjects,
    KanbanStatus,
}

impl PositionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::AllProjects => "all_projects",
            Self::KanbanStatus => "kanban_status",
        }
    }

    /// Whether groups of this context are further scoped by a context id.
    pub fn requires_id(&self) -> bool {
        !matches!(self, Self::AllProjects)
    }
}

impl fmt::Display for PositionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionContext {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "all_projects" => Ok(Self::AllProjects),
            "kanban_status" => Ok(Self::KanbanStatus),
            _ => Err(PositionError::Validation(format!(
                "Invalid context '{}'. Valid values: project, all_projects, kanban_status",
                s
            ))),
        }
    }
}

/// Identifies one ordered group inside an organization.
///
/// Construction goes through [`ContextKey::new`], which enforces the
/// context/context-id pairing, so a `ContextKey` in hand is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    context: PositionContext,
    context_id: Option<i64>,
}

impl ContextKey {
    pub fn new(context: PositionContext, context_id: Option<i64>) -> Result<Self, PositionError> {
        match (context.requires_id(), context_id) {
            (true, None) => Err(PositionError::Validation(format!(
                "context_id is required for context '{}'",
                context
            ))),
            (false, Some(_)) => Err(PositionError::Validation(format!(
                "context_id must be absent for context '{}'",
                context
            ))),
            _ => Ok(Self {
                context,
                context_id,
            }),
        }
    }

    pub fn all_projects() -> Self {
        Self {
            context: PositionContext::AllProjects,
            context_id: None,
        }
    }

    pub fn project(project_id: i64) -> Self {
        Self {
            context: PositionContext::Project,
            context_id: Some(project_id),
        }
    }

    pub fn kanban_status(status_id: i64) -> Self {
        Self {
            context: PositionContext::KanbanStatus,
            context_id: Some(status_id),
        }
    }

    pub fn context(&self) -> PositionContext {
        self.context
    }

    pub fn context_id(&self) -> Option<i64> {
        self.context_id
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context_id {
            Some(id) => write!(f, "{}:{}", self.context, id),
            None => write!(f, "{}", self.context),
        }
    }
}

/// One `{task_id, position}` pair as exchanged over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPosition {
    pub task_id: i64,
    pub position: i32,
}

/// A group member before reordering math runs.
///
/// `Stored` rows came from the database (`row_id` is the primary key and
/// `stored` the position currently on disk); `Derived` rows were synthesized
/// from the client's id list and have no row yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionEntry {
    Stored {
        row_id: i64,
        task_id: i64,
        stored: i32,
        position: i32,
    },
    Derived {
        task_id: i64,
        position: i32,
    },
}

impl PositionEntry {
    pub fn task_id(&self) -> i64 {
        match self {
            Self::Stored { task_id, .. } | Self::Derived { task_id, .. } => *task_id,
        }
    }

    pub fn position(&self) -> i32 {
        match self {
            Self::Stored { position, .. } | Self::Derived { position, .. } => *position,
        }
    }

    pub fn set_position(&mut self, new_position: i32) {
        match self {
            Self::Stored { position, .. } | Self::Derived { position, .. } => {
                *position = new_position
            }
        }
    }

    /// True when persisting this entry requires a write.
    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Stored {
                stored, position, ..
            } => stored != position,
            Self::Derived { .. } => true,
        }
    }

    pub fn as_pair(&self) -> TaskPosition {
        TaskPosition {
            task_id: self.task_id(),
            position: self.position(),
        }
    }
}

/// A "move task to position N" request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub task_id: i64,
    pub context: PositionContext,
    #[serde(default)]
    pub context_id: Option<i64>,
    pub position: i32,
    #[serde(default)]
    pub task_ids: Vec<i64>,
}

impl MoveRequest {
    /// Reject malformed requests before any store access.
    pub fn validate(&self) -> Result<ContextKey, PositionError> {
        if self.position < 1 {
            return Err(PositionError::Validation(format!(
                "position must be a positive integer, got {}",
                self.position
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for id in &self.task_ids {
            if !seen.insert(*id) {
                return Err(PositionError::Validation(format!(
                    "task_ids contains duplicate id {}",
                    id
                )));
            }
        }
        ContextKey::new(self.context, self.context_id)
    }
}

/// Result of a move: the whole group after the move plus how many rows were written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub positions: Vec<TaskPosition>,
    #[serde(default)]
    pub written: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_round_trips_through_str() {
        for ctx in [
            PositionContext::Project,
            PositionContext::AllProjects,
            PositionContext::KanbanStatus,
        ] {
            assert_eq!(ctx.as_str().parse::<PositionContext>().unwrap(), ctx);
        }
    }

    #[test]
    fn test_context_from_str_invalid() {
        let err = "board".parse::<PositionContext>().unwrap_err();
        assert!(matches!(err, PositionError::Validation(_)));
        assert!(err.to_string().contains("Invalid context"));
    }

    #[test]
    fn test_context_key_requires_id_for_project() {
        assert!(ContextKey::new(PositionContext::Project, None).is_err());
        assert!(ContextKey::new(PositionContext::KanbanStatus, None).is_err());
        assert!(ContextKey::new(PositionContext::Project, Some(3)).is_ok());
    }

    #[test]
    fn test_context_key_rejects_id_for_all_projects() {
        assert!(ContextKey::new(PositionContext::AllProjects, Some(1)).is_err());
        assert_eq!(
            ContextKey::new(PositionContext::AllProjects, None).unwrap(),
            ContextKey::all_projects()
        );
    }

    #[test]
    fn test_context_serializes_snake_case() {
        let json = serde_json::to_string(&PositionContext::KanbanStatus).unwrap();
        assert_eq!(json, "\"kanban_status\"");
    }

    #[test]
    fn test_move_request_rejects_non_positive_position() {
        let req = MoveRequest {
            task_id: 1,
            context: PositionContext::AllProjects,
            context_id: None,
            position: 0,
            task_ids: vec![],
        };
        assert!(matches!(req.validate(), Err(PositionError::Validation(_))));
    }

    #[test]
    fn test_move_request_rejects_duplicate_ids() {
        let req = MoveRequest {
            task_id: 1,
            context: PositionContext::AllProjects,
            context_id: None,
            position: 1,
            task_ids: vec![1, 2, 1],
        };
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_entry_dirty_tracking() {
        let mut entry = PositionEntry::Stored {
            row_id: 9,
            task_id: 1,
            stored: 2,
            position: 2,
        };
        assert!(!entry.is_dirty());
        entry.set_position(3);
        assert!(entry.is_dirty());
        assert!(PositionEntry::Derived { task_id: 4, position: 1 }.is_dirty());
    }
}
