//! Task board back-end: ordered task positioning.
//!
//! ## Overview
//!
//! Tasks are rendered in several ordered lists at once: inside their
//! project, inside their kanban column, and in the organization-wide "all
//! projects" view. Each list is a *group* keyed by
//! `(organization, context, context_id)` whose positions are always the
//! contiguous sequence `1..=N`. Dragging a task in the dashboard moves it to
//! a slot; the tasks in between shift by one.
//!
//! ## Module Map
//!
//! ```text
//! ┌─────────────────┐  HTTP   ┌───────────────────────────────────────────┐
//! │ Dashboard       │ ──────> │ server.rs  (axum Router, ServerConfig)    │
//! │  cache.rs       │ <────── │   └─ api.rs  (handlers, AppState, OrgId)  │
//! │  client.rs      │   WS    │         │                                 │
//! └─────────────────┘ <────── │ ws.rs   │ DbHandle::call (spawn_blocking) │
//!                             │         v                                 │
//!                             │ db.rs   (BoardDb, one tx per move)        │
//!                             │         │                                 │
//!                             │         v                                 │
//!                             │ reorder.rs (resolve_group, apply_move)    │
//!                             └───────────────────────────────────────────┘
//! ```
//!
//! | Module    | Responsibility                                                |
//! |-----------|---------------------------------------------------------------|
//! | `models`  | `PositionContext`, `ContextKey`, `TaskPosition`, `PositionEntry` |
//! | `reorder` | Pure shift arithmetic shared by server and client             |
//! | `db`      | SQLite schema, host CRUD, query and move operations           |
//! | `api`     | REST endpoints and error mapping                              |
//! | `ws`      | `WsMessage` broadcast feed                                    |
//! | `client`  | `PositionSource` trait + reqwest implementation               |
//! | `cache`   | `PositionCache`, the optimistic client mirror                 |
//!
//! ## Typical Request Flow (drag a card)
//!
//! 1. `PositionCache::reorder` rewrites its local group immediately.
//! 2. `PATCH /api/task-positions/update` → `api::update_position()`.
//! 3. `BoardDb::move_position` validates ownership, merges stored rows with
//!    the client's id list, applies the shift and writes the dirty rows in
//!    one transaction.
//! 4. The complete group is returned and broadcast as
//!    `WsMessage::PositionsUpdated`; the cache overwrites its guess with it.

pub mod api;
pub mod cache;
pub mod client;
pub mod db;
pub mod models;
pub mod reorder;
pub mod server;
pub mod ws;
