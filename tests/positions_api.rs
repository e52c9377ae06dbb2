//! End-to-end tests: a real server on a loopback port, driven through the
//! HTTP client and the optimistic position cache.

use std::sync::Arc;

use taskboard::board::api::AppState;
use taskboard::board::cache::PositionCache;
use taskboard::board::client::{HttpPositionClient, PositionSource};
use taskboard::board::db::{BoardDb, DbHandle, NewTask};
use taskboard::board::models::{ContextKey, MoveRequest, PositionContext, TaskPosition};
use taskboard::board::server::build_router;
use taskboard::errors::PositionError;
use tokio::sync::broadcast;

struct Board {
    base_url: String,
    db: DbHandle,
    org: i64,
    project: i64,
    tasks: Vec<i64>,
}

async fn start_board(task_count: usize) -> Board {
    let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
    let (org, project, tasks) = {
        let guard = db.lock_sync().unwrap();
        let org = guard.create_organization("acme").unwrap().id;
        let project = guard.create_project(org, "web").unwrap().id;
        let tasks = (0..task_count)
            .map(|i| {
                guard
                    .create_task(
                        org,
                        &NewTask {
                            title: format!("Task {}", i + 1),
                            project_id: Some(project),
                            ..Default::default()
                        },
                    )
                    .unwrap()
                    .id
            })
            .collect();
        (org, project, tasks)
    };

    let (ws_tx, _) = broadcast::channel(64);
    let app = build_router(Arc::new(AppState {
        db: db.clone(),
        ws_tx,
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Board {
        base_url: format!("http://{}", addr),
        db,
        org,
        project,
        tasks,
    }
}

fn pairs(positions: &[TaskPosition]) -> Vec<(i64, i32)> {
    positions.iter().map(|p| (p.task_id, p.position)).collect()
}

#[tokio::test]
async fn move_last_task_up_shifts_the_middle() {
    let board = start_board(4).await;
    let t = &board.tasks;
    let client = HttpPositionClient::new(&board.base_url, board.org);
    let key = ContextKey::project(board.project);

    let seed = MoveRequest {
        task_id: t[0],
        context: PositionContext::Project,
        context_id: Some(board.project),
        position: 1,
        task_ids: t.clone(),
    };
    client.move_position(&seed).await.unwrap();

    let outcome = client
        .move_position(&MoveRequest {
            task_id: t[3],
            position: 2,
            ..seed.clone()
        })
        .await
        .unwrap();
    assert_eq!(
        pairs(&outcome.positions),
        vec![(t[0], 1), (t[3], 2), (t[1], 3), (t[2], 4)]
    );

    let listed = client.fetch_positions(&key).await.unwrap();
    assert_eq!(pairs(&listed), pairs(&outcome.positions));
}

#[tokio::test]
async fn cache_reorder_round_trips_through_http() {
    let board = start_board(3).await;
    let t = board.tasks.clone();
    let client = HttpPositionClient::new(&board.base_url, board.org);
    let key = ContextKey::all_projects();
    let mut cache = PositionCache::new();

    cache.ensure_loaded(&client, &key).await.unwrap();
    assert!(cache.positions(&key).is_empty());

    // Nothing stored yet: the server synthesizes 1..3 by id, then moves.
    let outcome = cache.reorder(&client, &key, &t, t[2], 1).await.unwrap();
    assert_eq!(pairs(&outcome.positions), vec![(t[2], 1), (t[0], 2), (t[1], 3)]);
    assert_eq!(pairs(&cache.positions(&key)), pairs(&outcome.positions));

    let sorted = cache.sorted_tasks(t.clone(), &key, |id| *id);
    assert_eq!(sorted, vec![t[2], t[0], t[1]]);
}

#[tokio::test]
async fn clamped_target_lands_on_last_slot() {
    let board = start_board(3).await;
    let t = board.tasks.clone();
    let client = HttpPositionClient::new(&board.base_url, board.org);
    let key = ContextKey::project(board.project);
    let mut cache = PositionCache::new();

    let outcome = cache.reorder(&client, &key, &t, t[0], 40).await.unwrap();
    assert_eq!(pairs(&outcome.positions), vec![(t[1], 1), (t[2], 2), (t[0], 3)]);
}

#[tokio::test]
async fn foreign_organization_gets_not_found_and_cache_resyncs() {
    let board = start_board(2).await;
    let t = board.tasks.clone();
    let other_org = {
        let guard = board.db.lock_sync().unwrap();
        guard.create_organization("globex").unwrap().id
    };
    let intruder = HttpPositionClient::new(&board.base_url, other_org);
    let mut cache = PositionCache::new();

    let err = cache
        .reorder(&intruder, &ContextKey::all_projects(), &t, t[1], 1)
        .await
        .unwrap_err();
    assert!(matches!(err, PositionError::NotFound(_)));
    // Resync read the (empty) group of the other organization.
    assert!(cache.positions(&ContextKey::all_projects()).is_empty());
    assert!(cache.is_loaded(&ContextKey::all_projects()));
}

#[tokio::test]
async fn validation_errors_come_back_typed() {
    let board = start_board(1).await;
    let client = HttpPositionClient::new(&board.base_url, board.org);
    let err = client
        .move_position(&MoveRequest {
            task_id: board.tasks[0],
            context: PositionContext::KanbanStatus,
            context_id: None,
            position: 1,
            task_ids: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PositionError::Validation(_)));
}

#[tokio::test]
async fn no_op_move_writes_nothing() {
    let board = start_board(2).await;
    let t = board.tasks.clone();
    let client = HttpPositionClient::new(&board.base_url, board.org);
    let req = MoveRequest {
        task_id: t[1],
        context: PositionContext::Project,
        context_id: Some(board.project),
        position: 2,
        task_ids: t.clone(),
    };
    let first = client.move_position(&req).await.unwrap();
    assert_eq!(first.written, 2);

    let second = client.move_position(&req).await.unwrap();
    assert_eq!(second.written, 0);
    assert_eq!(pairs(&second.positions), pairs(&first.positions));
}
