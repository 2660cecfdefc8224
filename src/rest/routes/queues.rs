// rest/routes/queues.rs — Queue registry + per-queue item routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::queue::registry::QueuePatch;
use crate::queue::{ItemStatus, QueueError, QueueStatus};
use crate::rest::error_response;
use crate::AppContext;

type RouteResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn parse_item_status(s: Option<&str>) -> Result<Option<ItemStatus>, (StatusCode, Json<Value>)> {
    match s {
        None => Ok(None),
        Some(raw) => ItemStatus::parse(raw).map(Some).ok_or_else(|| {
            error_response(QueueError::Validation(format!("unknown status '{raw}'")))
        }),
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListQueuesQuery {
    pub project_id: i64,
}

pub async fn list_queues(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListQueuesQuery>,
) -> RouteResult {
    let queues = ctx
        .queues
        .list_queues_with_stats(query.project_id)
        .await
        .map_err(error_response)?;
    let list: Vec<Value> = queues
        .into_iter()
        .map(|(queue, stats)| json!({ "queue": queue, "stats": stats }))
        .collect();
    Ok(Json(json!({ "queues": list })))
}

#[derive(Deserialize)]
pub struct CreateQueueRequest {
    pub project_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub max_parallel_items: Option<i64>,
}

pub async fn create_queue(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateQueueRequest>,
) -> RouteResult {
    let cap = body
        .max_parallel_items
        .unwrap_or(ctx.config.queues.default_max_parallel);
    let queue = ctx
        .queues
        .create_queue(body.project_id, &body.name, body.description.as_deref(), cap)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "queue": queue })))
}

pub async fn get_queue(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> RouteResult {
    let queue = ctx.queues.get_queue(id).await.map_err(error_response)?;
    let stats = ctx.queues.queue_stats(id).await.map_err(error_response)?;
    Ok(Json(json!({ "queue": queue, "stats": stats })))
}

#[derive(Deserialize)]
pub struct UpdateQueueRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_parallel_items: Option<i64>,
    pub status: Option<String>,
}

pub async fn update_queue(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateQueueRequest>,
) -> RouteResult {
    let status = match body.status.as_deref() {
        None => None,
        Some(raw) => Some(QueueStatus::parse(raw).ok_or_else(|| {
            error_response(QueueError::Validation(format!("unknown queue status '{raw}'")))
        })?),
    };
    let queue = ctx
        .queues
        .update_queue(
            id,
            QueuePatch {
                name: body.name,
                description: body.description,
                max_parallel_items: body.max_parallel_items,
                status,
            },
        )
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "queue": queue })))
}

#[derive(Deserialize)]
pub struct DeleteQueueQuery {
    #[serde(default)]
    pub cascade: bool,
}

pub async fn delete_queue(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteQueueQuery>,
) -> RouteResult {
    ctx.queues
        .delete_queue(id, query.cascade)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

pub async fn set_status(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<SetStatusRequest>,
) -> RouteResult {
    let status = QueueStatus::parse(&body.status).ok_or_else(|| {
        error_response(QueueError::Validation(format!(
            "unknown queue status '{}'",
            body.status
        )))
    })?;
    let queue = ctx
        .queues
        .set_queue_status(id, status)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "queue": queue })))
}

// ─── Items within a queue ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListItemsQuery {
    pub status: Option<String>,
}

pub async fn list_items(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Query(query): Query<ListItemsQuery>,
) -> RouteResult {
    let status = parse_item_status(query.status.as_deref())?;
    let items = ctx
        .queues
        .queue_items_checked(id, status)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
pub struct EnqueueTicketRequest {
    pub ticket_id: i64,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub include_tasks: bool,
}

pub async fn enqueue_ticket(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<EnqueueTicketRequest>,
) -> RouteResult {
    let items = ctx
        .queues
        .enqueue_ticket(body.ticket_id, id, body.priority, body.include_tasks)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
pub struct EnqueueTaskRequest {
    pub task_id: i64,
    #[serde(default)]
    pub priority: i64,
}

pub async fn enqueue_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<EnqueueTaskRequest>,
) -> RouteResult {
    let item = ctx
        .queues
        .enqueue_task(body.task_id, id, body.priority)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "item": item })))
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub agent_id: String,
}

pub async fn claim_next(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<ClaimRequest>,
) -> RouteResult {
    let item = ctx
        .queues
        .claim_next(id, &body.agent_id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "item": item })))
}
