// rest/routes/items.rs — Item-level routes: status transitions, moves,
// retries, dequeues and the unqueued pool.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::queue::lifecycle::StatusUpdate;
use crate::queue::{ItemStatus, QueueError};
use crate::rest::error_response;
use crate::AppContext;

type RouteResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn parse_item_status(raw: &str) -> Result<ItemStatus, (StatusCode, Json<Value>)> {
    ItemStatus::parse(raw)
        .ok_or_else(|| error_response(QueueError::Validation(format!("unknown status '{raw}'"))))
}

// ─── Pool ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListUnqueuedQuery {
    pub status: Option<String>,
}

pub async fn list_unqueued(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListUnqueuedQuery>,
) -> RouteResult {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(parse_item_status(raw)?),
    };
    let items = ctx
        .queues
        .list_unqueued(status)
        .await
        .map_err(error_response)?;
    let stats = ctx.queues.unqueued_stats().await.map_err(error_response)?;
    Ok(Json(json!({ "items": items, "stats": stats })))
}

// ─── Dequeue ─────────────────────────────────────────────────────────────────

pub async fn dequeue_ticket(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> RouteResult {
    let moved = ctx.queues.dequeue_ticket(id).await.map_err(error_response)?;
    Ok(Json(json!({ "moved": moved })))
}

pub async fn dequeue_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> RouteResult {
    let moved = ctx.queues.dequeue_task(id).await.map_err(error_response)?;
    Ok(Json(json!({ "moved": moved })))
}

// ─── Items ───────────────────────────────────────────────────────────────────

pub async fn get_item(State(ctx): State<Arc<AppContext>>, Path(id): Path<i64>) -> RouteResult {
    let item = ctx.queues.get_item(id).await.map_err(error_response)?;
    Ok(Json(json!({ "item": item })))
}

pub async fn delete_item(State(ctx): State<Arc<AppContext>>, Path(id): Path<i64>) -> RouteResult {
    ctx.queues.delete_item(id).await.map_err(error_response)?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn list_events(State(ctx): State<Arc<AppContext>>, Path(id): Path<i64>) -> RouteResult {
    // 404 for unknown items, not an empty event list.
    ctx.queues.get_item(id).await.map_err(error_response)?;
    let events = ctx
        .queues
        .list_item_events(id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "events": events })))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub agent_id: Option<String>,
    pub error_message: Option<String>,
}

pub async fn update_status(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateStatusRequest>,
) -> RouteResult {
    let status = parse_item_status(&body.status)?;
    let item = ctx
        .queues
        .update_status(id, status, body.agent_id.as_deref(), body.error_message.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "item": item })))
}

pub async fn retry(State(ctx): State<Arc<AppContext>>, Path(id): Path<i64>) -> RouteResult {
    let item = ctx.queues.retry(id).await.map_err(error_response)?;
    Ok(Json(json!({ "item": item })))
}

#[derive(Deserialize)]
pub struct MoveItemRequest {
    /// Target queue; omit (or null) to return the item to the unqueued pool.
    pub target_queue_id: Option<i64>,
    pub position: Option<i64>,
    pub priority: Option<i64>,
}

pub async fn move_item(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<MoveItemRequest>,
) -> RouteResult {
    let moved = ctx
        .queues
        .move_item(id, body.target_queue_id, body.position, body.priority)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "moved": moved })))
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub position: i64,
}

pub async fn reorder_item(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<ReorderRequest>,
) -> RouteResult {
    let item = ctx
        .queues
        .reorder_item(id, body.position)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "item": item })))
}

#[derive(Deserialize)]
pub struct BatchStatusRequest {
    pub updates: Vec<StatusUpdate>,
}

/// Batch status updates report per-item outcomes; the HTTP call itself
/// succeeds even when individual entries fail.
pub async fn batch_update_status(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<BatchStatusRequest>,
) -> RouteResult {
    let results = ctx.queues.batch_update_status(body.updates).await;
    Ok(Json(json!({ "results": results })))
}
