// rest/mod.rs — Public REST API server.
//
// Axum HTTP server, local only by default. Every queue-domain operation
// maps to one endpoint; inputs and outputs use the domain records verbatim.
//
// Endpoints (all under /api/v1):
//   GET    /health
//   GET    /queues?project_id=            POST /queues
//   GET    /queues/{id}                   PATCH /queues/{id}
//   DELETE /queues/{id}?cascade=          POST /queues/{id}/status
//   GET    /queues/{id}/items?status=     GET  /unqueued?status=
//   POST   /queues/{id}/enqueue-ticket    POST /queues/{id}/enqueue-task
//   POST   /queues/{id}/claim
//   POST   /tickets/{id}/dequeue          POST /tasks/{id}/dequeue
//   GET    /items/{id}                    DELETE /items/{id}
//   GET    /items/{id}/events             POST /items/{id}/status
//   POST   /items/{id}/retry              POST /items/{id}/move
//   POST   /items/{id}/reorder            POST /items/batch-status

pub mod routes;

use anyhow::Result;
use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::queue::QueueError;
use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(routes::health::health))
        // Queues
        .route(
            "/api/v1/queues",
            get(routes::queues::list_queues).post(routes::queues::create_queue),
        )
        .route(
            "/api/v1/queues/{id}",
            get(routes::queues::get_queue)
                .patch(routes::queues::update_queue)
                .delete(routes::queues::delete_queue),
        )
        .route("/api/v1/queues/{id}/status", post(routes::queues::set_status))
        .route("/api/v1/queues/{id}/items", get(routes::queues::list_items))
        .route(
            "/api/v1/queues/{id}/enqueue-ticket",
            post(routes::queues::enqueue_ticket),
        )
        .route(
            "/api/v1/queues/{id}/enqueue-task",
            post(routes::queues::enqueue_task),
        )
        .route("/api/v1/queues/{id}/claim", post(routes::queues::claim_next))
        // Unqueued pool
        .route("/api/v1/unqueued", get(routes::items::list_unqueued))
        // Dequeue by ticket/task id
        .route(
            "/api/v1/tickets/{id}/dequeue",
            post(routes::items::dequeue_ticket),
        )
        .route("/api/v1/tasks/{id}/dequeue", post(routes::items::dequeue_task))
        // Items
        .route(
            "/api/v1/items/{id}",
            get(routes::items::get_item).delete(routes::items::delete_item),
        )
        .route("/api/v1/items/{id}/events", get(routes::items::list_events))
        .route("/api/v1/items/{id}/status", post(routes::items::update_status))
        .route("/api/v1/items/{id}/retry", post(routes::items::retry))
        .route("/api/v1/items/{id}/move", post(routes::items::move_item))
        .route("/api/v1/items/{id}/reorder", post(routes::items::reorder_item))
        .route(
            "/api/v1/items/batch-status",
            post(routes::items::batch_update_status),
        )
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Map a domain error onto an HTTP status + JSON body carrying both the
/// human-readable message and the stable machine code.
pub(crate) fn error_response(e: QueueError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        QueueError::Validation(_) => StatusCode::BAD_REQUEST,
        QueueError::NotFound { .. } => StatusCode::NOT_FOUND,
        QueueError::InvalidTransition { .. } => StatusCode::CONFLICT,
        QueueError::CapacityExceeded { .. } => StatusCode::CONFLICT,
        QueueError::Conflict(_) => StatusCode::CONFLICT,
        QueueError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(json!({ "error": e.to_string(), "code": e.code() })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ItemStatus;

    #[test]
    fn error_mapping_covers_every_variant() {
        let cases = [
            (
                QueueError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            (
                QueueError::NotFound { kind: "queue", id: 1 },
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                QueueError::InvalidTransition {
                    from: ItemStatus::Completed,
                    to: ItemStatus::InProgress,
                },
                StatusCode::CONFLICT,
                "invalid_transition",
            ),
            (
                QueueError::CapacityExceeded { queue_id: 1, limit: 1 },
                StatusCode::CONFLICT,
                "capacity_exceeded",
            ),
            (
                QueueError::Conflict("busy".into()),
                StatusCode::CONFLICT,
                "conflict",
            ),
            (
                QueueError::StorageUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
            ),
        ];
        for (err, status, code) in cases {
            let expect = err.code();
            assert_eq!(expect, code);
            let (got_status, _) = error_response(err);
            assert_eq!(got_status, status);
        }
    }
}
