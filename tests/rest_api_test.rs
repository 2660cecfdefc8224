//! Integration tests for the REST surface. Spins up the axum server on a
//! random port and drives it with a real HTTP client, checking both the
//! happy paths and the error-code contract.

use serde_json::{json, Value};
use std::sync::Arc;

use workqd::config::DaemonConfig;
use workqd::rest;
use workqd::storage::Storage;
use workqd::AppContext;

/// Start a daemon REST server on a random port; returns the API base URL.
async fn start_test_server() -> (String, tempfile::TempDir, Arc<AppContext>) {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(DaemonConfig::new(
        Some(0),
        Some(dir.path().to_path_buf()),
        Some("warn".to_string()),
        None,
    ));
    let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
    let ctx = Arc::new(AppContext::new(config, storage));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = rest::build_router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (format!("http://{addr}/api/v1"), dir, ctx)
}

#[tokio::test]
async fn health_reports_ok() {
    let (base, _dir, _ctx) = start_test_server().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn queue_crud_over_rest() {
    let (base, _dir, _ctx) = start_test_server().await;
    let client = reqwest::Client::new();

    // Create.
    let resp = client
        .post(format!("{base}/queues"))
        .json(&json!({ "project_id": 1, "name": "Main", "description": "primary" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let queue_id = body["queue"]["id"].as_i64().unwrap();
    // Cap defaulted from config ([queues] default_max_parallel).
    assert_eq!(body["queue"]["max_parallel_items"], 1);

    // Read with stats.
    let body: Value = client
        .get(format!("{base}/queues/{queue_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["queue"]["name"], "Main");
    assert_eq!(body["stats"]["total_items"], 0);
    assert_eq!(body["stats"]["average_processing_secs"], Value::Null);

    // Patch.
    let body: Value = client
        .patch(format!("{base}/queues/{queue_id}"))
        .json(&json!({ "max_parallel_items": 3 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["queue"]["max_parallel_items"], 3);

    // Pause via the status endpoint.
    let body: Value = client
        .post(format!("{base}/queues/{queue_id}/status"))
        .json(&json!({ "status": "paused" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["queue"]["status"], "paused");

    // Listing includes the queue with its stats.
    let body: Value = client
        .get(format!("{base}/queues?project_id=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["queues"].as_array().unwrap().len(), 1);

    // Unknown queue is a 404 with a stable code.
    let resp = client.get(format!("{base}/queues/999")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "not_found");

    // Delete.
    let resp = client
        .delete(format!("{base}/queues/{queue_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn enqueue_claim_and_error_codes_over_rest() {
    let (base, _dir, ctx) = start_test_server().await;
    let client = reqwest::Client::new();

    // Seed the ticket mirror the way the external sync would.
    ctx.tickets.upsert_ticket(10, 1, "Ticket 10").await.unwrap();
    ctx.tickets.upsert_ticket(11, 1, "Ticket 11").await.unwrap();
    ctx.tickets.upsert_task(101, 10, "subtask").await.unwrap();

    let body: Value = client
        .post(format!("{base}/queues"))
        .json(&json!({ "project_id": 1, "name": "Main", "max_parallel_items": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let queue_id = body["queue"]["id"].as_i64().unwrap();

    // Enqueue ticket 10 with its task.
    let body: Value = client
        .post(format!("{base}/queues/{queue_id}/enqueue-ticket"))
        .json(&json!({ "ticket_id": 10, "priority": 5, "include_tasks": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["item_type"], "ticket");
    assert_eq!(items[1]["item_type"], "task");
    assert_eq!(items[1]["parent_ticket_id"], 10);

    // Enqueue a second ticket, then claim: priority decides, not position.
    let body: Value = client
        .post(format!("{base}/queues/{queue_id}/enqueue-ticket"))
        .json(&json!({ "ticket_id": 11, "priority": 9 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let urgent_id = body["items"][0]["id"].as_i64().unwrap();

    let body: Value = client
        .post(format!("{base}/queues/{queue_id}/claim"))
        .json(&json!({ "agent_id": "agent-1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["item"]["id"], urgent_id);
    assert_eq!(body["item"]["status"], "in_progress");

    // Cap filled: a direct start on another item is a 409.
    let first_item_id = items[0]["id"].as_i64().unwrap();
    let resp = client
        .post(format!("{base}/items/{first_item_id}/status"))
        .json(&json!({ "status": "in_progress", "agent_id": "agent-2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "capacity_exceeded");

    // Unknown status strings are rejected up front.
    let resp = client
        .post(format!("{base}/items/{first_item_id}/status"))
        .json(&json!({ "status": "done" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "validation_error");

    // Batch endpoint reports per-item outcomes with HTTP 200.
    let body: Value = client
        .post(format!("{base}/items/batch-status"))
        .json(&json!({ "updates": [
            { "item_id": urgent_id, "status": "completed" },
            { "item_id": 9999, "status": "cancelled" }
        ]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["ok"], true);
    assert_eq!(results[1]["ok"], false);
    assert_eq!(results[1]["error"]["code"], "not_found");

    // Dequeue returns the ticket and its task to the pool.
    let body: Value = client
        .post(format!("{base}/tickets/10/dequeue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["moved"].as_array().unwrap().len(), 2);

    let body: Value = client
        .get(format!("{base}/unqueued"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["stats"]["queued_items"], 2);

    // Event trail for the claimed item.
    let body: Value = client
        .get(format!("{base}/items/{urgent_id}/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kinds: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["enqueued", "claimed", "status_changed"]);
}

#[tokio::test]
async fn move_and_reorder_over_rest() {
    let (base, _dir, ctx) = start_test_server().await;
    let client = reqwest::Client::new();
    for id in [1, 2, 3] {
        ctx.tickets.upsert_ticket(id, 1, "t").await.unwrap();
    }

    let qa: Value = client
        .post(format!("{base}/queues"))
        .json(&json!({ "project_id": 1, "name": "A" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let qb: Value = client
        .post(format!("{base}/queues"))
        .json(&json!({ "project_id": 1, "name": "B" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let (qa_id, qb_id) = (qa["queue"]["id"].as_i64().unwrap(), qb["queue"]["id"].as_i64().unwrap());

    let mut item_ids = Vec::new();
    for ticket in [1, 2, 3] {
        let body: Value = client
            .post(format!("{base}/queues/{qa_id}/enqueue-ticket"))
            .json(&json!({ "ticket_id": ticket }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        item_ids.push(body["items"][0]["id"].as_i64().unwrap());
    }

    // Reorder the last item to the front.
    let body: Value = client
        .post(format!("{base}/items/{}/reorder", item_ids[2]))
        .json(&json!({ "position": 0 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["item"]["position"], 0);

    // Move it to queue B.
    let body: Value = client
        .post(format!("{base}/items/{}/move", item_ids[2]))
        .json(&json!({ "target_queue_id": qb_id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["moved"][0]["queue_id"], qb_id);
    assert_eq!(body["moved"][0]["position"], 0);

    // Source queue positions closed back up.
    let body: Value = client
        .get(format!("{base}/queues/{qa_id}/items"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let positions: Vec<i64> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["position"].as_i64().unwrap())
        .collect();
    assert_eq!(positions, vec![0, 1]);
}
