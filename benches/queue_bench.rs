//! Criterion benchmarks for hot pure paths in the workqd daemon.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - REST request parsing (serde_json)
//!   - Queue item serialization
//!   - Status transition table lookups
//!   - Reorder planning arithmetic

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::Value;

use workqd::queue::model::{valid_transition, ItemStatus, QueueItem, WorkRef};
use workqd::queue::ordering::plan_reorder;

// ─── Request parsing ─────────────────────────────────────────────────────────

static ENQUEUE_TICKET: &str = r#"{
    "ticket_id": 42,
    "priority": 7,
    "include_tasks": true
}"#;

static BATCH_STATUS: &str = r#"{
    "updates": [
        { "item_id": 1, "status": "in_progress", "agent_id": "agent-1" },
        { "item_id": 2, "status": "completed" },
        { "item_id": 3, "status": "failed", "error_message": "build broke" }
    ]
}"#;

fn bench_request_parse(c: &mut Criterion) {
    c.bench_function("parse_enqueue_ticket", |b| {
        b.iter(|| {
            let v: Value = serde_json::from_str(black_box(ENQUEUE_TICKET)).unwrap();
            black_box(v);
        });
    });

    c.bench_function("parse_batch_status", |b| {
        b.iter(|| {
            let v: Value = serde_json::from_str(black_box(BATCH_STATUS)).unwrap();
            black_box(v);
        });
    });

    c.bench_function("serialize_queue_item", |b| {
        let item = QueueItem {
            id: 17,
            queue_id: Some(3),
            work: WorkRef::Task {
                task_id: 204,
                parent_ticket_id: 20,
            },
            position: Some(4),
            status: ItemStatus::InProgress,
            priority: 8,
            agent_id: Some("agent-7".to_string()),
            error_message: None,
            created_at: 1722470400,
            started_at: Some(1722470460),
            completed_at: None,
        };
        b.iter(|| {
            let s = serde_json::to_string(black_box(&item)).unwrap();
            black_box(s);
        });
    });
}

// ─── State machine ───────────────────────────────────────────────────────────

fn bench_transition_table(c: &mut Criterion) {
    use ItemStatus::*;
    let all = [Queued, InProgress, Completed, Failed, Cancelled, Timeout];
    c.bench_function("transition_table_full_grid", |b| {
        b.iter(|| {
            let mut allowed = 0u32;
            for from in all {
                for to in all {
                    if valid_transition(black_box(from), black_box(to)) {
                        allowed += 1;
                    }
                }
            }
            black_box(allowed);
        });
    });
}

// ─── Reorder planning ────────────────────────────────────────────────────────

fn bench_reorder_planning(c: &mut Criterion) {
    c.bench_function("plan_reorder_1k_queue", |b| {
        b.iter(|| {
            for from in (0..1000).step_by(97) {
                let plan = plan_reorder(black_box(1000), black_box(from), black_box(999 - from));
                black_box(plan);
            }
        });
    });
}

criterion_group!(
    benches,
    bench_request_parse,
    bench_transition_table,
    bench_reorder_planning
);
criterion_main!(benches);
