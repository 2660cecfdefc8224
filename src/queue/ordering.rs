//! Placement/ordering engine: position assignment, gap open/close and
//! single-item reorders.
//!
//! Positions are 0-based, unique and contiguous per queue. The pure
//! [`plan_reorder`] computation is separated from the SQL that applies it so
//! the renumbering arithmetic can be tested (and property-tested) without a
//! database. All SQL helpers expect to run inside the caller's transaction.

use sqlx::SqliteConnection;

use super::error::QueueError;

// ─── Pure planning ───────────────────────────────────────────────────────────

/// A planned reorder of one item within a queue of `len` items.
///
/// Rows with `shift_lo <= position <= shift_hi` (the moved item excluded)
/// shift by `delta`, then the moved item lands on `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderPlan {
    pub shift_lo: i64,
    pub shift_hi: i64,
    pub delta: i64,
    pub target: i64,
}

/// Compute the shifts for moving the item at `from` to index `to` in a queue
/// of `len` items. `to` is clamped to the valid range. Returns `None` when
/// the move is a no-op.
pub fn plan_reorder(len: i64, from: i64, to: i64) -> Option<ReorderPlan> {
    if len <= 1 || from < 0 || from >= len {
        return None;
    }
    let to = to.clamp(0, len - 1);
    if to == from {
        return None;
    }
    if to < from {
        // Moving toward the front: intervening items shift one slot back.
        Some(ReorderPlan {
            shift_lo: to,
            shift_hi: from - 1,
            delta: 1,
            target: to,
        })
    } else {
        // Moving toward the back: intervening items shift one slot forward.
        Some(ReorderPlan {
            shift_lo: from + 1,
            shift_hi: to,
            delta: -1,
            target: to,
        })
    }
}

// ─── SQL helpers (transaction scope only) ────────────────────────────────────

/// Next append position in `queue_id`: max(position) + 1, or 0 when empty.
pub(crate) async fn next_position(
    conn: &mut SqliteConnection,
    queue_id: i64,
) -> Result<i64, QueueError> {
    let next: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM queue_items WHERE queue_id = ?",
    )
    .bind(queue_id)
    .fetch_one(conn)
    .await?;
    Ok(next)
}

/// Number of items currently placed in `queue_id`.
pub(crate) async fn queue_len(
    conn: &mut SqliteConnection,
    queue_id: i64,
) -> Result<i64, QueueError> {
    let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE queue_id = ?")
        .bind(queue_id)
        .fetch_one(conn)
        .await?;
    Ok(len)
}

/// Close the hole left at `removed_pos` after taking an item out of
/// `queue_id`: every later position decrements by one.
pub(crate) async fn close_gap(
    conn: &mut SqliteConnection,
    queue_id: i64,
    removed_pos: i64,
) -> Result<(), QueueError> {
    sqlx::query("UPDATE queue_items SET position = position - 1 WHERE queue_id = ? AND position > ?")
        .bind(queue_id)
        .bind(removed_pos)
        .execute(conn)
        .await?;
    Ok(())
}

/// Open `width` slots at `at` in `queue_id`: positions >= `at` shift up.
pub(crate) async fn open_gap(
    conn: &mut SqliteConnection,
    queue_id: i64,
    at: i64,
    width: i64,
) -> Result<(), QueueError> {
    sqlx::query("UPDATE queue_items SET position = position + ? WHERE queue_id = ? AND position >= ?")
        .bind(width)
        .bind(queue_id)
        .bind(at)
        .execute(conn)
        .await?;
    Ok(())
}

/// Apply a [`ReorderPlan`] for `item_id` inside `queue_id`.
pub(crate) async fn apply_reorder(
    conn: &mut SqliteConnection,
    queue_id: i64,
    item_id: i64,
    plan: ReorderPlan,
) -> Result<(), QueueError> {
    sqlx::query(
        "UPDATE queue_items SET position = position + ?
         WHERE queue_id = ? AND id != ? AND position BETWEEN ? AND ?",
    )
    .bind(plan.delta)
    .bind(queue_id)
    .bind(item_id)
    .bind(plan.shift_lo)
    .bind(plan.shift_hi)
    .execute(&mut *conn)
    .await?;
    sqlx::query("UPDATE queue_items SET position = ? WHERE id = ?")
        .bind(plan.target)
        .bind(item_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Apply a plan to an in-memory position vector the way the SQL does.
    fn apply(positions: &mut [i64], moved_idx: usize, plan: ReorderPlan) {
        for (i, p) in positions.iter_mut().enumerate() {
            if i != moved_idx && *p >= plan.shift_lo && *p <= plan.shift_hi {
                *p += plan.delta;
            }
        }
        positions[moved_idx] = plan.target;
    }

    #[test]
    fn move_toward_front_shifts_intervening_up() {
        // Positions [0,1,2,3,4], move item at 2 to 0.
        let plan = plan_reorder(5, 2, 0).unwrap();
        assert_eq!(
            plan,
            ReorderPlan {
                shift_lo: 0,
                shift_hi: 1,
                delta: 1,
                target: 0
            }
        );
        let mut pos = vec![0, 1, 2, 3, 4];
        apply(&mut pos, 2, plan);
        assert_eq!(pos, vec![1, 2, 0, 3, 4]);
    }

    #[test]
    fn move_toward_back_shifts_intervening_down() {
        let plan = plan_reorder(5, 1, 3).unwrap();
        assert_eq!(
            plan,
            ReorderPlan {
                shift_lo: 2,
                shift_hi: 3,
                delta: -1,
                target: 3
            }
        );
        let mut pos = vec![0, 1, 2, 3, 4];
        apply(&mut pos, 1, plan);
        assert_eq!(pos, vec![0, 3, 1, 2, 4]);
    }

    #[test]
    fn noop_and_out_of_range_moves_plan_nothing() {
        assert_eq!(plan_reorder(5, 2, 2), None);
        assert_eq!(plan_reorder(1, 0, 0), None);
        assert_eq!(plan_reorder(0, 0, 3), None);
        assert_eq!(plan_reorder(5, 7, 0), None);
    }

    #[test]
    fn target_is_clamped_to_queue_bounds() {
        let plan = plan_reorder(3, 0, 99).unwrap();
        assert_eq!(plan.target, 2);
        let plan = plan_reorder(3, 2, -5).unwrap();
        assert_eq!(plan.target, 0);
    }

    proptest! {
        /// After any reorder, positions stay a permutation of 0..len and the
        /// moved item sits at the clamped target.
        #[test]
        fn reorder_keeps_positions_contiguous(len in 1i64..64, from in 0i64..64, to in -8i64..96) {
            let from = from % len;
            let mut pos: Vec<i64> = (0..len).collect();
            if let Some(plan) = plan_reorder(len, from, to) {
                apply(&mut pos, from as usize, plan);
                prop_assert_eq!(pos[from as usize], to.clamp(0, len - 1));
            }
            let mut sorted = pos.clone();
            sorted.sort_unstable();
            let expect: Vec<i64> = (0..len).collect();
            prop_assert_eq!(sorted, expect);
        }
    }
}
