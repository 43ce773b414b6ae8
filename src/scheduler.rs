//! Priority scheduler: coordinator-side reordering of the pending bucket.
//!
//! The score promotes tasks that unblock downstream work and demotes heavy
//! ones. It is scratch state, computed per pass and never persisted.

use crate::error::PublishError;
use crate::queue::{Queue, Task};
use crate::store::{self, QUEUE_DOC, RetryPolicy, VersionedStore};

/// score = priority + 2 * (pending tasks depending on this one) - weight
#[allow(clippy::cast_precision_loss)]
pub fn score(task: &Task, pending: &[Task]) -> f64 {
    let blocking_count = pending
        .iter()
        .filter(|t| t.id != task.id && t.dependencies.contains(&task.id))
        .count();
    task.priority as f64 + (blocking_count as f64) * 2.0 - task.estimated_complexity.weight()
}

/// Re-sort a queue's pending bucket descending by score. Stable: tasks
/// with equal score keep their insertion order.
pub fn reorder_pending(queue: &mut Queue) {
    if queue.pending.is_empty() {
        return;
    }
    let scores: Vec<(String, f64)> = queue
        .pending
        .iter()
        .map(|t| (t.id.clone(), score(t, &queue.pending)))
        .collect();
    let score_of = |task: &Task| {
        scores
            .iter()
            .find(|(id, _)| *id == task.id)
            .map_or(0.0, |(_, s)| *s)
    };
    queue
        .pending
        .sort_by(|a, b| score_of(b).partial_cmp(&score_of(a)).unwrap_or(std::cmp::Ordering::Equal));
}

/// Publish a reprioritized pending order through the claim protocol.
pub fn recompute_priorities(
    store: &dyn VersionedStore,
    policy: RetryPolicy,
) -> Result<(), PublishError> {
    store::publish::<Queue, _, _, _>(
        store,
        QUEUE_DOC,
        "[swarm] reprioritized pending tasks",
        policy,
        reorder_pending,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Complexity, task_fixture};

    #[test]
    fn worked_example_orders_blocker_first() {
        // T1: priority 5, medium (1.5), blocks nothing -> 3.5
        // T2: priority 5, low (1.0), blocks two tasks -> 8.0
        let mut t1 = task_fixture("t1");
        t1.estimated_complexity = Complexity::Medium;
        let mut t2 = task_fixture("t2");
        t2.estimated_complexity = Complexity::Low;
        let mut d1 = task_fixture("d1");
        d1.dependencies = vec!["t2".to_string()];
        let mut d2 = task_fixture("d2");
        d2.dependencies = vec!["t2".to_string()];

        let mut queue = Queue {
            pending: vec![t1, t2, d1, d2],
            ..Queue::default()
        };

        let s1 = score(&queue.pending[0], &queue.pending);
        let s2 = score(&queue.pending[1], &queue.pending);
        assert!((s1 - 3.5).abs() < f64::EPSILON);
        assert!((s2 - 8.0).abs() < f64::EPSILON);

        reorder_pending(&mut queue);
        assert_eq!(queue.pending[0].id, "t2");
        assert!(
            queue.pending.iter().position(|t| t.id == "t2").unwrap()
                < queue.pending.iter().position(|t| t.id == "t1").unwrap()
        );
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let a = task_fixture("a");
        let b = task_fixture("b");
        let c = task_fixture("c");
        let mut queue = Queue {
            pending: vec![a, b, c],
            ..Queue::default()
        };

        reorder_pending(&mut queue);
        let ids: Vec<&str> = queue.pending.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn a_task_does_not_count_itself_as_blocking() {
        // A self-dependency is nonsense data, but it must not inflate the
        // score.
        let mut t = task_fixture("t");
        t.dependencies = vec!["t".to_string()];
        let pending = vec![t.clone()];
        let s = score(&t, &pending);
        assert!((s - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn score_not_persisted_in_wire_format() {
        let t = task_fixture("t");
        let json = serde_json::to_value(&t).unwrap();
        assert!(json.get("score").is_none());
        assert!(json.get("_calculated_priority").is_none());
    }
}
