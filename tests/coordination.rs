//! Cross-module coordination properties, run against the in-memory store.

use swarm::commands::worker::{CycleOutcome, Worker};
use swarm::monitor;
use swarm::queue::{ClaimOutcome, Complexity, QueueManager, Task, TaskSpec};
use swarm::registry::{AgentKind, AgentStatus, RegistryManager};
use swarm::store::{MemStore, RetryPolicy};

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: std::time::Duration::from_millis(1),
    }
}

fn spec(id: &str) -> TaskSpec {
    TaskSpec {
        id: id.to_string(),
        title: format!("task {id}"),
        description: String::new(),
        priority: 5,
        dependencies: Vec::new(),
        required_capabilities: Vec::new(),
        estimated_complexity: Complexity::Medium,
        parent_task: None,
    }
}

#[test]
fn at_most_one_claim_under_contention() {
    let store = MemStore::new();
    let queue = QueueManager::new(&store, policy(3));
    queue.add_task(spec("contested")).unwrap();

    // Generous retry budget: the property under test is exclusivity, not
    // retry exhaustion.
    let contended = policy(50);
    let n = 8;
    let outcomes: Vec<ClaimOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = &store;
                scope.spawn(move || {
                    let queue = QueueManager::new(store, contended);
                    queue
                        .claim("contested", &format!("agent-{i}"))
                        .expect("store must not fail")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<&ClaimOutcome> = outcomes
        .iter()
        .filter(|o| matches!(o, ClaimOutcome::Claimed(_)))
        .collect();
    assert_eq!(winners.len(), 1, "exactly one claimant must win");
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::Lost))
            .count(),
        n - 1
    );

    // The queue agrees with the winner.
    let snapshot = queue.snapshot().unwrap();
    assert!(snapshot.pending.is_empty());
    assert_eq!(snapshot.in_progress.len(), 1);
    let ClaimOutcome::Claimed(won) = winners[0] else {
        unreachable!()
    };
    assert_eq!(
        snapshot.in_progress[0].claimed_by,
        won.claimed_by
    );
}

#[test]
fn tasks_are_conserved_through_a_full_fleet_story() {
    let store = MemStore::new();
    let p = policy(5);
    let registry = RegistryManager::new(&store, p);
    let queue = QueueManager::new(&store, p);
    let dir = tempfile::tempdir().unwrap();

    for i in 0..6 {
        queue.add_task(spec(&format!("t-{i}"))).unwrap();
    }

    // Worker 1 completes two tasks, fails one.
    let calls = std::cell::Cell::new(0u32);
    let flaky = |_: &Task| -> anyhow::Result<()> {
        calls.set(calls.get() + 1);
        if calls.get() == 2 {
            anyhow::bail!("transient failure")
        }
        Ok(())
    };

    let worker = Worker::new(
        "coder-1",
        AgentKind::Coder,
        Vec::new(),
        &store,
        p,
        dir.path(),
        Box::new(flaky),
    );
    worker.register().unwrap();

    let mut completed = 0;
    let mut failed = 0;
    for _ in 0..3 {
        match worker.run_cycle().unwrap() {
            CycleOutcome::Completed(_) => completed += 1,
            CycleOutcome::Failed(_) => failed += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(completed, 2);
    assert_eq!(failed, 1);

    // An expired agent strands a task; the sweep reclaims it.
    registry.register("dying", AgentKind::Coder, &[]).unwrap();
    queue.claim("t-3", "dying").unwrap();
    registry
        .set_status("dying", AgentStatus::Active, Some("t-3"))
        .unwrap();
    swarm::store::publish::<swarm::registry::Registry, _, _, _>(
        &store,
        swarm::store::REGISTRY_DOC,
        "backdate",
        p,
        |r| {
            for a in &mut r.agents {
                if a.id == "dying" {
                    a.last_heartbeat = chrono::Utc::now() - chrono::Duration::minutes(11);
                }
            }
        },
    )
    .unwrap();
    let report = monitor::sweep(&registry, &queue, chrono::Duration::minutes(10)).unwrap();
    assert_eq!(report.released_tasks, vec!["t-3"]);

    // Every task ever created is still in exactly one bucket.
    let snapshot = queue.snapshot().unwrap();
    assert_eq!(snapshot.total_tasks(), 6);
    assert_eq!(snapshot.metadata.total_tasks_created, 6);
    assert_eq!(snapshot.completed.len(), 2);
    assert_eq!(snapshot.metadata.total_tasks_completed, 2);
    assert!(snapshot.in_progress.is_empty());
    assert_eq!(snapshot.pending.len(), 4);

    // No task id appears in two buckets.
    let mut ids: Vec<&str> = snapshot
        .pending
        .iter()
        .chain(&snapshot.in_progress)
        .chain(&snapshot.completed)
        .chain(&snapshot.blocked)
        .map(|t| t.id.as_str())
        .collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before);
}

#[test]
fn released_task_is_claimable_by_another_agent() {
    let store = MemStore::new();
    let p = policy(5);
    let queue = QueueManager::new(&store, p);
    queue.add_task(spec("t-1")).unwrap();

    queue.claim("t-1", "first").unwrap();
    queue.release("t-1").unwrap();

    let ClaimOutcome::Claimed(task) = queue.claim("t-1", "second").unwrap() else {
        panic!("released task must be claimable again");
    };
    assert_eq!(task.claimed_by.as_deref(), Some("second"));
}
