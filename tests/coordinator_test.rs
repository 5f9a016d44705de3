/*!
 * Coordinator Tests
 * Ordering, task accounting, nested submission and failure isolation
 */

use pretty_assertions::assert_eq;
use process_coordinator::{
    CoordinatorConfig, CoordinatorError, GroupId, ManagerError, ManagerLayout, ProcessCoordinator,
    Submission, TaskFailure, TaskFunction, TaskIdentifier,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use serial_test::serial;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn config(workers: usize) -> CoordinatorConfig {
    CoordinatorConfig::new()
        .with_workers(workers)
        .with_idle_interval(Duration::from_millis(1))
}

/// Returns its own index after sleeping `sleep_ms`
fn index_after_sleep() -> TaskFunction {
    TaskFunction::new("index_after_sleep", |ctx, kwargs| {
        let sleep = kwargs.get("sleep_ms").and_then(Value::as_u64).unwrap_or(0);
        thread::sleep(Duration::from_millis(sleep));
        Ok(json!(ctx.identifier().index))
    })
}

fn indexes(outputs: Vec<Result<Value, TaskFailure>>) -> Vec<u64> {
    outputs
        .into_iter()
        .map(|output| output.unwrap().as_u64().unwrap())
        .collect()
}

#[test]
fn test_order_preserved_when_later_tasks_finish_first() {
    let coordinator = ProcessCoordinator::new(config(4)).unwrap();
    let n = 12u64;
    let submission = Submission::new(n as usize, index_after_sleep())
        .different("sleep_ms", (0..n).map(|i| (n - i) * 3));

    let id = coordinator.submit_tasks(submission).unwrap().unwrap();
    let outputs = coordinator.give(&id).unwrap();
    assert_eq!(indexes(outputs), (0..n).collect::<Vec<_>>());
}

#[test]
fn test_order_preserved_with_random_sleeps() {
    let mut rng = StdRng::seed_from_u64(7);
    let sleeps: Vec<u64> = (0..40).map(|_| rng.gen_range(0..8)).collect();

    let coordinator = ProcessCoordinator::new(
        config(4).with_managers(ManagerLayout::split(2, 3).unwrap()),
    )
    .unwrap();
    let id = coordinator
        .submit_tasks(Submission::new(40, index_after_sleep()).different("sleep_ms", sleeps))
        .unwrap()
        .unwrap();

    assert_eq!(indexes(coordinator.give(&id).unwrap()), (0..40).collect::<Vec<_>>());
}

#[test]
fn test_no_task_loss_across_layouts() {
    let layouts = [(0, 1), (1, 1), (4, 3), (2, 5), (3, 2)];
    let sizes = [1usize, 7, 23, 101];

    for (stacks, sorters) in layouts {
        let layout = ManagerLayout::split(stacks, sorters).unwrap();
        let coordinator = ProcessCoordinator::new(config(3).with_managers(layout)).unwrap();

        let ids: Vec<TaskIdentifier> = sizes
            .iter()
            .map(|&n| {
                coordinator
                    .submit_tasks(Submission::new(n, index_after_sleep()))
                    .unwrap()
                    .unwrap()
            })
            .collect();

        for (id, &n) in ids.iter().zip(&sizes) {
            let got = indexes(coordinator.give(id).unwrap());
            assert_eq!(got.len(), n, "layout ({}, {}) size {}", stacks, sorters, n);
            let unique: BTreeSet<u64> = got.into_iter().collect();
            assert_eq!(unique, (0..n as u64).collect::<BTreeSet<_>>());
        }
        coordinator.exit().unwrap();
    }
}

fn sum_of_inner() -> TaskFunction {
    TaskFunction::new("sum_of_inner", |ctx, kwargs| {
        let base = kwargs["base"].as_u64().unwrap_or_default();
        let coordinator = ctx.coordinator();
        let id = coordinator
            .submit_tasks(Submission::new(5, index_after_sleep()).same("sleep_ms", 2))?
            .ok_or_else(|| TaskFailure::new("Coordinator", "missing identifier"))?;

        let mut total = base;
        for output in coordinator.give(&id)? {
            total += output?.as_u64().unwrap_or_default();
        }
        Ok(json!(total))
    })
}

#[test]
fn test_nested_submission_with_minimal_pool() {
    let coordinator = ProcessCoordinator::new(config(2)).unwrap();
    let id = coordinator
        .submit_tasks(Submission::new(3, sum_of_inner()).different("base", [0, 100, 200]))
        .unwrap()
        .unwrap();

    // Each inner group sums 0..5 = 10
    let outputs: Vec<Value> = coordinator
        .give(&id)
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(outputs, vec![json!(10), json!(110), json!(210)]);
}

fn tree() -> TaskFunction {
    TaskFunction::new("tree", |ctx, kwargs| {
        let depth = kwargs["depth"].as_u64().unwrap_or_default();
        if depth == 0 {
            return Ok(json!(1));
        }
        let id = ctx
            .coordinator()
            .submit_tasks(Submission::new(2, tree()).same("depth", depth - 1))?
            .ok_or_else(|| TaskFailure::new("Coordinator", "missing identifier"))?;
        let mut leaves = 0;
        for output in ctx.coordinator().give(&id)? {
            leaves += output?.as_u64().unwrap_or_default();
        }
        Ok(json!(leaves))
    })
}

#[test]
fn test_deep_nesting_makes_progress() {
    for workers in [1, 2] {
        let coordinator = ProcessCoordinator::new(config(workers)).unwrap();
        let id = coordinator
            .submit_tasks(Submission::new(1, tree()).same("depth", 4))
            .unwrap()
            .unwrap();
        assert_eq!(coordinator.give(&id).unwrap(), vec![Ok(json!(16))]);
    }
}

#[test]
fn test_task_failures_are_isolated() {
    let flaky = TaskFunction::new("flaky", |ctx, _| match ctx.identifier().index {
        3 => Err(anyhow::anyhow!("index three rejected")),
        5 => panic!("index five exploded"),
        6 => Err(TaskFailure::new("ValueError", "bad value").into()),
        index => Ok(json!(index)),
    });

    let coordinator = ProcessCoordinator::new(config(3)).unwrap();
    let id = coordinator.submit_tasks(Submission::new(8, flaky)).unwrap().unwrap();
    let outputs = coordinator.give(&id).unwrap();

    assert_eq!(outputs.len(), 8);
    assert_eq!(
        outputs[3].as_ref().unwrap_err().to_string(),
        "Exception: Error: index three rejected"
    );
    assert_eq!(
        outputs[5].as_ref().unwrap_err().to_string(),
        "Exception: Panic: index five exploded"
    );
    assert_eq!(
        outputs[6].as_ref().unwrap_err(),
        &TaskFailure::new("ValueError", "bad value")
    );
    assert_eq!(outputs[7], Ok(json!(7)));

    let stats = coordinator.stats();
    assert_eq!(stats.tasks_failed, 3);
    assert_eq!(stats.tasks_completed, 5);

    // The pool survives and keeps serving
    let id = coordinator
        .submit_tasks(Submission::new(2, index_after_sleep()))
        .unwrap()
        .unwrap();
    assert_eq!(indexes(coordinator.give(&id).unwrap()), vec![0, 1]);
}

#[test]
fn test_fire_and_forget_drains_to_idle() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let bump = TaskFunction::new("bump", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });

    let coordinator = ProcessCoordinator::new(config(3)).unwrap();
    let handle = coordinator.handle();
    let id = coordinator
        .submit_tasks(Submission::new(10, bump).fire_and_forget())
        .unwrap();
    assert!(id.is_none());

    let deadline = Instant::now() + Duration::from_secs(10);
    while ran.load(Ordering::SeqCst) < 10 || !handle.is_idle() {
        assert!(Instant::now() < deadline, "fire-and-forget tasks did not finish");
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(handle.pending_tasks(), 0);
    assert_eq!(handle.outstanding_groups(), 0);
}

#[test]
fn test_second_give_is_rejected() {
    let coordinator = ProcessCoordinator::new(config(2)).unwrap();
    let id = coordinator
        .submit_tasks(Submission::new(3, index_after_sleep()))
        .unwrap()
        .unwrap();

    assert_eq!(coordinator.give(&id).unwrap().len(), 3);
    assert!(matches!(
        coordinator.give(&id),
        Err(CoordinatorError::Manager(ManagerError::AlreadyRetrieved(g))) if g == id.group_id.0
    ));
}

#[test]
fn test_give_on_unknown_group() {
    let coordinator = ProcessCoordinator::new(config(1)).unwrap();
    let forged = TaskIdentifier::new(GroupId(9999), 0, 1);
    assert!(matches!(
        coordinator.give(&forged),
        Err(CoordinatorError::Manager(ManagerError::UnknownGroup(9999)))
    ));
}

#[test]
fn test_split_kwargs_hand_out_chunks() {
    let length = TaskFunction::new("chunk", |_, kwargs| Ok(kwargs["rows"].clone()));
    let coordinator = ProcessCoordinator::new(config(2)).unwrap();
    let id = coordinator
        .submit_tasks(Submission::new(3, length).different("rows", 0..7).split_kwargs())
        .unwrap()
        .unwrap();

    let chunks: Vec<Value> = coordinator
        .give(&id)
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(chunks, vec![json!([0, 1, 2]), json!([3, 4]), json!([5, 6])]);
}

#[test]
fn test_empty_group_returns_nothing() {
    let coordinator = ProcessCoordinator::new(config(2)).unwrap();
    let id = coordinator
        .submit_tasks(Submission::new(0, index_after_sleep()))
        .unwrap()
        .unwrap();
    assert!(coordinator.give(&id).unwrap().is_empty());
    assert!(coordinator.handle().is_idle());
}

#[test]
fn test_invalid_submission_is_rejected() {
    let coordinator = ProcessCoordinator::new(config(1)).unwrap();
    let result = coordinator.submit_tasks(Submission::new(3, index_after_sleep()).different("sleep_ms", [1, 2]));
    assert!(matches!(
        result,
        Err(CoordinatorError::Manager(ManagerError::InvalidSubmission(_)))
    ));
}

#[test]
fn test_table_capacity_exhaustion() {
    let coordinator = ProcessCoordinator::new(
        CoordinatorConfig::single_threaded().with_table_capacity(2),
    )
    .unwrap();

    let first = coordinator
        .submit_tasks(Submission::new(1, index_after_sleep()))
        .unwrap()
        .unwrap();
    let second = coordinator
        .submit_tasks(Submission::new(1, index_after_sleep()))
        .unwrap()
        .unwrap();
    assert!(matches!(
        coordinator.submit_tasks(Submission::new(1, index_after_sleep())),
        Err(CoordinatorError::Manager(ManagerError::Shared(_)))
    ));

    assert_eq!(indexes(coordinator.give(&first).unwrap()), vec![0]);
    assert_eq!(indexes(coordinator.give(&second).unwrap()), vec![0]);
}

#[test]
fn test_concurrent_callers_share_the_pool() {
    let coordinator = ProcessCoordinator::new(config(4)).unwrap();
    let callers: Vec<_> = (0..4)
        .map(|caller| {
            let handle = coordinator.handle();
            thread::spawn(move || {
                let n = 10 + caller * 3;
                let id = handle
                    .submit_tasks(Submission::new(n, index_after_sleep()).same("sleep_ms", 1))
                    .unwrap()
                    .unwrap();
                indexes(handle.give(&id).unwrap())
            })
        })
        .collect();

    for (caller, joined) in callers.into_iter().enumerate() {
        let n = 10 + caller as u64 * 3;
        assert_eq!(joined.join().unwrap(), (0..n).collect::<Vec<_>>());
    }
    assert_eq!(coordinator.stats().groups_retrieved, 4);
}

#[test]
fn test_scope_shuts_down_after_closure() {
    let handle = ProcessCoordinator::scope(config(2), |coordinator| {
        let id = coordinator
            .submit_tasks(Submission::new(4, index_after_sleep()))?
            .ok_or(CoordinatorError::ShutDown)?;
        assert_eq!(indexes(coordinator.give(&id)?), vec![0, 1, 2, 3]);
        Ok::<_, CoordinatorError>(coordinator.handle())
    })
    .unwrap();

    assert!(matches!(
        handle.submit_tasks(Submission::new(1, index_after_sleep())),
        Err(CoordinatorError::ShutDown)
    ));
}

#[test]
#[serial]
fn test_config_from_env() {
    std::env::set_var("COORDINATOR_WORKERS", "3");
    std::env::set_var("COORDINATOR_MANAGERS", "2,4");
    std::env::set_var("COORDINATOR_TABLE_CAPACITY", "64");
    let config = CoordinatorConfig::from_env();
    std::env::remove_var("COORDINATOR_WORKERS");
    std::env::remove_var("COORDINATOR_MANAGERS");
    std::env::remove_var("COORDINATOR_TABLE_CAPACITY");

    let config = config.unwrap();
    assert_eq!(config.workers, 3);
    assert_eq!(config.managers, ManagerLayout::split(2, 4).unwrap());
    assert_eq!(config.table_capacity, 64);
}

#[test]
#[serial]
fn test_config_from_env_rejects_garbage() {
    std::env::set_var("COORDINATOR_TABLE_CAPACITY", "100");
    let result = CoordinatorConfig::from_env();
    std::env::remove_var("COORDINATOR_TABLE_CAPACITY");

    assert!(matches!(result, Err(CoordinatorError::Configuration(_))));
}

#[test]
fn test_give_in_flight_returns_shut_down() {
    let coordinator = ProcessCoordinator::new(CoordinatorConfig::single_threaded()).unwrap();
    let handle = coordinator.handle();
    let (sender, receiver) = flume::bounded(1);

    // The caller runs index 0 while the closing thread drains index 1, so
    // index 0 reports after the sorters have stopped
    let caller = thread::spawn(move || {
        let outcome = handle
            .submit_tasks(Submission::new(2, index_after_sleep()).different("sleep_ms", [600, 20]))
            .and_then(|id| match id {
                Some(id) => handle.give(&id),
                None => Err(CoordinatorError::ShutDown),
            });
        let _ = sender.send(outcome);
    });

    thread::sleep(Duration::from_millis(50));
    drop(coordinator);

    let outcome = receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("give stayed blocked after shutdown");
    assert!(matches!(outcome, Err(CoordinatorError::ShutDown)));
    caller.join().unwrap();
}

#[test]
fn test_submit_rejected_once_closing() {
    let coordinator = ProcessCoordinator::new(config(2)).unwrap();
    let handle = coordinator.handle();
    let (started_tx, started_rx) = flume::bounded(1);
    let (release_tx, release_rx) = flume::bounded::<()>(1);

    // A pool task holds the shutdown in its join while the outside caller submits
    let blocker = TaskFunction::new("blocker", move |_, _| {
        let _ = started_tx.send(());
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
        Ok(Value::Null)
    });
    coordinator
        .submit_tasks(Submission::new(1, blocker).fire_and_forget())
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let closer = thread::spawn(move || coordinator.exit());
    let deadline = Instant::now() + Duration::from_secs(5);
    let rejected = loop {
        match handle.submit_tasks(Submission::new(1, index_after_sleep()).fire_and_forget()) {
            Err(CoordinatorError::ShutDown) => break true,
            Ok(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
            _ => break false,
        }
    };
    release_tx.send(()).unwrap();

    assert!(rejected);
    closer.join().unwrap().unwrap();
}

#[test]
fn test_nested_submission_during_shutdown_drain() {
    let leaves = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&leaves);
    let leaf = TaskFunction::new("leaf", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });
    let parent = TaskFunction::new("parent", move |ctx, _| {
        let id = ctx
            .coordinator()
            .submit_tasks(Submission::new(3, leaf.clone()))?
            .ok_or_else(|| TaskFailure::new("Coordinator", "missing identifier"))?;
        ctx.coordinator().give(&id)?;
        Ok(Value::Null)
    });

    let coordinator = ProcessCoordinator::new(CoordinatorConfig::single_threaded()).unwrap();
    coordinator
        .submit_tasks(Submission::new(2, parent).fire_and_forget())
        .unwrap();
    // Both parents run during the drain and their nested groups still complete
    coordinator.exit().unwrap();
    assert_eq!(leaves.load(Ordering::SeqCst), 6);
}
