/*!
 * Process Coordinator - Demo Driver
 *
 * Runs a nested workload: every outer task submits and awaits an inner group
 * on the same pool, then the ordered results and pool statistics are printed.
 */

use miette::{IntoDiagnostic, Result};
use process_coordinator::{
    init_tracing, CoordinatorConfig, ProcessCoordinator, Submission, TaskFailure, TaskFunction,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::info;

const OUTER_TASKS: usize = 4;
const INNER_TASKS: usize = 5;

fn inner_task() -> TaskFunction {
    TaskFunction::new("inner", |ctx, kwargs| {
        let x = kwargs["x"].as_u64().unwrap_or_default();
        let y = ctx.identifier().index as u64;
        // Later tasks finish first; results still come back in order
        std::thread::sleep(Duration::from_millis(10 * (INNER_TASKS as u64 - y)));
        Ok(json!([x, y]))
    })
}

fn outer_task() -> TaskFunction {
    TaskFunction::new("outer", |ctx, kwargs| {
        let x = kwargs["x"].clone();
        let submission = Submission::new(INNER_TASKS, inner_task()).same("x", x);
        let identifier = ctx
            .coordinator()
            .submit_tasks(submission)?
            .ok_or_else(|| TaskFailure::new("Coordinator", "inner group returned no identifier"))?;

        let results = ctx
            .coordinator()
            .give(&identifier)?
            .into_iter()
            .collect::<Result<Vec<Value>, TaskFailure>>()?;
        Ok(Value::Array(results))
    })
}

fn main() -> Result<()> {
    init_tracing();

    let config = CoordinatorConfig::from_env()?;
    info!(workers = config.workers, managers = %config.managers, "starting demo workload");
    let start = Instant::now();

    let (results, stats) = ProcessCoordinator::scope(config, |coordinator| {
        let submission = Submission::new(OUTER_TASKS, outer_task()).different("x", 0..OUTER_TASKS as u64);
        let identifier = coordinator
            .submit_tasks(submission)?
            .ok_or_else(|| miette::miette!("outer group returned no identifier"))?;
        let results = coordinator.give(&identifier)?;
        Ok::<_, miette::Report>((results, coordinator.stats()))
    })?;

    for (index, result) in results.iter().enumerate() {
        match result {
            Ok(value) => println!("results for task {}: {}", index, value),
            Err(failure) => println!("task {} failed: {}", index, failure),
        }
    }
    println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "demo finished");
    Ok(())
}
