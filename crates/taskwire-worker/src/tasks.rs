//! Task handlers served by this worker.
//!
//! - `sum`: adds two integers, `{"a": 2, "b": 3}` -> `result = {"result": 5}`.
//! - `echo`: returns its input unchanged under the `echo` key.
//! - `sleep`: waits `{"ms": n}` milliseconds, capped at one minute. Useful
//!   to observe the drain on shutdown.

use core::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskwire::{Execution, HandlerRegistry, Output, TaskFailure, task_fn};

const MAX_SLEEP_MS: u64 = 60_000;

#[derive(Deserialize)]
struct SumInput {
    a: i64,
    b: i64,
}

#[derive(Serialize)]
struct SumOutput {
    result: i64,
}

#[derive(Deserialize)]
struct SleepInput {
    ms: u64,
}

async fn sum(execution: Execution) -> Result<Output, TaskFailure> {
    let SumInput { a, b } = execution.decode_input()?;
    let result = a
        .checked_add(b)
        .ok_or_else(|| format!("{a} + {b} overflows"))?;
    Ok(Output::serialize("result", &SumOutput { result })?)
}

async fn echo(execution: Execution) -> Result<Output, TaskFailure> {
    let input: Value = execution.decode_input()?;
    Ok(Output::new("echo", input))
}

async fn sleep(execution: Execution) -> Result<Output, TaskFailure> {
    let SleepInput { ms } = execution.decode_input()?;
    let ms = ms.min(MAX_SLEEP_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(Output::new("slept", serde_json::json!({ "ms": ms })))
}

pub fn registry() -> taskwire::Result<HandlerRegistry> {
    HandlerRegistry::new()
        .with(task_fn("sum", sum))?
        .with(task_fn("echo", echo))?
        .with(task_fn("sleep", sleep))
}
