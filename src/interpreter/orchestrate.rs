//! Orchestration blocks
//!
//! Two composition forms over unit invocation. A litany runs its invocations
//! strictly in source order and halts on the first failure. A chorus
//! dispatches each invocation to its own worker thread with its own copy of
//! the pre-block environment; branches cannot observe each other, all of them
//! run to completion, and the first failure in declared order is surfaced.

use std::thread;

use super::env::Env;
use super::errors::{RuntimeError, RuntimeResult};
use super::statements::InvokeCall;
use super::Interp;

pub(crate) fn run_litany(
    interp: &mut Interp,
    calls: &[InvokeCall],
    env: &Env,
) -> RuntimeResult<()> {
    for call in calls {
        interp.invoke(call, env)?;
    }
    Ok(())
}

pub(crate) fn run_chorus(interp: &Interp, calls: &[InvokeCall], env: &Env) -> RuntimeResult<()> {
    if calls.is_empty() {
        return Ok(());
    }

    let results: Vec<RuntimeResult<()>> = thread::scope(|scope| {
        let handles: Vec<_> = calls
            .iter()
            .map(|call| {
                let branch_env = env.clone();
                let mut branch = interp.branch();
                scope.spawn(move || branch.invoke(call, &branch_env).map(|_| ()))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(Err(RuntimeError::WorkerPanic)))
            .collect()
    });

    // Branches are never cancelled; report the first failure in declared order.
    for result in results {
        result?;
    }
    Ok(())
}
