//! Ownership scopes
//!
//! A sanctum is a nested environment frame with its own tether ledger. The
//! scoped body runs against a clone of the enclosing environment (mutations
//! never propagate outward) and a fresh ledger; every tether must be released
//! before the scope closes, and the enclosing ledger is restored afterward on
//! every exit path.

use super::env::Env;
use super::errors::{RuntimeError, RuntimeResult};
use super::statements::{Flow, Stmt};
use super::Interp;

pub(crate) fn run_sanctum(interp: &mut Interp, body: &[Stmt], env: &Env) -> RuntimeResult<Flow> {
    let mut scoped_env = env.clone();
    let saved = std::mem::take(&mut interp.tethers);

    let result = interp.exec_frame(body, &mut scoped_env);

    let mut leaked: Vec<String> = interp.tethers.drain().collect();
    interp.tethers = saved;

    let flow = result?;

    if !leaked.is_empty() {
        leaked.sort();
        return Err(RuntimeError::TetherLeak { names: leaked });
    }

    Ok(flow)
}
