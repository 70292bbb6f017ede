//! # The execution engine
//!
//! Interprets a [`Program`] handed over by the front end: a set of named
//! units whose bodies are raw token streams. The interpreter is the hub - it
//! calls the expression evaluator for all value production, the orchestration
//! and sanctum modules for block constructs, and service dispatch when a
//! shrine is declared. Unit invocation is the sole entry/exit boundary
//! between environment frames.
//!
//! ## Core rules
//!
//! 1. **Isolation by copy**: environments are value-copied, never aliased,
//!    at every frame boundary
//! 2. **Secrecy by taint**: veiled reads succeed but taint the result, and
//!    taint redacts at output/return/response surfaces
//! 3. **Scrub on exit**: fleeting names are removed from the environment on
//!    every frame exit path
//! 4. **Signals, not markers**: a raised curse unwinds to the nearest
//!    matching ward, which rolls the environment back to its entry snapshot

pub mod env;
pub mod errors;
pub mod value;

pub(crate) mod expressions;
pub(crate) mod orchestrate;
pub(crate) mod sanctum;
pub(crate) mod statements;

#[cfg(test)]
mod tests;

pub use env::Env;
pub use errors::{RuntimeError, RuntimeResult};
pub use value::{Value, REDACTED};

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::service::Shrine;
use crate::types::{Program, Unit, ENTRY_UNIT};
use statements::{compile_body, Flow, InvokeArg, InvokeCall};

/// The interpreter: program, process-scoped service dispatch state, the
/// active tether ledger, and runtime configuration.
///
/// The shrine and the ledger are owned here and injected downward rather than
/// living as ambient globals; the shrine is created with the interpreter and
/// torn down at process exit.
pub struct Interp {
    pub(crate) program: Arc<Program>,
    pub(crate) shrine: Arc<Shrine>,
    pub(crate) config: Config,
    pub(crate) tethers: HashSet<String>,
}

impl Interp {
    pub fn new(program: Program) -> Interp {
        Interp::with_config(program, crate::init::get_config())
    }

    pub fn with_config(program: Program, config: Config) -> Interp {
        Interp {
            program: Arc::new(program),
            shrine: Arc::new(Shrine::new()),
            config,
            tethers: HashSet::new(),
        }
    }

    /// Rebuild an interpreter around existing process state. Used by chorus
    /// branches and by service dispatch when handling a request.
    pub(crate) fn from_parts(
        program: Arc<Program>,
        shrine: Arc<Shrine>,
        config: Config,
    ) -> Interp {
        Interp {
            program,
            shrine,
            config,
            tethers: HashSet::new(),
        }
    }

    /// A sibling interpreter for an independently scheduled worker: shares
    /// the program and the shrine singleton, starts with a fresh ledger.
    pub(crate) fn branch(&self) -> Interp {
        Interp::from_parts(
            Arc::clone(&self.program),
            Arc::clone(&self.shrine),
            self.config.clone(),
        )
    }

    /// The service-dispatch singleton owned by this interpreter family.
    pub fn shrine(&self) -> &Arc<Shrine> {
        &self.shrine
    }

    /// Locate the entry unit, build its empty environment, and execute it.
    /// An answered value at top level is rendered to stdout.
    pub fn run(&mut self) -> RuntimeResult<()> {
        let program = Arc::clone(&self.program);
        let main = program.unit(ENTRY_UNIT).ok_or(RuntimeError::UnknownRite {
            name: ENTRY_UNIT.to_string(),
        })?;

        let mut env = Env::new();
        if let Some(value) = self.run_unit(main, &mut env)? {
            println!("{}", value.render_redacted());
        }
        Ok(())
    }

    /// Run one unit against an environment. Returns the first answered value,
    /// if any. Ephemeral units trace frame entry and exit on all paths.
    pub(crate) fn run_unit(
        &mut self,
        unit: &Unit,
        env: &mut Env,
    ) -> RuntimeResult<Option<Value>> {
        if unit.ephemeral {
            tracing::debug!(target: "rite", rite = %unit.name, "entering ephemeral rite");
        }

        let result =
            compile_body(&unit.body).and_then(|stmts| self.exec_frame(&stmts, env));

        if unit.ephemeral {
            tracing::debug!(target: "rite", rite = %unit.name, "leaving ephemeral rite");
        }

        match result? {
            Flow::Answered(value) => Ok(Some(value)),
            Flow::Normal => Ok(None),
        }
    }

    /// Invoke a unit from a caller environment.
    ///
    /// The child environment contains only ordinary-visibility names copied
    /// from the caller. An explicit glyph-name argument deliberately carries
    /// a veiled value across, in which case the bound parameter inherits the
    /// veil. The answered value (if any) crosses the boundary as plain text,
    /// redacted when tainted.
    pub(crate) fn invoke(
        &mut self,
        call: &InvokeCall,
        env: &Env,
    ) -> RuntimeResult<Option<String>> {
        let program = Arc::clone(&self.program);
        let unit = program
            .unit(&call.target)
            .ok_or_else(|| RuntimeError::UnknownRite {
                name: call.target.clone(),
            })?;

        if let Some(phrase) = &unit.sealed {
            match &call.passphrase {
                Some(supplied) if supplied == phrase => {}
                _ => {
                    return Err(RuntimeError::SealedRite {
                        name: unit.name.clone(),
                    });
                }
            }
        }

        let mut child = env.child_visible();

        let (arg_value, arg_veiled) = match &call.arg {
            None => (String::new(), false),
            Some(InvokeArg::Literal(text)) => (text.clone(), false),
            Some(InvokeArg::Glyph(name)) => (
                env.get(name).unwrap_or_default().to_string(),
                env.is_veiled(name),
            ),
        };

        if let Some(param) = unit.params.first() {
            child.set(param.clone(), arg_value);
            if arg_veiled {
                child.veil(param);
            }
        }

        let answered = self.run_unit(unit, &mut child)?;
        Ok(answered.map(|value| value.render_redacted()))
    }
}

/// Host entry point: run a program's entry unit to completion.
pub fn run_program(program: Program) -> anyhow::Result<()> {
    let mut interp = Interp::new(program);
    interp.run().context("program execution failed")?;
    Ok(())
}
