//! Runtime error taxonomy
//!
//! Four classes of failure, with different recovery rules:
//! - structural errors (`Syntax`, `Eval`, …) abort the current invocation
//! - raised curses are caught by a textually-matching ward, otherwise they
//!   behave like structural errors
//! - tether violations are fatal and never recoverable
//! - service errors are fatal to the declaring statement

use crate::types::Span;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    /// Malformed statement syntax discovered during interpretation.
    #[error("{message} at {span}")]
    Syntax { message: String, span: Span },

    /// Wrong operand kinds, bad durations, and other evaluation errors.
    #[error("{message}")]
    Eval { message: String },

    #[error("unknown glyph {name} at {span}")]
    UnknownGlyph { name: String, span: Span },

    #[error("division by zero")]
    DivideByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("while loop exceeded {limit} iterations")]
    LoopLimit { limit: usize },

    /// A raised curse travelling toward the nearest matching ward.
    #[error("curse raised: {name}")]
    Curse { name: String },

    #[error("unknown rite {name}")]
    UnknownRite { name: String },

    #[error("rite {name} is sealed; invocation requires its passphrase")]
    SealedRite { name: String },

    #[error("tether leak in sanctum: {}", .names.join(", "))]
    TetherLeak { names: Vec<String> },

    #[error("{name} is already tethered in this sanctum")]
    DoubleTether { name: String },

    #[error("{name} is not tethered in this sanctum")]
    UntetherUnbound { name: String },

    #[error("a chorus worker panicked")]
    WorkerPanic,

    #[error("shrine already bound to {bound}, cannot bind {requested}")]
    AddrConflict { bound: String, requested: String },

    #[error("shrine bind failed on {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("duplicate route {key}")]
    DuplicateRoute { key: String },

    #[error("shrine is sealed; route changes require its passphrase")]
    SealedShrine,
}

impl RuntimeError {
    pub(crate) fn syntax(message: impl Into<String>, span: Span) -> Self {
        RuntimeError::Syntax {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        RuntimeError::Eval {
            message: message.into(),
        }
    }

    /// True when a ward named `ward` catches this error.
    pub(crate) fn caught_by(&self, ward: &str) -> bool {
        matches!(self, RuntimeError::Curse { name } if name == ward)
    }
}
