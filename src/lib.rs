pub mod config;
pub mod init;
pub mod interpreter;
pub mod service;
pub mod types;

// Re-export main types
pub use interpreter::{run_program, Env, Interp, RuntimeError, RuntimeResult, Value, REDACTED};
pub use types::{Program, Span, Token, TokenKind, Unit, ENTRY_UNIT};

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
