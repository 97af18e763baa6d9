//! Sandbar Script — the restricted strategy language.
//!
//! Strategy source goes through three steps:
//! - `compiler::compile`: lex, parse and statically restrict the source;
//!   nothing runs
//! - `executor::execute`: run the module body in a fresh interpreter that
//!   holds only the capability allowlist, then validate the strategy
//!   contract
//! - `strategy::ScriptStrategy`: drive the validated class from the
//!   engine's bar loop
//!
//! The language is a small Python-shaped subset so that strategies written
//! against the usual backtesting templates compile unchanged when they stay
//! inside it.

pub mod api;
pub mod ast;
pub mod capabilities;
pub mod checker;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod interp;
pub mod lexer;
pub mod libs;
pub mod ops;
pub mod parser;
pub mod strategy;
pub mod value;

pub use compiler::{compile, CompileError, CompileOptions, CompiledUnit, Diagnostic};
pub use error::{ErrorKind, RuntimeError};
pub use executor::{execute, ContractError, ParamValue, StrategyDefinition};
pub use interp::Limits;
pub use strategy::ScriptStrategy;
