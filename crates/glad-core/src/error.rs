//! Fatal error types.
//!
//! Recoverable problems (syntax errors, undefined names) are reported as
//! [`crate::Diagnostic`]s. The errors here stop the current operation.

use miette::Diagnostic;
use thiserror::Error;

/// An internal evaluator failure. Evaluation of the current program stops.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum EvalError {
    #[error("value stack overflow: more than {limit} values")]
    #[diagnostic(
        code(glad::eval::stack_overflow),
        help("raise the stack limit or split the expression")
    )]
    StackOverflow { limit: usize },

    #[error("value stack underflow")]
    #[diagnostic(code(glad::eval::stack_underflow))]
    StackUnderflow,

    #[error("evaluation nested deeper than {limit} levels")]
    #[diagnostic(code(glad::eval::nesting))]
    NestingTooDeep { limit: usize },
}

/// Errors surfaced to the command line.
#[derive(Debug, Error, Diagnostic)]
pub enum GladError {
    #[error("could not read '{path}'")]
    #[diagnostic(code(glad::io::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write '{path}'")]
    #[diagnostic(code(glad::io::write))]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize the syntax tree")]
    #[diagnostic(code(glad::dump))]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}

pub type Result<T, E = GladError> = std::result::Result<T, E>;
