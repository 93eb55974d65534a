//! GLAD Core Library
//!
//! Front end for the GLAD accelerator-lattice language: lexing, parsing with
//! position annotation, include resolution, a typed symbol table and an
//! evaluator that turns statements into element, action and beamline
//! definitions.

pub mod annotation;
pub mod ast;
pub mod diagnostics;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod resolver;
pub mod span;
pub mod symbol;

pub use annotation::{PositionTable, SourcePosition};
pub use ast::*;
pub use diagnostics::{Diagnostic, DiagnosticSeverity, Diagnostics, DiagnosticsOutput};
pub use error::{EvalError, GladError};
pub use evaluator::{Definition, EvalOptions, EvaluatedProperty, Evaluator};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
pub use resolver::{resolve, resolve_source, ResolveOptions, Resolver};
pub use span::{Position, Span};
pub use symbol::{DataType, Symbol, SymbolTable, SymbolValue};
