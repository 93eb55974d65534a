//! Abstract Syntax Tree for GLAD lattices.
//!
//! Expressions keep the shape the grammar produced: a first operand followed
//! by a left-associative chain of operations. Precedence lives in the nesting
//! of those chains, never in the evaluator.

use crate::annotation::PositionTable;
use crate::span::Span;
use serde::{Deserialize, Serialize};

/// A parsed lattice: the top-level statements plus the position table that
/// maps identifier ids back to source locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Statement>,
    pub positions: PositionTable,
}

/// A statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    /// `x = expr;`
    Assignment(Assignment),
    /// `Q1: QUAD, L = 0.5;`
    Element(ElementStatement),
    /// `twiss, energy = 3.0;`
    Action(ActionStatement),
    /// `ring: line = 2 * cell;`
    Beamline(BeamlineStatement),
    /// `include "file.lat";`
    Include(IncludeStatement),
    /// `{ ... }`
    List(StatementList),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Assignment(s) => s.span,
            Statement::Element(s) => s.span,
            Statement::Action(s) => s.span,
            Statement::Beamline(s) => s.span,
            Statement::Include(s) => s.span,
            Statement::List(s) => s.span,
        }
    }
}

/// A braced block of statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementList {
    pub statements: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub lhs: Identifier,
    pub rhs: Expression,
    pub span: Span,
}

/// A named value attached to an element or action. One value is a scalar,
/// more than one is a vector literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: Identifier,
    pub values: Vec<Expression>,
    pub span: Span,
}

impl Property {
    pub fn is_vector(&self) -> bool {
        self.values.len() > 1
    }
}

/// An element (magnet, drift, ...) definition. Properties may be empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementStatement {
    pub name: Identifier,
    pub element_type: Identifier,
    pub properties: Vec<Property>,
    pub span: Span,
}

/// An action (command) definition. The grammar requires at least one property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStatement {
    pub name: Identifier,
    pub properties: Vec<Property>,
    pub span: Span,
}

/// A beamline definition. The line is an ordinary expression: `+`
/// concatenates, multiplication by an integer repeats and unary `-` inverts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamlineStatement {
    pub name: Identifier,
    pub line: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeStatement {
    pub filename: QuotedString,
    /// Path of the file the directive appeared in.
    pub origin: String,
    pub span: Span,
}

/// An expression: `first (op operand)*`, evaluated left to right.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expression {
    pub first: Operand,
    pub rest: Vec<Operation>,
    pub span: Span,
}

impl Expression {
    /// An expression consisting of a single operand.
    pub fn operand(first: Operand, span: Span) -> Self {
        Self {
            first,
            rest: Vec::new(),
            span,
        }
    }

    /// Collapse a chain without operations into its operand; otherwise wrap
    /// the whole chain as a nested operand.
    pub fn into_operand(self) -> Operand {
        if self.rest.is_empty() {
            self.first
        } else {
            Operand::Expression(Box::new(self))
        }
    }
}

/// One step of a left-associative chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operator: Operator,
    pub operand: Operand,
}

/// A leaf or nested node of an expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operand {
    Nil,
    Bool(bool),
    UnsignedInt(u64),
    Double(f64),
    Identifier(Identifier),
    String(QuotedString),
    Unary(Box<Unary>),
    FunctionCall(FunctionCall),
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unary {
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: Identifier,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Plus,
    Minus,
    Times,
    Divide,
    Positive,
    Negative,
    Not,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl Operator {
    /// Source spelling.
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Plus | Operator::Positive => "+",
            Operator::Minus | Operator::Negative => "-",
            Operator::Times => "*",
            Operator::Divide => "/",
            Operator::Not => "!",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
        }
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::Positive | Operator::Negative | Operator::Not)
    }
}

/// An identifier.
///
/// `id` is assigned by the position annotator while parsing; `None` means the
/// node was never annotated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    pub id: Option<usize>,
    pub span: Span,
}

impl Identifier {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            id: None,
            span,
        }
    }

    /// Whether this names an element property, e.g. `Q1.K1`.
    pub fn is_dotted(&self) -> bool {
        self.name.contains('.')
    }
}

/// A double-quoted string, taken literally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedString {
    pub value: String,
    pub span: Span,
}

impl QuotedString {
    pub fn new(value: impl Into<String>, span: Span) -> Self {
        Self {
            value: value.into(),
            span,
        }
    }
}
