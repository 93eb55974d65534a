//! Stack-based evaluation of GLAD programs.
//!
//! Expressions are evaluated on a bounded value stack in the exact order the
//! parser chained them. Assignments bind into a local scope; element, action
//! and beamline statements become [`Definition`]s and typed symbols.
//!
//! Semantic problems (undefined names, unknown functions, bad beamline terms)
//! are recorded as warnings and evaluation carries on. Only stack and nesting
//! failures are fatal.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::annotation::PositionTable;
use crate::ast::*;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EvalError;
use crate::span::Span;
use crate::symbol::{Symbol, SymbolTable, SymbolValue};

pub const DEFAULT_STACK_LIMIT: usize = 1024;
pub const DEFAULT_MAX_DEPTH: usize = 256;
/// Upper bound on the length of one flattened beamline.
pub const MAX_LINE_ELEMENTS: usize = 1_000_000;

/// Evaluator limits.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Maximum number of values on the stack.
    pub stack_limit: usize,
    /// Maximum nesting of sub-expressions, calls, blocks and sub-lines.
    pub max_depth: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            stack_limit: DEFAULT_STACK_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A value stack that refuses to grow past its limit.
#[derive(Debug)]
pub struct ValueStack {
    values: Vec<f64>,
    limit: usize,
}

impl ValueStack {
    pub fn new(limit: usize) -> Self {
        Self {
            values: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, value: f64) -> Result<(), EvalError> {
        if self.values.len() >= self.limit {
            return Err(EvalError::StackOverflow { limit: self.limit });
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<f64, EvalError> {
        self.values.pop().ok_or(EvalError::StackUnderflow)
    }

    pub fn peek(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.values.truncate(depth);
    }
}

/// A property after evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedProperty {
    pub name: String,
    pub value: SymbolValue,
}

impl fmt::Display for EvaluatedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// Something a statement defined, in program order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Definition {
    Variable {
        name: String,
        value: f64,
    },
    Element {
        name: String,
        element_type: String,
        properties: Vec<EvaluatedProperty>,
    },
    Action {
        name: String,
        properties: Vec<EvaluatedProperty>,
    },
    Beamline {
        name: String,
        elements: Vec<String>,
    },
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Variable { name, .. }
            | Definition::Element { name, .. }
            | Definition::Action { name, .. }
            | Definition::Beamline { name, .. } => name,
        }
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Definition::Variable { name, value } => write!(f, "{} = {}", name, value),
            Definition::Element {
                name,
                element_type,
                properties,
            } => {
                write!(f, "{}: {}", name, element_type)?;
                for property in properties {
                    write!(f, ", {}", property)?;
                }
                Ok(())
            }
            Definition::Action { name, properties } => {
                f.write_str(name)?;
                for property in properties {
                    write!(f, ", {}", property)?;
                }
                Ok(())
            }
            Definition::Beamline { name, elements } => {
                write!(f, "{}: line = ({})", name, elements.join(", "))
            }
        }
    }
}

/// Whether an operand left its value on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Pushed,
    Unresolved,
}

enum Item {
    Int(i64),
    Double(f64),
    Text(String),
}

enum LineTerm {
    Count(u64),
    Line(Vec<String>),
}

/// Walks a program and materializes its definitions.
#[derive(Debug)]
pub struct Evaluator {
    options: EvalOptions,
    stack: ValueStack,
    // Keys are lowercased; names are case-insensitive.
    locals: HashMap<String, f64>,
    symbols: SymbolTable,
    definitions: Vec<Definition>,
    elements: HashMap<String, String>,
    lines: HashMap<String, Vec<String>>,
    diagnostics: Diagnostics,
    positions: PositionTable,
    file: String,
    depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_options(EvalOptions::default())
    }

    pub fn with_options(options: EvalOptions) -> Self {
        // Built-in constants live in the local scope only.
        let mut locals = HashMap::new();
        locals.insert("pi".to_string(), std::f64::consts::PI);

        Self {
            stack: ValueStack::new(options.stack_limit),
            options,
            locals,
            symbols: SymbolTable::new(),
            definitions: Vec::new(),
            elements: HashMap::new(),
            lines: HashMap::new(),
            diagnostics: Diagnostics::new(),
            positions: PositionTable::new(),
            file: String::new(),
            depth: 0,
        }
    }

    /// Evaluate every statement in order. Stops at the first fatal error;
    /// warnings collect in [`Evaluator::diagnostics`].
    pub fn run(&mut self, program: &Program) -> Result<(), EvalError> {
        self.positions.clone_from(&program.positions);
        for statement in &program.statements {
            self.evaluate_statement(statement)?;
        }
        debug!(
            definitions = self.definitions.len(),
            warnings = self.diagnostics.len(),
            "evaluation finished"
        );
        Ok(())
    }

    pub fn evaluate_statement(&mut self, statement: &Statement) -> Result<(), EvalError> {
        match statement {
            Statement::Assignment(assignment) => self.assign(assignment),
            Statement::Element(element) => {
                self.locate(&element.name);
                self.define_element(element)
            }
            Statement::Action(action) => {
                self.locate(&action.name);
                self.define_action(action)
            }
            Statement::Beamline(beamline) => {
                self.locate(&beamline.name);
                self.define_beamline(beamline)
            }
            Statement::Include(include) => {
                self.file.clone_from(&include.origin);
                self.report(
                    "W207",
                    format!("include \"{}\" was not expanded", include.filename.value),
                    include.span,
                );
                Ok(())
            }
            Statement::List(list) => {
                self.enter()?;
                let result = list
                    .statements
                    .iter()
                    .try_for_each(|statement| self.evaluate_statement(statement));
                self.leave();
                result
            }
        }
    }

    /// Evaluate an expression to a number. `Ok(None)` means an operand could
    /// not be resolved; a warning has been recorded and the stack is back at
    /// its starting depth.
    pub fn evaluate_expression(&mut self, expr: &Expression) -> Result<Option<f64>, EvalError> {
        let mark = self.stack.len();
        let outcome = match self.eval_chain(expr) {
            Ok(Resolution::Pushed) => self.stack.pop().map(Some),
            Ok(Resolution::Unresolved) => Ok(None),
            Err(err) => Err(err),
        };
        self.stack.truncate(mark);
        outcome
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Value bound to `name` in the local scope.
    pub fn local(&self, name: &str) -> Option<f64> {
        self.locals.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // Statements

    fn assign(&mut self, assignment: &Assignment) -> Result<(), EvalError> {
        self.locate(&assignment.lhs);
        let name = &assignment.lhs.name;
        match self.evaluate_expression(&assignment.rhs)? {
            Some(value) => {
                debug!(name = %name, value, "assigned");
                self.locals.insert(name.to_ascii_lowercase(), value);
                self.definitions.push(Definition::Variable {
                    name: name.clone(),
                    value,
                });
            }
            None => self.report(
                "W200",
                format!("assignment to '{}' skipped: value could not be resolved", name),
                assignment.span,
            ),
        }
        Ok(())
    }

    fn define_element(&mut self, element: &ElementStatement) -> Result<(), EvalError> {
        let name = &element.name.name;
        let properties = self.evaluate_properties(&element.properties)?;

        self.symbols
            .push(Symbol::string(name, &element.element_type.name));
        self.push_property_symbols(name, &properties);

        let key = name.to_ascii_lowercase();
        self.lines.remove(&key);
        self.elements.insert(key, name.clone());

        debug!(
            element = %name,
            kind = %element.element_type.name,
            properties = properties.len(),
            "element defined"
        );
        self.definitions.push(Definition::Element {
            name: name.clone(),
            element_type: element.element_type.name.clone(),
            properties,
        });
        Ok(())
    }

    fn define_action(&mut self, action: &ActionStatement) -> Result<(), EvalError> {
        let name = &action.name.name;
        let properties = self.evaluate_properties(&action.properties)?;
        self.push_property_symbols(name, &properties);

        debug!(action = %name, properties = properties.len(), "action defined");
        self.definitions.push(Definition::Action {
            name: name.clone(),
            properties,
        });
        Ok(())
    }

    fn define_beamline(&mut self, beamline: &BeamlineStatement) -> Result<(), EvalError> {
        let name = &beamline.name.name;
        let elements = match self.flatten_expression(&beamline.line)? {
            Some(LineTerm::Line(elements)) => elements,
            Some(LineTerm::Count(_)) => {
                self.report(
                    "W209",
                    format!("beamline '{}' does not name any element", name),
                    beamline.span,
                );
                return Ok(());
            }
            None => return Ok(()),
        };

        self.symbols.push(Symbol::strings(name, elements.clone()));
        let key = name.to_ascii_lowercase();
        self.elements.remove(&key);
        self.lines.insert(key, elements.clone());

        debug!(line = %name, elements = elements.len(), "beamline defined");
        self.definitions.push(Definition::Beamline {
            name: name.clone(),
            elements,
        });
        Ok(())
    }

    fn push_property_symbols(&mut self, owner: &str, properties: &[EvaluatedProperty]) {
        for property in properties {
            self.symbols.push(Symbol::with_value(
                format!("{}.{}", owner, property.name),
                property.value.clone(),
            ));
        }
    }

    fn evaluate_properties(
        &mut self,
        properties: &[Property],
    ) -> Result<Vec<EvaluatedProperty>, EvalError> {
        let mut evaluated = Vec::with_capacity(properties.len());
        for property in properties {
            let value = self.evaluate_property(property)?;
            evaluated.push(EvaluatedProperty {
                name: property.name.name.clone(),
                value,
            });
        }
        Ok(evaluated)
    }

    /// A property that cannot be fully evaluated gets `SymbolValue::None`.
    fn evaluate_property(&mut self, property: &Property) -> Result<SymbolValue, EvalError> {
        let mut items = Vec::with_capacity(property.values.len());
        for expr in &property.values {
            match &expr.first {
                Operand::String(text) if expr.rest.is_empty() => {
                    items.push(Item::Text(text.value.clone()));
                    continue;
                }
                _ => {}
            }
            if is_integer_expression(expr) {
                if let Some(value) = eval_integer(expr) {
                    items.push(Item::Int(value));
                    continue;
                }
                self.report(
                    "W208",
                    format!(
                        "property '{}' does not fit a 64-bit integer; stored as a double",
                        property.name.name
                    ),
                    property.span,
                );
            }
            match self.evaluate_expression(expr)? {
                Some(value) => items.push(Item::Double(value)),
                None => {
                    self.report(
                        "W208",
                        format!("property '{}' has no value", property.name.name),
                        property.span,
                    );
                    return Ok(SymbolValue::None);
                }
            }
        }

        match typed_value(items) {
            Some(value) => Ok(value),
            None => {
                self.report(
                    "W208",
                    format!("property '{}' mixes strings and numbers", property.name.name),
                    property.span,
                );
                Ok(SymbolValue::None)
            }
        }
    }

    // Expressions

    fn eval_chain(&mut self, expr: &Expression) -> Result<Resolution, EvalError> {
        if self.eval_operand(&expr.first, expr.span)? == Resolution::Unresolved {
            return Ok(Resolution::Unresolved);
        }
        for operation in &expr.rest {
            if self.eval_operand(&operation.operand, expr.span)? == Resolution::Unresolved {
                return Ok(Resolution::Unresolved);
            }
            if self.apply_binary(operation.operator, expr.span)? == Resolution::Unresolved {
                return Ok(Resolution::Unresolved);
            }
        }
        Ok(Resolution::Pushed)
    }

    fn eval_operand(&mut self, operand: &Operand, span: Span) -> Result<Resolution, EvalError> {
        match operand {
            Operand::Nil => self.push(0.0),
            Operand::Bool(value) => self.push(truth(*value)),
            Operand::UnsignedInt(value) => self.push(*value as f64),
            Operand::Double(value) => self.push(*value),
            Operand::Identifier(id) => self.eval_identifier(id),
            Operand::String(text) => {
                self.report(
                    "W203",
                    format!("string \"{}\" used as a number", text.value),
                    text.span,
                );
                Ok(Resolution::Unresolved)
            }
            Operand::Unary(unary) => self.eval_unary(unary, span),
            Operand::FunctionCall(call) => self.eval_call(call),
            Operand::Expression(expr) => {
                self.enter()?;
                let result = self.eval_chain(expr);
                self.leave();
                result
            }
        }
    }

    fn eval_identifier(&mut self, id: &Identifier) -> Result<Resolution, EvalError> {
        if let Some(value) = self.local(&id.name) {
            return self.push(value);
        }
        if id.is_dotted() {
            let value = self.symbols.lookup(&id.name).and_then(|s| s.value.as_f64());
            if let Some(value) = value {
                return self.push(value);
            }
            self.report("W202", format!("unresolved reference '{}'", id.name), id.span);
        } else {
            self.report("W201", format!("undefined identifier '{}'", id.name), id.span);
        }
        Ok(Resolution::Unresolved)
    }

    fn eval_unary(&mut self, unary: &Unary, span: Span) -> Result<Resolution, EvalError> {
        let Some(operation) = unary_operation(unary.operator) else {
            self.report(
                "W206",
                format!("operator '{}' is not a prefix operator", unary.operator.symbol()),
                span,
            );
            return Ok(Resolution::Unresolved);
        };

        self.enter()?;
        let operand = self.eval_operand(&unary.operand, span);
        self.leave();
        if operand? == Resolution::Unresolved {
            return Ok(Resolution::Unresolved);
        }

        let value = self.stack.pop()?;
        self.push(operation(value))
    }

    fn eval_call(&mut self, call: &FunctionCall) -> Result<Resolution, EvalError> {
        let Some(function) = builtin_function(&call.name.name) else {
            self.report(
                "W204",
                format!("unknown function '{}'", call.name.name),
                call.span,
            );
            return Ok(Resolution::Unresolved);
        };
        if call.args.len() != 1 {
            self.report(
                "W205",
                format!(
                    "function '{}' takes 1 argument but {} were given",
                    call.name.name,
                    call.args.len()
                ),
                call.span,
            );
            return Ok(Resolution::Unresolved);
        }

        self.enter()?;
        let argument = self.eval_chain(&call.args[0]);
        self.leave();
        if argument? == Resolution::Unresolved {
            return Ok(Resolution::Unresolved);
        }

        let value = self.stack.pop()?;
        self.push(function(value))
    }

    fn apply_binary(&mut self, operator: Operator, span: Span) -> Result<Resolution, EvalError> {
        let Some(operation) = binary_operation(operator) else {
            self.report(
                "W206",
                format!("operator '{}' is not defined between two operands", operator.symbol()),
                span,
            );
            return Ok(Resolution::Unresolved);
        };

        let rhs = self.stack.pop()?;
        let lhs = self.stack.pop()?;
        self.push(operation(lhs, rhs))
    }

    fn push(&mut self, value: f64) -> Result<Resolution, EvalError> {
        self.stack.push(value)?;
        Ok(Resolution::Pushed)
    }

    // Beamlines

    fn flatten_expression(&mut self, expr: &Expression) -> Result<Option<LineTerm>, EvalError> {
        let Some(mut acc) = self.flatten_operand(&expr.first, expr.span)? else {
            return Ok(None);
        };
        for operation in &expr.rest {
            let Some(rhs) = self.flatten_operand(&operation.operand, expr.span)? else {
                return Ok(None);
            };
            acc = match (operation.operator, acc, rhs) {
                (Operator::Plus, LineTerm::Line(mut head), LineTerm::Line(tail)) => {
                    head.extend(tail);
                    LineTerm::Line(head)
                }
                (Operator::Times, LineTerm::Count(n), LineTerm::Line(line))
                | (Operator::Times, LineTerm::Line(line), LineTerm::Count(n)) => {
                    match self.repeat_line(&line, n, expr.span) {
                        Some(repeated) => LineTerm::Line(repeated),
                        None => return Ok(None),
                    }
                }
                (Operator::Times, LineTerm::Count(a), LineTerm::Count(b)) => {
                    LineTerm::Count(a.saturating_mul(b))
                }
                (operator, _, _) => {
                    self.report(
                        "W209",
                        format!("operator '{}' cannot combine beamline terms", operator.symbol()),
                        expr.span,
                    );
                    return Ok(None);
                }
            };
        }
        Ok(Some(acc))
    }

    fn flatten_operand(
        &mut self,
        operand: &Operand,
        span: Span,
    ) -> Result<Option<LineTerm>, EvalError> {
        match operand {
            Operand::UnsignedInt(n) => Ok(Some(LineTerm::Count(*n))),
            Operand::Identifier(id) => {
                let key = id.name.to_ascii_lowercase();
                if let Some(line) = self.lines.get(&key) {
                    return Ok(Some(LineTerm::Line(line.clone())));
                }
                if let Some(element) = self.elements.get(&key) {
                    return Ok(Some(LineTerm::Line(vec![element.clone()])));
                }
                self.report(
                    "W209",
                    format!("unknown element or line '{}'", id.name),
                    id.span,
                );
                Ok(None)
            }
            Operand::Unary(unary) => {
                self.enter()?;
                let inner = self.flatten_operand(&unary.operand, span);
                self.leave();
                match (unary.operator, inner?) {
                    (_, None) => Ok(None),
                    (Operator::Positive, Some(term)) => Ok(Some(term)),
                    (Operator::Negative, Some(LineTerm::Line(mut line))) => {
                        line.reverse();
                        Ok(Some(LineTerm::Line(line)))
                    }
                    (operator, Some(_)) => {
                        self.report(
                            "W209",
                            format!("operator '{}' cannot be applied here", operator.symbol()),
                            span,
                        );
                        Ok(None)
                    }
                }
            }
            Operand::Expression(expr) => {
                self.enter()?;
                let result = self.flatten_expression(expr);
                self.leave();
                result
            }
            other => {
                self.report(
                    "W209",
                    format!("'{}' is not a beamline term", other),
                    span,
                );
                Ok(None)
            }
        }
    }

    fn repeat_line(&mut self, line: &[String], count: u64, span: Span) -> Option<Vec<String>> {
        let total = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(line.len()))
            .filter(|&total| total <= MAX_LINE_ELEMENTS);
        match total {
            Some(total) => {
                let mut repeated = Vec::with_capacity(total);
                for _ in 0..count {
                    repeated.extend_from_slice(line);
                }
                Some(repeated)
            }
            None => {
                self.report(
                    "W209",
                    format!("beamline longer than {} elements", MAX_LINE_ELEMENTS),
                    span,
                );
                None
            }
        }
    }

    // Bookkeeping

    fn enter(&mut self) -> Result<(), EvalError> {
        if self.depth >= self.options.max_depth {
            return Err(EvalError::NestingTooDeep {
                limit: self.options.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Attribute following warnings to the file `head` was parsed from.
    fn locate(&mut self, head: &Identifier) {
        if let Some(source) = head.id.and_then(|id| self.positions.get(id)) {
            self.file.clone_from(&source.file);
        }
    }

    fn report(&mut self, code: &str, message: String, span: Span) {
        warn!(code, file = %self.file, "{}", message);
        self.diagnostics.push(
            Diagnostic::warning(code, message)
                .with_file(self.file.clone())
                .with_span(span)
                .build(),
        );
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn unary_operation(operator: Operator) -> Option<fn(f64) -> f64> {
    let operation: fn(f64) -> f64 = match operator {
        Operator::Positive => |v| v,
        Operator::Negative => |v| -v,
        Operator::Not => |v| truth(v == 0.0),
        _ => return None,
    };
    Some(operation)
}

fn binary_operation(operator: Operator) -> Option<fn(f64, f64) -> f64> {
    let operation: fn(f64, f64) -> f64 = match operator {
        Operator::Plus => |a, b| a + b,
        Operator::Minus => |a, b| a - b,
        Operator::Times => |a, b| a * b,
        Operator::Divide => |a, b| a / b,
        Operator::Equal => |a, b| truth(a == b),
        Operator::NotEqual => |a, b| truth(a != b),
        Operator::Less => |a, b| truth(a < b),
        Operator::LessEqual => |a, b| truth(a <= b),
        Operator::Greater => |a, b| truth(a > b),
        Operator::GreaterEqual => |a, b| truth(a >= b),
        Operator::And => |a, b| truth(a != 0.0 && b != 0.0),
        Operator::Or => |a, b| truth(a != 0.0 || b != 0.0),
        Operator::Positive | Operator::Negative | Operator::Not => return None,
    };
    Some(operation)
}

fn builtin_function(name: &str) -> Option<fn(f64) -> f64> {
    let function: fn(f64) -> f64 = match name.to_ascii_lowercase().as_str() {
        "sqrt" => f64::sqrt,
        "exp" => f64::exp,
        "log" => f64::ln,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "abs" => f64::abs,
        _ => return None,
    };
    Some(function)
}

fn is_integer_expression(expr: &Expression) -> bool {
    is_integer_operand(&expr.first)
        && expr.rest.iter().all(|operation| {
            matches!(
                operation.operator,
                Operator::Plus | Operator::Minus | Operator::Times
            ) && is_integer_operand(&operation.operand)
        })
}

fn is_integer_operand(operand: &Operand) -> bool {
    match operand {
        Operand::UnsignedInt(_) => true,
        Operand::Unary(unary) => {
            matches!(unary.operator, Operator::Positive | Operator::Negative)
                && is_integer_operand(&unary.operand)
        }
        Operand::Expression(expr) => is_integer_expression(expr),
        _ => false,
    }
}

/// Exact value of an integer-only expression; `None` on overflow.
fn eval_integer(expr: &Expression) -> Option<i64> {
    let mut acc = eval_integer_operand(&expr.first)?;
    for operation in &expr.rest {
        let rhs = eval_integer_operand(&operation.operand)?;
        acc = match operation.operator {
            Operator::Plus => acc.checked_add(rhs)?,
            Operator::Minus => acc.checked_sub(rhs)?,
            Operator::Times => acc.checked_mul(rhs)?,
            _ => return None,
        };
    }
    Some(acc)
}

fn eval_integer_operand(operand: &Operand) -> Option<i64> {
    match operand {
        Operand::UnsignedInt(value) => i64::try_from(*value).ok(),
        Operand::Unary(unary) => {
            let value = eval_integer_operand(&unary.operand)?;
            match unary.operator {
                Operator::Positive => Some(value),
                Operator::Negative => value.checked_neg(),
                _ => None,
            }
        }
        Operand::Expression(expr) => eval_integer(expr),
        _ => None,
    }
}

/// Build a typed buffer: integers stay `Int` until a double promotes the
/// whole vector; strings cannot mix with numbers.
fn typed_value(items: Vec<Item>) -> Option<SymbolValue> {
    let mut value = match items.first() {
        Some(Item::Text(_)) => SymbolValue::String(Vec::with_capacity(items.len())),
        _ => SymbolValue::Int(Vec::with_capacity(items.len())),
    };
    for item in items {
        match item {
            Item::Text(text) => match &mut value {
                SymbolValue::String(values) => values.push(text),
                _ => return None,
            },
            Item::Int(n) => match &mut value {
                SymbolValue::Int(values) => values.push(n),
                SymbolValue::Double(values) => values.push(n as f64),
                _ => return None,
            },
            Item::Double(d) => {
                value.promote_to_double();
                match &mut value {
                    SymbolValue::Double(values) => values.push(d),
                    _ => return None,
                }
            }
        }
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn parse(source: &str) -> Program {
        let (program, diagnostics) = Parser::new(source, "test.lat").parse();
        assert!(!diagnostics.has_errors(), "Errors: {:?}", diagnostics);
        program.expect("program")
    }

    fn evaluate(source: &str) -> Evaluator {
        let mut evaluator = Evaluator::new();
        evaluator.run(&parse(source)).expect("evaluation");
        evaluator
    }

    fn codes(evaluator: &Evaluator) -> Vec<String> {
        evaluator.diagnostics().iter().map(|d| d.code.clone()).collect()
    }

    #[test]
    fn test_precedence() {
        let evaluator = evaluate("a = 1 + 2 * 3; b = (1 + 2) * 3; c = 10 - 3 - 2; d = 8 / 4 / 2;");
        assert_eq!(evaluator.local("a"), Some(7.0));
        assert_eq!(evaluator.local("b"), Some(9.0));
        assert_eq!(evaluator.local("c"), Some(5.0));
        assert_eq!(evaluator.local("d"), Some(1.0));
        assert!(evaluator.diagnostics().is_empty());
    }

    #[test]
    fn test_comparisons_and_logic() {
        let evaluator = evaluate(
            "lt = 2 < 3; eq = 2 == 3; ne = 2 != 3; ge = 3 >= 3; \
             n = !0; m = !5; both = 1 && 0; either = 0 || 2; t = true + 1;",
        );
        assert_eq!(evaluator.local("lt"), Some(1.0));
        assert_eq!(evaluator.local("eq"), Some(0.0));
        assert_eq!(evaluator.local("ne"), Some(1.0));
        assert_eq!(evaluator.local("ge"), Some(1.0));
        assert_eq!(evaluator.local("n"), Some(1.0));
        assert_eq!(evaluator.local("m"), Some(0.0));
        assert_eq!(evaluator.local("both"), Some(0.0));
        assert_eq!(evaluator.local("either"), Some(1.0));
        assert_eq!(evaluator.local("t"), Some(2.0));
    }

    #[test]
    fn test_unary_and_locals() {
        let evaluator = evaluate("x = 4; y = -x + +2; Z = x * y;");
        assert_eq!(evaluator.local("y"), Some(-2.0));
        assert_eq!(evaluator.local("z"), Some(-8.0));
        assert_eq!(evaluator.definitions().len(), 3);
        assert_eq!(evaluator.definitions()[2].to_string(), "Z = -8");
    }

    #[test]
    fn test_builtin_functions() {
        let evaluator = evaluate("r = sqrt(16); a = ABS(-2.5); p = pi; e = exp(0);");
        assert_eq!(evaluator.local("r"), Some(4.0));
        assert_eq!(evaluator.local("a"), Some(2.5));
        assert_eq!(evaluator.local("p"), Some(std::f64::consts::PI));
        assert_eq!(evaluator.local("e"), Some(1.0));
    }

    #[test]
    fn test_pi_is_a_local_only() {
        let evaluator = Evaluator::new();
        assert_eq!(evaluator.local("PI"), Some(std::f64::consts::PI));
        assert!(evaluator.symbols().is_empty());
    }

    #[test]
    fn test_undefined_identifier_is_not_fatal() {
        let evaluator = evaluate("y = x + 1; z = 2 * 3;");
        assert_eq!(evaluator.local("y"), None);
        assert_eq!(evaluator.local("z"), Some(6.0));
        assert_eq!(evaluator.stack_depth(), 0);
        assert_eq!(codes(&evaluator), vec!["W201", "W200"]);

        let warning = evaluator.diagnostics().iter().next().expect("warning");
        assert_eq!(warning.file, "test.lat");
        assert!(!warning.is_error());
        assert!(warning.message.contains("'x'"));
    }

    #[test]
    fn test_unresolved_operand_mid_chain_keeps_stack_balanced() {
        let evaluator = evaluate("a = 1 + 2 * (3 + missing); b = 1;");
        assert_eq!(evaluator.stack_depth(), 0);
        assert_eq!(evaluator.local("a"), None);
        assert_eq!(evaluator.local("b"), Some(1.0));
    }

    #[test]
    fn test_function_and_string_warnings() {
        let evaluator = evaluate("a = foo(1); b = sqrt(1, 2); c = \"s\" + 1;");
        assert_eq!(
            codes(&evaluator),
            vec!["W204", "W200", "W205", "W200", "W203", "W200"]
        );
    }

    #[test]
    fn test_element_symbols() {
        let evaluator = evaluate(
            "Q1: QUAD, L = 0.5, K1 = (1, 2.5), N = (1, 2), TAG = \"Q\";\nk = Q1.L * 2;",
        );
        let symbols = evaluator.symbols();

        assert_eq!(
            symbols.lookup("q1").map(|s| &s.value),
            Some(&SymbolValue::String(vec!["QUAD".to_string()]))
        );
        assert_eq!(
            symbols.lookup("Q1.K1").map(|s| &s.value),
            Some(&SymbolValue::Double(vec![1.0, 2.5]))
        );
        assert_eq!(
            symbols.lookup("Q1.N").map(|s| &s.value),
            Some(&SymbolValue::Int(vec![1, 2]))
        );
        assert_eq!(
            symbols.lookup("Q1.TAG").map(|s| &s.value),
            Some(&SymbolValue::String(vec!["Q".to_string()]))
        );
        assert_eq!(evaluator.local("k"), Some(1.0));

        assert_eq!(
            evaluator.definitions()[0].to_string(),
            "Q1: QUAD, L = 0.5, K1 = (1, 2.5), N = (1, 2), TAG = \"Q\""
        );
    }

    #[test]
    fn test_integer_properties_are_exact() {
        let evaluator = evaluate(
            "Q: M, N = 9007199254740993, C = -(2 * 3) + 1, B = 18446744073709551615;",
        );
        let symbols = evaluator.symbols();
        assert_eq!(
            symbols.lookup("Q.N").map(|s| &s.value),
            Some(&SymbolValue::Int(vec![9007199254740993]))
        );
        assert_eq!(
            symbols.lookup("Q.C").map(|s| &s.value),
            Some(&SymbolValue::Int(vec![-5]))
        );
        assert_eq!(
            symbols.lookup("Q.B").map(|s| s.dtype()),
            Some(crate::symbol::DataType::Double)
        );
        assert_eq!(codes(&evaluator), vec!["W208"]);
    }

    #[test]
    fn test_unresolved_property_reference() {
        let evaluator = evaluate("k = Q9.K1;");
        assert_eq!(codes(&evaluator), vec!["W202", "W200"]);
    }

    #[test]
    fn test_action_definition() {
        let evaluator = evaluate("twiss, file = \"out.txt\", turns = 10;");
        match &evaluator.definitions()[0] {
            Definition::Action { name, properties } => {
                assert_eq!(name, "twiss");
                assert_eq!(properties.len(), 2);
                assert_eq!(properties[1].value, SymbolValue::Int(vec![10]));
            }
            other => panic!("expected action, got {:?}", other),
        }
        assert!(evaluator.symbols().lookup("twiss.file").is_some());
    }

    #[test]
    fn test_mixed_property_is_warning() {
        let evaluator = evaluate("M: MARKER, TAGS = (\"a\", 1);");
        assert_eq!(codes(&evaluator), vec!["W208"]);
        assert_eq!(
            evaluator.symbols().lookup("M.TAGS").map(|s| &s.value),
            Some(&SymbolValue::None)
        );
    }

    #[test]
    fn test_beamline_flattening() {
        let evaluator = evaluate(
            "A: DRIFT, L = 1; C: QUAD; D: SBEND;\n\
             B: line = C + D;\n\
             L: line = 2*A + -B;",
        );
        let expected: Vec<String> = ["A", "A", "D", "C"].iter().map(|s| s.to_string()).collect();

        assert_eq!(
            evaluator.symbols().lookup("L").map(|s| &s.value),
            Some(&SymbolValue::String(expected.clone()))
        );
        match evaluator.definitions().last() {
            Some(Definition::Beamline { name, elements }) => {
                assert_eq!(name, "L");
                assert_eq!(elements, &expected);
            }
            other => panic!("expected beamline, got {:?}", other),
        }
        assert!(evaluator.diagnostics().is_empty());
    }

    #[test]
    fn test_beamline_repetition_and_grouping() {
        let evaluator = evaluate("A: DRIFT; B: QUAD; cell: line = (A + B) * 2; ring: line = 2 * cell;");
        let ring = evaluator.definitions().last().expect("ring").to_string();
        assert_eq!(ring, "ring: line = (A, B, A, B, A, B, A, B)");
    }

    #[test]
    fn test_beamline_unknown_member() {
        let evaluator = evaluate("A: DRIFT; L: line = A + X; M: line = A - A;");
        assert_eq!(codes(&evaluator), vec!["W209", "W209"]);
        assert!(evaluator.symbols().lookup("L").is_none());
        assert!(evaluator.symbols().lookup("M").is_none());
    }

    #[test]
    fn test_nested_blocks_and_include_warning() {
        let evaluator = evaluate("{ a = 1; { b = a + 1; } }\ninclude \"other.lat\";");
        assert_eq!(evaluator.local("b"), Some(2.0));
        assert_eq!(codes(&evaluator), vec!["W207"]);
        assert_eq!(evaluator.diagnostics().iter().next().map(|d| d.file.as_str()), Some("test.lat"));
    }

    #[test]
    fn test_stack_overflow_is_fatal() {
        let program = parse("x = 1 + (2 + (3 + 4));");
        let mut evaluator = Evaluator::with_options(EvalOptions {
            stack_limit: 2,
            ..EvalOptions::default()
        });
        assert_eq!(
            evaluator.run(&program),
            Err(EvalError::StackOverflow { limit: 2 })
        );
        assert_eq!(evaluator.stack_depth(), 0);
    }

    #[test]
    fn test_nesting_limit_is_fatal() {
        let program = parse("x = ((((1))));");
        let mut evaluator = Evaluator::with_options(EvalOptions {
            max_depth: 0,
            ..EvalOptions::default()
        });
        // Parenthesised single operands collapse, so the chain is flat.
        assert!(evaluator.run(&program).is_ok());

        let program = parse("x = 1 + (2 + 3);");
        let mut evaluator = Evaluator::with_options(EvalOptions {
            max_depth: 0,
            ..EvalOptions::default()
        });
        assert_eq!(
            evaluator.run(&program),
            Err(EvalError::NestingTooDeep { limit: 0 })
        );
    }

    #[test]
    fn test_value_stack() {
        let mut stack = ValueStack::new(1);
        assert_eq!(stack.pop(), Err(EvalError::StackUnderflow));
        stack.push(1.5).expect("push");
        assert_eq!(stack.peek(), Some(1.5));
        assert_eq!(stack.push(2.0), Err(EvalError::StackOverflow { limit: 1 }));
        assert_eq!(stack.pop(), Ok(1.5));
        assert!(stack.is_empty());
    }
}
