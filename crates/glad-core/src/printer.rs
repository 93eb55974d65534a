//! Source-like rendering of the AST.
//!
//! Nested expression operands are always parenthesised, so the rendering
//! shows exactly how the parser grouped each chain.

use std::fmt;

use crate::ast::*;

fn write_double(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    let text = format!("{:?}", value);
    if !value.is_finite() || text.contains('.') {
        return f.write_str(&text);
    }
    // Keep a fractional part so the rendering re-reads as a double.
    match text.find('e') {
        Some(exp) => write!(f, "{}.0{}", &text[..exp], &text[exp..]),
        None => write!(f, "{}.0", text),
    }
}

fn write_separated<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    separator: &str,
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Nil => f.write_str("nil"),
            Operand::Bool(v) => write!(f, "{}", v),
            Operand::UnsignedInt(v) => write!(f, "{}", v),
            Operand::Double(v) => write_double(f, *v),
            Operand::Identifier(id) => f.write_str(&id.name),
            Operand::String(s) => write!(f, "\"{}\"", s.value),
            Operand::Unary(unary) => write!(f, "{}{}", unary.operator.symbol(), unary.operand),
            Operand::FunctionCall(call) => {
                write!(f, "{}(", call.name.name)?;
                write_separated(f, &call.args, ", ")?;
                f.write_str(")")
            }
            Operand::Expression(expr) => write!(f, "({})", expr),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for operation in &self.rest {
            write!(f, " {} {}", operation.operator.symbol(), operation.operand)?;
        }
        Ok(())
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.name.name)?;
        if self.is_vector() {
            f.write_str("(")?;
            write_separated(f, &self.values, ", ")?;
            f.write_str(")")
        } else {
            write_separated(f, &self.values, ", ")
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Assignment(a) => write!(f, "{} = {};", a.lhs.name, a.rhs),
            Statement::Element(e) => {
                write!(f, "{}: {}", e.name.name, e.element_type.name)?;
                for property in &e.properties {
                    write!(f, ", {}", property)?;
                }
                f.write_str(";")
            }
            Statement::Action(a) => {
                f.write_str(&a.name.name)?;
                for property in &a.properties {
                    write!(f, ", {}", property)?;
                }
                f.write_str(";")
            }
            Statement::Beamline(b) => write!(f, "{}: line = {};", b.name.name, b.line),
            Statement::Include(i) => write!(f, "include \"{}\";", i.filename.value),
            Statement::List(list) => {
                f.write_str("{")?;
                for statement in &list.statements {
                    write!(f, " {}", statement)?;
                }
                f.write_str(" }")
            }
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            writeln!(f, "{}", statement)?;
        }
        Ok(())
    }
}
