//! Parser for the GLAD lattice language.
//!
//! Recursive descent over the token stream. Expressions are parsed in layers,
//! lowest precedence first:
//!
//! ```text
//! expr           := logical_or
//! logical_or     := logical_and ('||' logical_and)*
//! logical_and    := equality ('&&' equality)*
//! equality       := relational (('==' | '!=') relational)*
//! relational     := additive (('<' | '<=' | '>' | '>=') additive)*
//! additive       := multiplicative (('+' | '-') multiplicative)*
//! multiplicative := unary (('*' | '/') unary)*
//! unary          := primary | ('+' | '-' | '!') unary
//! primary        := double | uint | call | identifier | bool | '(' expr ')' | string
//! ```
//!
//! A syntax error aborts the file with a single diagnostic at the point where
//! parsing stopped.

use tracing::debug;

use crate::annotation::PositionTable;
use crate::ast::*;
use crate::diagnostics::{self, Diagnostic, Diagnostics};
use crate::lexer::{self, Lexer, Token, TokenKind};
use crate::span::{self, Span};

/// Maximum nesting of parentheses, unary operators, calls and blocks.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Parser for the GLAD lattice language.
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    positions: PositionTable,
    file_path: String,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, file_path: impl Into<String>) -> Self {
        Self::with_positions(source, file_path, PositionTable::new())
    }

    /// Create a parser that continues numbering annotations from an existing
    /// table, so ids stay unique across several files.
    pub fn with_positions(
        source: &'a str,
        file_path: impl Into<String>,
        positions: PositionTable,
    ) -> Self {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();

        Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
            positions,
            file_path: file_path.into(),
        }
    }

    /// Parse the entire file.
    pub fn parse(mut self) -> (Option<Program>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let mut statements = Vec::new();

        while !self.is_at_end() {
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(diag) => {
                    debug!(file = %self.file_path, code = %diag.code, "parse aborted");
                    diagnostics.push(diag);
                    return (None, diagnostics);
                }
            }
        }

        debug!(
            file = %self.file_path,
            statements = statements.len(),
            annotations = self.positions.len(),
            "parsed"
        );
        let program = Program {
            statements,
            positions: self.positions,
        };
        (Some(program), diagnostics)
    }

    /// Parse the whole input as a single expression.
    pub fn parse_expression_input(mut self) -> (Option<Expression>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let result = self.parse_expression().and_then(|expr| {
            if self.is_at_end() {
                Ok(expr)
            } else {
                Err(self.error_expecting("E007", "an operator or end of input"))
            }
        });
        match result {
            Ok(expr) => (Some(expr), diagnostics),
            Err(diag) => {
                diagnostics.push(diag);
                (None, diagnostics)
            }
        }
    }

    // Statements

    fn parse_statement(&mut self) -> Result<Statement, Diagnostic> {
        match self.current().kind {
            TokenKind::LBrace => self.parse_compound().map(Statement::List),
            TokenKind::Identifier => {
                if self.current().text == "include" && self.peek(1) == TokenKind::String {
                    return self.parse_include().map(Statement::Include);
                }
                match self.peek(1) {
                    TokenKind::Equals => self.parse_assignment().map(Statement::Assignment),
                    TokenKind::Colon => {
                        if self.is_line_keyword(2) && self.peek(3) == TokenKind::Equals {
                            self.parse_beamline().map(Statement::Beamline)
                        } else {
                            self.parse_element().map(Statement::Element)
                        }
                    }
                    TokenKind::Comma => self.parse_action().map(Statement::Action),
                    _ => {
                        self.advance();
                        Err(self.error_expecting("E002", "'=', ':' or ','"))
                    }
                }
            }
            kind if kind.is_reserved() => Err(self.error_expecting("E004", "identifier")),
            _ => Err(self.error_expecting("E001", "statement")),
        }
    }

    /// `'{' statement* '}'`
    fn parse_compound(&mut self) -> Result<StatementList, Diagnostic> {
        let start_span = self.current_span();
        self.expect(TokenKind::LBrace)?;
        self.enter()?;

        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.is_at_end() {
                return Err(self.error_expecting("E007", "'}'"));
            }
            statements.push(self.parse_statement()?);
        }
        self.advance();
        self.leave();

        Ok(StatementList {
            statements,
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// `identifier '=' expr ';'`
    fn parse_assignment(&mut self) -> Result<Assignment, Diagnostic> {
        let start_span = self.current_span();
        let lhs = self.parse_annotated_identifier()?;
        self.expect(TokenKind::Equals)?;
        let rhs = self.parse_expression()?;
        self.expect_described(TokenKind::Semicolon, "an operator or ';'")?;

        Ok(Assignment {
            lhs,
            rhs,
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// `identifier ':' identifier (',' property)* ';'`
    fn parse_element(&mut self) -> Result<ElementStatement, Diagnostic> {
        let start_span = self.current_span();
        let name = self.parse_annotated_identifier()?;
        self.expect(TokenKind::Colon)?;
        let element_type = self.parse_identifier()?;

        let mut properties = Vec::new();
        while self.eat(TokenKind::Comma) {
            properties.push(self.parse_property()?);
        }
        self.expect_described(TokenKind::Semicolon, "',' or ';'")?;

        Ok(ElementStatement {
            name,
            element_type,
            properties,
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// `identifier (',' property)+ ';'`
    fn parse_action(&mut self) -> Result<ActionStatement, Diagnostic> {
        let start_span = self.current_span();
        let name = self.parse_annotated_identifier()?;

        let mut properties = Vec::new();
        self.expect(TokenKind::Comma)?;
        properties.push(self.parse_property()?);
        while self.eat(TokenKind::Comma) {
            properties.push(self.parse_property()?);
        }
        self.expect_described(TokenKind::Semicolon, "',' or ';'")?;

        Ok(ActionStatement {
            name,
            properties,
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// `identifier ':' "line" '=' expr ';'`
    fn parse_beamline(&mut self) -> Result<BeamlineStatement, Diagnostic> {
        let start_span = self.current_span();
        let name = self.parse_annotated_identifier()?;
        self.expect(TokenKind::Colon)?;
        if !self.is_line_keyword(0) {
            return Err(self.error_expecting("E007", "'line'"));
        }
        self.advance();
        self.expect(TokenKind::Equals)?;
        let line = self.parse_expression()?;
        self.expect_described(TokenKind::Semicolon, "an operator or ';'")?;

        Ok(BeamlineStatement {
            name,
            line,
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// `"include" quoted-string ';'`
    fn parse_include(&mut self) -> Result<IncludeStatement, Diagnostic> {
        let start_span = self.current_span();
        self.advance();
        let filename = self.parse_quoted_string()?;
        self.expect(TokenKind::Semicolon)?;

        Ok(IncludeStatement {
            filename,
            origin: self.file_path.clone(),
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// `identifier '=' expr | identifier '=' '(' expr (',' expr)* ')'`
    fn parse_property(&mut self) -> Result<Property, Diagnostic> {
        let start_span = self.current_span();
        let name = self.parse_identifier()?;
        self.expect(TokenKind::Equals)?;

        let values = if self.check(TokenKind::LParen) {
            self.parse_property_values()?
        } else {
            vec![self.parse_expression()?]
        };

        Ok(Property {
            name,
            values,
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// A parenthesised list is a vector only when it holds more than one value
    /// and ends the property. Otherwise it is re-read as a single expression,
    /// e.g. `(1 + 2) * 3`.
    fn parse_property_values(&mut self) -> Result<Vec<Expression>, Diagnostic> {
        let (pos, depth, annotations) = (self.pos, self.depth, self.positions.len());

        let vector_error = match self.parse_vector() {
            Ok(values) if values.len() > 1 => {
                if matches!(self.current().kind, TokenKind::Comma | TokenKind::Semicolon) {
                    return Ok(values);
                }
                Some(self.error_expecting("E007", "',' or ';'"))
            }
            Ok(_) => None,
            Err(diag) => Some(diag),
        };

        self.pos = pos;
        self.depth = depth;
        self.positions.rewind(annotations);

        match self.parse_expression() {
            Ok(expr) => Ok(vec![expr]),
            Err(expr_error) => Err(match vector_error {
                Some(diag) if diag.span.start.offset > expr_error.span.start.offset => diag,
                _ => expr_error,
            }),
        }
    }

    fn parse_vector(&mut self) -> Result<Vec<Expression>, Diagnostic> {
        self.expect(TokenKind::LParen)?;
        self.enter()?;
        let mut values = vec![self.parse_expression()?];
        while self.eat(TokenKind::Comma) {
            values.push(self.parse_expression()?);
        }
        self.expect_described(TokenKind::RParen, "',' or ')'")?;
        self.leave();
        Ok(values)
    }

    // Expressions

    pub(crate) fn parse_expression(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_chain(Self::parse_logical_and, |kind| match kind {
            TokenKind::OrOr => Some(Operator::Or),
            _ => None,
        })
    }

    fn parse_logical_and(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_chain(Self::parse_equality, |kind| match kind {
            TokenKind::AndAnd => Some(Operator::And),
            _ => None,
        })
    }

    fn parse_equality(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_chain(Self::parse_relational, |kind| match kind {
            TokenKind::EqEq => Some(Operator::Equal),
            TokenKind::NotEq => Some(Operator::NotEqual),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_chain(Self::parse_additive, |kind| match kind {
            TokenKind::Less => Some(Operator::Less),
            TokenKind::LessEq => Some(Operator::LessEqual),
            TokenKind::Greater => Some(Operator::Greater),
            TokenKind::GreaterEq => Some(Operator::GreaterEqual),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_chain(Self::parse_multiplicative, |kind| match kind {
            TokenKind::Plus => Some(Operator::Plus),
            TokenKind::Minus => Some(Operator::Minus),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_chain(Self::parse_unary_expression, |kind| match kind {
            TokenKind::Star => Some(Operator::Times),
            TokenKind::Slash => Some(Operator::Divide),
            _ => None,
        })
    }

    /// One precedence layer: `next (op next)*`. A layer without operators
    /// returns its single operand's expression unchanged.
    fn parse_chain(
        &mut self,
        next: fn(&mut Self) -> Result<Expression, Diagnostic>,
        operator: fn(TokenKind) -> Option<Operator>,
    ) -> Result<Expression, Diagnostic> {
        let first = next(self)?;
        let mut span = first.span;
        let mut rest = Vec::new();

        while let Some(op) = operator(self.current().kind) {
            self.advance();
            let operand = next(self)?;
            span = span.merge(&operand.span);
            rest.push(Operation {
                operator: op,
                operand: operand.into_operand(),
            });
        }

        if rest.is_empty() {
            return Ok(first);
        }
        Ok(Expression {
            first: first.into_operand(),
            rest,
            span,
        })
    }

    fn parse_unary_expression(&mut self) -> Result<Expression, Diagnostic> {
        let start_span = self.current_span();
        let operand = self.parse_unary()?;
        Ok(Expression::operand(
            operand,
            start_span.merge(&self.previous_span()),
        ))
    }

    fn parse_unary(&mut self) -> Result<Operand, Diagnostic> {
        let operator = match self.current().kind {
            TokenKind::Plus => Operator::Positive,
            TokenKind::Minus => Operator::Negative,
            TokenKind::Bang => Operator::Not,
            _ => return self.parse_primary(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Operand::Unary(Box::new(Unary { operator, operand })))
    }

    fn parse_primary(&mut self) -> Result<Operand, Diagnostic> {
        match self.current().kind {
            TokenKind::Double => {
                let token = self.advance();
                token
                    .text
                    .parse::<f64>()
                    .map(Operand::Double)
                    .map_err(|_| self.literal_error(&token, "double"))
            }
            TokenKind::UnsignedInt => {
                let token = self.advance();
                token
                    .text
                    .parse::<u64>()
                    .map(Operand::UnsignedInt)
                    .map_err(|_| self.literal_error(&token, "unsigned integer"))
            }
            TokenKind::Identifier => {
                if self.peek(1) == TokenKind::LParen {
                    self.parse_function_call()
                } else {
                    self.parse_annotated_identifier().map(Operand::Identifier)
                }
            }
            TokenKind::True => {
                self.advance();
                Ok(Operand::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Operand::Bool(false))
            }
            TokenKind::LParen => {
                self.advance();
                self.enter()?;
                let expr = self.parse_expression()?;
                self.expect_described(TokenKind::RParen, "an operator or ')'")?;
                self.leave();
                Ok(expr.into_operand())
            }
            TokenKind::String => self.parse_quoted_string().map(Operand::String),
            _ => Err(self.error_expecting("E003", "expression")),
        }
    }

    /// `identifier '(' (expr (',' expr)*)? ')'`
    fn parse_function_call(&mut self) -> Result<Operand, Diagnostic> {
        let start_span = self.current_span();
        let name = self.parse_annotated_identifier()?;
        self.expect(TokenKind::LParen)?;
        self.enter()?;

        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            args.push(self.parse_expression()?);
            while self.eat(TokenKind::Comma) {
                args.push(self.parse_expression()?);
            }
        }
        self.expect_described(TokenKind::RParen, "',' or ')'")?;
        self.leave();

        Ok(Operand::FunctionCall(FunctionCall {
            name,
            args,
            span: start_span.merge(&self.previous_span()),
        }))
    }

    // Terminals

    fn parse_identifier(&mut self) -> Result<Identifier, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            if lexer::has_reserved_head(&self.current().text) {
                let mut diag = self.error_expecting("E004", "identifier");
                diag.help = Some(format!(
                    "'{}' starts with a reserved word",
                    self.current().text
                ));
                return Err(diag);
            }
            let token = self.advance();
            Ok(Identifier::new(token.text, token.span))
        } else {
            Err(self.error_expecting("E004", "identifier"))
        }
    }

    /// Parse an identifier and record its position.
    fn parse_annotated_identifier(&mut self) -> Result<Identifier, Diagnostic> {
        let mut identifier = self.parse_identifier()?;
        identifier.id = Some(
            self.positions
                .annotate(&self.file_path, identifier.span.start),
        );
        Ok(identifier)
    }

    fn parse_quoted_string(&mut self) -> Result<QuotedString, Diagnostic> {
        if self.check(TokenKind::String) {
            let token = self.advance();
            let inner = &token.text[1..token.text.len() - 1];
            Ok(QuotedString::new(inner, token.span))
        } else {
            Err(self.error_expecting("E005", "quoted string"))
        }
    }

    // Helper methods

    fn current(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or(&self.tokens[self.tokens.len() - 1])
    }

    fn peek(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn is_line_keyword(&self, n: usize) -> bool {
        self.tokens.get(self.pos + n).is_some_and(|t| {
            t.kind == TokenKind::Identifier && t.text.eq_ignore_ascii_case("line")
        })
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn previous_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        self.expect_described(kind, kind.describe())
    }

    fn expect_described(&mut self, kind: TokenKind, expected: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_expecting("E007", expected))
        }
    }

    fn enter(&mut self) -> Result<(), Diagnostic> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            let token = self.current();
            return Err(Diagnostic::error(
                "E008",
                format!("nesting deeper than {} levels", MAX_NESTING_DEPTH),
            )
            .with_file(&self.file_path)
            .with_span(token.span)
            .with_context(span::line_at(self.source, token.span.start.offset))
            .build());
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn error_expecting(&self, code: &str, expected: &str) -> Diagnostic {
        let token = self.current();
        let code = if token.kind == TokenKind::Error {
            "E009"
        } else {
            code
        };
        let mut diag =
            diagnostics::expectation(self.source, &self.file_path, code, expected, token.span);
        diag.help = Some(match token.kind {
            TokenKind::Eof => "found end of input".to_string(),
            TokenKind::Identifier | TokenKind::Error => {
                format!("found {} '{}'", token.kind.describe(), token.text)
            }
            kind if kind.is_reserved() => {
                format!("'{}' is a reserved word", token.text)
            }
            kind => format!("found {}", kind.describe()),
        });
        diag
    }

    fn literal_error(&self, token: &Token, what: &str) -> Diagnostic {
        Diagnostic::error(
            "E006",
            format!("{} literal '{}' is out of range", what, token.text),
        )
        .with_file(&self.file_path)
        .with_span(token.span)
        .with_context(span::line_at(self.source, token.span.start.offset))
        .build()
    }
}
