//! Lexer for the GLAD lattice language.
//!
//! Uses the `logos` crate for tokenization. Numeric literals follow the
//! strict-decimal-first rule: anything with a `.` is a double, a bare digit
//! run is an unsigned integer.

use logos::{FilterResult, Logos};

use crate::span::{Position, Span};

/// Token kinds for the GLAD lattice language.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    // Reserved words
    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("if")]
    If,

    #[token("else")]
    Else,

    #[token("while")]
    While,

    #[token("int")]
    Int,

    #[token("void")]
    Void,

    #[token("return")]
    Return,

    // Operators
    #[token("||")]
    OrOr,

    #[token("&&")]
    AndAnd,

    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token("<=")]
    LessEq,

    #[token("<")]
    Less,

    #[token(">=")]
    GreaterEq,

    #[token(">")]
    Greater,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("!")]
    Bang,

    // Punctuation
    #[token("=")]
    Equals,

    #[token(":")]
    Colon,

    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    /// Dotted names (`Q1.K1`) refer to element properties.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*")]
    Identifier,

    /// Double-quoted string; no escape processing.
    #[regex(r#""[^"]*""#)]
    String,

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?")]
    Double,

    #[regex(r"[0-9]+")]
    UnsignedInt,

    #[regex(r"#[^\n]*")]
    Comment,

    /// `/* ... */`, non-nesting. Skipped inside the logos lexer; an
    /// unterminated comment becomes an `Error` token.
    #[token("/*", block_comment)]
    BlockComment,

    /// A character that does not start any token.
    Error,

    Eof,
}

/// Words that can never be used as names.
pub const RESERVED_WORDS: [&str; 8] = [
    "true", "false", "if", "else", "while", "int", "void", "return",
];

/// Whether an identifier's first dotted segment is a reserved word, as in
/// `true.x`.
pub fn has_reserved_head(text: &str) -> bool {
    let head = text.split('.').next().unwrap_or(text);
    RESERVED_WORDS.contains(&head)
}

fn block_comment(lex: &mut logos::Lexer<TokenKind>) -> FilterResult<(), ()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            FilterResult::Error(())
        }
    }
}

impl TokenKind {
    pub fn is_trivia(&self) -> bool {
        matches!(self, TokenKind::Comment | TokenKind::BlockComment)
    }

    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            TokenKind::True
                | TokenKind::False
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::Int
                | TokenKind::Void
                | TokenKind::Return
        )
    }

    /// Human-readable description used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::True | TokenKind::False => "boolean",
            TokenKind::If
            | TokenKind::Else
            | TokenKind::While
            | TokenKind::Int
            | TokenKind::Void
            | TokenKind::Return => "reserved word",
            TokenKind::OrOr => "'||'",
            TokenKind::AndAnd => "'&&'",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::LessEq => "'<='",
            TokenKind::Less => "'<'",
            TokenKind::GreaterEq => "'>='",
            TokenKind::Greater => "'>'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Bang => "'!'",
            TokenKind::Equals => "'='",
            TokenKind::Colon => "':'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Identifier => "identifier",
            TokenKind::String => "quoted string",
            TokenKind::Double => "double",
            TokenKind::UnsignedInt => "unsigned integer",
            TokenKind::Comment | TokenKind::BlockComment => "comment",
            TokenKind::Error => "invalid character",
            TokenKind::Eof => "end of input",
        }
    }
}

/// A token with its kind, text, and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }
}

/// Lexer for the GLAD lattice language.
pub struct Lexer<'a> {
    source: &'a str,
    inner: logos::Lexer<'a, TokenKind>,
    // Line tracking; tokens arrive in order so scanning only moves forward.
    scanned: usize,
    current_line: usize,
    line_start_offset: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            inner: TokenKind::lexer(source),
            scanned: 0,
            current_line: 1,
            line_start_offset: 0,
            finished: false,
        }
    }

    /// Get the position of a byte offset at or after the last one requested.
    fn position(&mut self, offset: usize) -> Position {
        if offset > self.scanned {
            for (i, b) in self.source.as_bytes()[self.scanned..offset].iter().enumerate() {
                if *b == b'\n' {
                    self.current_line += 1;
                    self.line_start_offset = self.scanned + i + 1;
                }
            }
            self.scanned = offset;
        }
        // Columns count characters, matching `Position::from_offset`.
        let column = self
            .source
            .get(self.line_start_offset..offset)
            .map_or(offset - self.line_start_offset, |line| line.chars().count())
            + 1;
        Position::new(self.current_line, column, offset)
    }

    fn eof_token(&mut self) -> Token {
        let pos = self.position(self.source.len());
        Token::new(TokenKind::Eof, "", Span::new(pos, pos))
    }

    /// Get the next non-trivia token.
    pub fn next_token(&mut self) -> Token {
        if self.finished {
            return self.eof_token();
        }

        loop {
            match self.inner.next() {
                Some(result) => {
                    let range = self.inner.span();
                    let text = self.inner.slice();
                    let kind = result.unwrap_or(TokenKind::Error);
                    if kind.is_trivia() {
                        continue;
                    }
                    let start = self.position(range.start);
                    let end = self.position(range.end);
                    return Token::new(kind, text, Span::new(start, end));
                }
                None => {
                    self.finished = true;
                    return self.eof_token();
                }
            }
        }
    }

    /// Tokenize the entire source. The last token is always `Eof`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source).tokenize().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(kinds("3"), vec![TokenKind::UnsignedInt, TokenKind::Eof]);
        assert_eq!(kinds("3.0"), vec![TokenKind::Double, TokenKind::Eof]);
        assert_eq!(kinds("3.5e-2"), vec![TokenKind::Double, TokenKind::Eof]);
        assert_eq!(kinds(".25"), vec![TokenKind::Double, TokenKind::Eof]);
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        assert_eq!(kinds("if"), vec![TokenKind::If, TokenKind::Eof]);
        assert_eq!(kinds("ifx"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("if2"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("return_"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("truex"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("true"), vec![TokenKind::True, TokenKind::Eof]);
    }

    #[test]
    fn test_dotted_identifier() {
        let tokens = Lexer::new("Q1.K1 * 2").tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].text, "Q1.K1");
        assert_eq!(tokens[1].kind, TokenKind::Star);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("<= < >= > == != && || !"),
            vec![
                TokenKind::LessEq,
                TokenKind::Less,
                TokenKind::GreaterEq,
                TokenKind::Greater,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "a # trailing comment\n/* block\n comment */ b";
        assert_eq!(
            kinds(source),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn test_block_comment_with_stars() {
        assert_eq!(
            kinds("a /* a ** b */ b /***/ c /* x * / y */"),
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        let tokens = Lexer::new("a /* open").tokenize();
        assert_eq!(tokens[1].kind, TokenKind::Error);
        assert_eq!(tokens[1].text, "/* open");
        assert_eq!(tokens[2].kind, TokenKind::Eof);
    }

    #[test]
    fn test_reserved_head() {
        assert!(has_reserved_head("true.y"));
        assert!(has_reserved_head("if"));
        assert!(!has_reserved_head("if2.x"));
        assert!(!has_reserved_head("q1.true"));
    }

    #[test]
    fn test_strings_are_not_escaped() {
        let tokens = Lexer::new(r#""a\nb""#).tokenize();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, r#""a\nb""#);
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("x = 1;\n  Q1: QUAD;").tokenize();
        let q1 = &tokens[4];
        assert_eq!(q1.text, "Q1");
        assert_eq!(q1.span.start.line, 2);
        assert_eq!(q1.span.start.column, 3);
        assert_eq!(q1.span.start.offset, 9);
    }

    #[test]
    fn test_columns_count_characters() {
        let source = "s = \"é\"; x = 1;";
        let tokens = Lexer::new(source).tokenize();
        let x = tokens.iter().find(|t| t.text == "x").expect("x token");
        assert_eq!(x.span.start.offset, 10);
        assert_eq!(x.span.start.column, 10);
        assert_eq!(x.span.start, Position::from_offset(source, 10));
    }

    #[test]
    fn test_invalid_character() {
        assert_eq!(
            kinds("a @ b"),
            vec![
                TokenKind::Identifier,
                TokenKind::Error,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }
}
