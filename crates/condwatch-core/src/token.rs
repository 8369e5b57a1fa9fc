//! Tokenizer for condition expressions.
//!
//! Turns a single-line expression such as `flag("door") && chapterDeaths() < 10`
//! into a flat sequence of [`Token`]s. The watcher only needs this stage: the
//! [`TokenKind::Function`] tokens are exactly the sensor names an expression
//! depends on.

use std::fmt;

/// A byte range into the source expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Literal flavours recognised by the tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Bool,
    Number,
    Str,
}

/// Operators, in every accepted spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Operator {
    /// Canonical spelling, used in diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Rem => "%",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Punctuation tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    Comma,
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A boolean, number, or string literal.
    Literal(LiteralKind),
    /// A bare name that is not followed by `(`.
    ///
    /// The language has no variables, so the parser rejects these; the
    /// tokenizer still reports them so diagnostics can point at them.
    Identifier,
    /// A name immediately followed by `(`.
    Function,
    Operator(Operator),
    Punct(Punct),
}

/// A typed unit of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text of the token. String literals hold their unquoted,
    /// unescaped content; function tokens hold the function name.
    pub value: String,
    pub span: Span,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            value: value.into(),
            span,
        }
    }

    /// Whether this token names a function call.
    pub fn is_function(&self) -> bool {
        self.kind == TokenKind::Function
    }
}

/// Malformed expression text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("syntax error at offset {position}: {message} (near {context:?})")]
pub struct SyntaxError {
    /// What went wrong.
    pub message: String,
    /// Byte offset into the source.
    pub position: usize,
    /// The source fragment around `position`.
    pub context: String,
}

impl SyntaxError {
    pub(crate) fn at(source: &str, position: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position,
            context: context_at(source, position),
        }
    }
}

/// Up to 16 bytes of source starting at `position`, clipped to char boundaries.
fn context_at(source: &str, position: usize) -> String {
    let start = position.min(source.len());
    let mut end = (start + 16).min(source.len());
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    if start >= end {
        return "<end of input>".to_string();
    }
    source[start..end].to_string()
}

/// Words the lexer reads as literals or operators, matched ASCII
/// case-insensitively.
pub const KEYWORDS: [&str; 5] = ["true", "false", "and", "or", "not"];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// Whether `name` could be written as a function name: identifier
/// characters and not a keyword.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => chars.all(is_ident_continue) && !is_keyword(name),
        _ => false,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Tokenize an expression.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

/// Distinct function names in `source`, in first-occurrence order.
pub fn function_names(source: &str) -> Result<Vec<String>, SyntaxError> {
    let mut names: Vec<String> = Vec::new();
    for token in tokenize(source)? {
        if token.is_function() && !names.contains(&token.value) {
            names.push(token.value);
        }
    }
    Ok(names)
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, position: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError::at(self.source, position, message)
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        while let Some(c) = self.peek() {
            let start = self.pos;
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '"' | '\'' => self.string(c)?,
                c if c.is_ascii_digit() => self.number(),
                c if is_ident_start(c) => self.word(),
                '(' => self.single(TokenKind::Punct(Punct::LParen)),
                ')' => self.single(TokenKind::Punct(Punct::RParen)),
                ',' => self.single(TokenKind::Punct(Punct::Comma)),
                _ => {
                    let op = self.operator().ok_or_else(|| {
                        self.error(start, format!("unexpected character {c:?}"))
                    })?;
                    let span = Span::new(start, self.pos);
                    let text = &self.source[start..self.pos];
                    self.tokens
                        .push(Token::new(TokenKind::Operator(op), text, span));
                }
            }
        }
        Ok(self.tokens)
    }

    fn single(&mut self, kind: TokenKind) {
        let start = self.pos;
        if let Some(c) = self.bump() {
            self.tokens
                .push(Token::new(kind, c.to_string(), Span::new(start, self.pos)));
        }
    }

    fn string(&mut self, quote: char) -> Result<(), SyntaxError> {
        let start = self.pos;
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(start, "unterminated string literal")),
                Some('\\') => match self.bump() {
                    Some(escaped) => text.push(escaped),
                    None => return Err(self.error(start, "unterminated string literal")),
                },
                Some(c) if c == quote => break,
                Some(c) => text.push(c),
            }
        }
        self.tokens.push(Token::new(
            TokenKind::Literal(LiteralKind::Str),
            text,
            Span::new(start, self.pos),
        ));
        Ok(())
    }

    fn number(&mut self) {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = &self.source[start..self.pos];
        self.tokens.push(Token::new(
            TokenKind::Literal(LiteralKind::Number),
            text,
            Span::new(start, self.pos),
        ));
    }

    fn word(&mut self) {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        let text = &self.source[start..self.pos];
        let span = Span::new(start, self.pos);

        let kind = if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
            TokenKind::Literal(LiteralKind::Bool)
        } else if text.eq_ignore_ascii_case("and") {
            TokenKind::Operator(Operator::And)
        } else if text.eq_ignore_ascii_case("or") {
            TokenKind::Operator(Operator::Or)
        } else if text.eq_ignore_ascii_case("not") {
            TokenKind::Operator(Operator::Not)
        } else if self.source[self.pos..].trim_start().starts_with('(') {
            TokenKind::Function
        } else {
            TokenKind::Identifier
        };
        self.tokens.push(Token::new(kind, text, span));
    }

    /// Consume an operator at the cursor, longest spelling first.
    fn operator(&mut self) -> Option<Operator> {
        let rest = &self.source[self.pos..];
        const SPELLINGS: [(&str, Operator); 16] = [
            ("&&", Operator::And),
            ("||", Operator::Or),
            ("==", Operator::Eq),
            ("!=", Operator::NotEq),
            ("<>", Operator::NotEq),
            ("<=", Operator::LtEq),
            (">=", Operator::GtEq),
            ("!", Operator::Not),
            ("=", Operator::Eq),
            ("<", Operator::Lt),
            (">", Operator::Gt),
            ("+", Operator::Add),
            ("-", Operator::Sub),
            ("*", Operator::Mul),
            ("/", Operator::Div),
            ("%", Operator::Rem),
        ];
        let (text, op) = SPELLINGS
            .iter()
            .find(|(text, _)| rest.starts_with(text))?;
        self.pos += text.len();
        Some(*op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_function_call_tokens() {
        let tokens = tokenize(r#"flag("door")"#).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].kind, TokenKind::Function);
        assert_eq!(tokens[0].value, "flag");
        assert_eq!(tokens[2].kind, TokenKind::Literal(LiteralKind::Str));
        assert_eq!(tokens[2].value, "door");
        assert_eq!(tokens[2].span, Span::new(5, 11));
    }

    #[test]
    fn test_function_with_space_before_paren() {
        assert_eq!(
            kinds("totalDeaths ()"),
            vec![
                TokenKind::Function,
                TokenKind::Punct(Punct::LParen),
                TokenKind::Punct(Punct::RParen),
            ]
        );
    }

    #[test]
    fn test_keywords_and_symbols() {
        assert_eq!(
            kinds("true AND not false || x"),
            vec![
                TokenKind::Literal(LiteralKind::Bool),
                TokenKind::Operator(Operator::And),
                TokenKind::Operator(Operator::Not),
                TokenKind::Literal(LiteralKind::Bool),
                TokenKind::Operator(Operator::Or),
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn test_two_char_operators_win() {
        assert_eq!(
            kinds("1 <= 2 >= 3 != 4 == 5 <> 6"),
            vec![
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Operator(Operator::LtEq),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Operator(Operator::GtEq),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Operator(Operator::NotEq),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Operator(Operator::Eq),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Operator(Operator::NotEq),
                TokenKind::Literal(LiteralKind::Number),
            ]
        );
    }

    #[test]
    fn test_decimal_numbers() {
        let tokens = tokenize("3.25 + 7").unwrap();
        assert_eq!(tokens[0].value, "3.25");
        assert_eq!(tokens[2].value, "7");
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#"'it\'s' "a\\b""#).unwrap();
        assert_eq!(tokens[0].value, "it's");
        assert_eq!(tokens[1].value, r"a\b");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize(r#"flag("door)"#).unwrap_err();
        assert_eq!(err.position, 5);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("1 # 2").unwrap_err();
        assert_eq!(err.position, 2);
        assert_eq!(err.context, "# 2");
    }

    #[test]
    fn test_lone_ampersand_rejected() {
        assert!(tokenize("a() & b()").is_err());
    }

    #[test]
    fn test_function_names_dedup_in_order() {
        let names = function_names(r#"flag("a") && time() > 3 && flag("b")"#).unwrap();
        assert_eq!(names, vec!["flag".to_string(), "time".to_string()]);
    }

    #[test]
    fn test_function_names_ignores_strings_that_look_like_calls() {
        let names = function_names(r#"strContains("flag(x)", "x")"#).unwrap();
        assert_eq!(names, vec!["strContains".to_string()]);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("levelSetStrawberries"));
        assert!(is_identifier("_private.name"));
        assert!(!is_identifier("9lives"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("has space"));
        for keyword in ["true", "FALSE", "and", "Or", "NOT"] {
            assert!(!is_identifier(keyword), "{keyword}");
        }
        assert!(is_identifier("notes"));
        assert!(is_identifier("android"));
    }
}
