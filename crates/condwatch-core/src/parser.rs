//! Recursive-descent parser producing an immutable expression tree.
//!
//! Precedence, highest first: unary `NOT`/`-`; `* / %`; `+ -`;
//! `< <= > >=`; `= !=`; `AND`; `OR`. Binary operators associate left.
//!
//! Tree depth is capped at [`MAX_DEPTH`]: every parenthesis, call, unary
//! operator and chained binary operator counts one level. Deeper input is a
//! [`SyntaxError`], so neither parsing nor evaluation can exhaust the stack.

use std::sync::Arc;

use crate::token::{self, LiteralKind, Operator, Punct, Span, SyntaxError, Token, TokenKind};
use crate::value::Value;

/// Deepest expression tree the parser will build.
pub const MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
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

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Visit every call node, outermost first, left to right.
    pub fn for_each_call<'a>(&'a self, f: &mut impl FnMut(&'a str, usize, Span)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Call { name, args, span } => {
                f(name, args.len(), *span);
                for arg in args {
                    arg.for_each_call(f);
                }
            }
            Expr::Unary { operand, .. } => operand.for_each_call(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_call(f);
                rhs.for_each_call(f);
            }
        }
    }
}

/// A parsed expression together with its source text.
///
/// Cheap to clone; the tree is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: Arc<str>,
    root: Arc<Expr>,
}

impl Expression {
    /// Parse `source` into an expression.
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        let tokens = token::tokenize(source)?;
        let root = Parser::new(source, &tokens).parse()?;
        Ok(Self {
            source: Arc::from(source),
            root: Arc::new(root),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Distinct function names called anywhere in the expression, in
    /// first-occurrence order.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        self.root.for_each_call(&mut |name, _, _| {
            if !names.contains(&name) {
                names.push(name);
            }
        });
        names
    }
}

struct Parser<'s, 't> {
    source: &'s str,
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'s, 't> Parser<'s, 't> {
    fn new(source: &'s str, tokens: &'t [Token]) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Expr, SyntaxError> {
        if self.tokens.is_empty() {
            return Err(SyntaxError::at(self.source, 0, "empty expression"));
        }
        let expr = self.parse_or()?;
        if let Some(token) = self.peek() {
            let message = match token.kind {
                TokenKind::Punct(Punct::RParen) => "unbalanced ')'".to_string(),
                _ => format!("unexpected trailing token {:?}", token.value),
            };
            return Err(self.error_at(token.span.start, message));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    /// Byte offset of the current token, or the end of input.
    fn offset(&self) -> usize {
        self.peek().map_or(self.source.len(), |t| t.span.start)
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError::at(self.source, position, message)
    }

    /// Enter one level of nesting at `position`.
    fn descend(&mut self, position: usize) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_at(position, "expression nested too deeply"));
        }
        Ok(())
    }

    fn eat_operator(&mut self, ops: &[Operator]) -> Option<Operator> {
        match self.peek()?.kind {
            TokenKind::Operator(op) if ops.contains(&op) => {
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_binary(&mut self, ops: &[(Operator, BinaryOp)]) -> Option<BinaryOp> {
        let TokenKind::Operator(found) = self.peek()?.kind else {
            return None;
        };
        let (_, op) = ops.iter().find(|(spelled, _)| *spelled == found)?;
        self.pos += 1;
        Some(*op)
    }

    fn binary_level(
        &mut self,
        ops: &[(Operator, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let mut lhs = next(self)?;
        let mut chained = 0;
        while let Some(op) = self.eat_binary(ops) {
            self.descend(self.tokens[self.pos - 1].span.start)?;
            chained += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth -= chained;
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[(Operator::Or, BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[(Operator::And, BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[(Operator::Eq, BinaryOp::Eq), (Operator::NotEq, BinaryOp::NotEq)],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                (Operator::Lt, BinaryOp::Lt),
                (Operator::LtEq, BinaryOp::LtEq),
                (Operator::Gt, BinaryOp::Gt),
                (Operator::GtEq, BinaryOp::GtEq),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[(Operator::Add, BinaryOp::Add), (Operator::Sub, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                (Operator::Mul, BinaryOp::Mul),
                (Operator::Div, BinaryOp::Div),
                (Operator::Rem, BinaryOp::Rem),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let offset = self.offset();
        let op = match self.eat_operator(&[Operator::Not, Operator::Sub]) {
            Some(Operator::Not) => UnaryOp::Not,
            Some(_) => UnaryOp::Neg,
            None => return self.parse_primary(),
        };
        self.descend(offset)?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let offset = self.offset();
        let Some(token) = self.advance() else {
            return Err(self.error_at(offset, "expected a value, found end of input"));
        };

        match token.kind {
            TokenKind::Literal(kind) => self.literal(kind, token),
            TokenKind::Function => self.call(token),
            TokenKind::Punct(Punct::LParen) => {
                self.descend(offset)?;
                let inner = self.parse_or()?;
                if !self.eat_punct(Punct::RParen) {
                    return Err(self.error_at(token.span.start, "unbalanced '('"));
                }
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::Identifier => Err(self.error_at(
                offset,
                format!(
                    "bare identifier {:?}; expressions have no variables (did you mean {}()?)",
                    token.value, token.value
                ),
            )),
            TokenKind::Punct(Punct::Comma) => Err(self.error_at(offset, "empty argument")),
            TokenKind::Punct(Punct::RParen) | TokenKind::Operator(_) => Err(self.error_at(
                offset,
                format!("expected a value, found {:?}", token.value),
            )),
        }
    }

    fn literal(&self, kind: LiteralKind, token: &Token) -> Result<Expr, SyntaxError> {
        let value = match kind {
            LiteralKind::Bool => Value::Bool(token.value.eq_ignore_ascii_case("true")),
            LiteralKind::Str => Value::Str(token.value.clone()),
            LiteralKind::Number => {
                let n = token.value.parse::<f64>().map_err(|_| {
                    self.error_at(token.span.start, format!("invalid number {:?}", token.value))
                })?;
                Value::Number(n)
            }
        };
        Ok(Expr::Literal(value))
    }

    fn call(&mut self, name: &Token) -> Result<Expr, SyntaxError> {
        if !self.eat_punct(Punct::LParen) {
            return Err(self.error_at(self.offset(), "expected '(' after function name"));
        }
        self.descend(name.span.start)?;

        let mut args = Vec::new();
        if !self.eat_punct(Punct::RParen) {
            loop {
                if self.peek().is_some_and(|t| {
                    matches!(t.kind, TokenKind::Punct(Punct::Comma | Punct::RParen))
                }) {
                    return Err(self.error_at(self.offset(), "empty argument"));
                }
                args.push(self.parse_or()?);
                if self.eat_punct(Punct::Comma) {
                    continue;
                }
                if self.eat_punct(Punct::RParen) {
                    break;
                }
                return Err(self.error_at(
                    name.span.start,
                    format!("unbalanced '(' in call to {}", name.value),
                ));
            }
        }

        self.depth -= 1;
        let end = self.tokens[self.pos - 1].span.end;
        Ok(Expr::Call {
            name: name.value.clone(),
            args,
            span: Span::new(name.span.start, end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Expr {
        Expression::parse(source).unwrap().root().clone()
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Number(n)))
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        assert_eq!(
            parse("1 + 2 * 3"),
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: num(1.0),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: num(2.0),
                    rhs: num(3.0),
                }),
            }
        );
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            parse("8 - 4 - 2"),
            Expr::Binary {
                op: BinaryOp::Sub,
                lhs: Box::new(Expr::Binary {
                    op: BinaryOp::Sub,
                    lhs: num(8.0),
                    rhs: num(4.0),
                }),
                rhs: num(2.0),
            }
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let Expr::Binary { op, rhs, .. } = parse("true OR false AND false") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn test_relational_binds_tighter_than_equality() {
        let Expr::Binary { op, lhs, .. } = parse("1 < 2 = true") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Eq);
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn test_parentheses_override() {
        let Expr::Binary { op, lhs, .. } = parse("(1 + 2) * 3") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Mul);
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_unary_not_and_negation() {
        assert_eq!(
            parse("!-3"),
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: num(3.0),
                }),
            }
        );
    }

    #[test]
    fn test_call_with_arguments() {
        let expr = parse(r#"berryCollected("1:7", 2 + 1)"#);
        let Expr::Call { name, args, span } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "berryCollected");
        assert_eq!(args.len(), 2);
        assert_eq!(span, Span::new(0, 28));
    }

    #[test]
    fn test_zero_argument_call() {
        let Expr::Call { args, .. } = parse("totalDeaths()") else {
            panic!("expected call");
        };
        assert!(args.is_empty());
    }

    #[test]
    fn test_function_names_first_occurrence_order() {
        let expr = Expression::parse("b() + a(b()) + a(1)").unwrap();
        assert_eq!(expr.function_names(), vec!["b", "a"]);
    }

    #[test]
    fn test_syntax_errors() {
        let cases = [
            ("", "empty expression"),
            ("(1 + 2", "unbalanced '('"),
            ("1 + 2)", "unbalanced ')'"),
            ("1 2", "unexpected trailing token"),
            ("f(1,)", "empty argument"),
            ("f(,1)", "empty argument"),
            ("f(1 2)", "unbalanced '(' in call"),
            ("1 +", "found end of input"),
            ("door", "bare identifier"),
            ("* 2", "expected a value"),
        ];
        for (source, expected) in cases {
            let err = Expression::parse(source).unwrap_err();
            assert!(
                err.message.contains(expected),
                "{source:?}: expected {expected:?} in {:?}",
                err.message
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(Expression::parse(&nested(MAX_DEPTH)).is_ok());

        let err = Expression::parse(&nested(MAX_DEPTH + 1)).unwrap_err();
        assert_eq!(err.message, "expression nested too deeply");
        assert_eq!(err.position, MAX_DEPTH);

        let err = Expression::parse(&nested(10_000)).unwrap_err();
        assert_eq!(err.message, "expression nested too deeply");
    }

    #[test]
    fn test_nesting_limit_covers_unary_calls_and_chains() {
        let unary = format!("{}true", "!".repeat(MAX_DEPTH + 1));
        let calls = format!("{}1{}", "f(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        let chain = vec!["1"; MAX_DEPTH + 2].join(" + ");
        for source in [unary, calls, chain] {
            let err = Expression::parse(&source).unwrap_err();
            assert_eq!(err.message, "expression nested too deeply", "{source}");
        }

        assert!(Expression::parse(&vec!["1"; MAX_DEPTH + 1].join(" + ")).is_ok());
        assert!(Expression::parse(&format!("{}true", "!".repeat(MAX_DEPTH))).is_ok());
    }

    #[test]
    fn test_siblings_do_not_accumulate_depth() {
        let group = format!("{}1{}", "(".repeat(MAX_DEPTH - 2), ")".repeat(MAX_DEPTH - 2));
        let source = format!("f({group}) AND f({group})");
        assert!(Expression::parse(&source).is_ok());
    }

    #[test]
    fn test_error_position_points_at_offender() {
        let err = Expression::parse("flag(\"a\") && door").unwrap_err();
        assert_eq!(err.position, 13);
        assert_eq!(err.context, "door");
    }
}
