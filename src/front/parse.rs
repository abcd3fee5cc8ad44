//! The parser: recursive descent over the token stream from `front::lex`,
//! following the precedence chain from spec.md §6:
//!
//! ```text
//! statement-list → statement
//!   → (variable-decl | return | expression | function-decl | if | for | import)
//! expression → assignment → conjunction (and/or) → equality (== !=)
//!   → comparison (< <= > >=) → term (+ - %) → term-md (* /) → unary (! -)
//!   → primary (function-call | member-access | range | literal | tuple/group)
//! ```

use std::fmt;

use derive_more::Display;

use crate::common::Id;
use crate::error::Diagnostic;

use super::ast::*;
use super::lex::{lex_all, Token, TokenKind};

#[derive(Debug, Display)]
#[display("{_0}")]
pub struct ParseError(pub Diagnostic);

impl std::error::Error for ParseError {}

struct Parser<'src> {
    file: String,
    source: &'src str,
    tokens: Vec<Token<'src>>,
    pos: usize,
}

fn source_line(source: &str, line: usize) -> String {
    source.lines().nth(line.saturating_sub(1)).unwrap_or("").to_string()
}

impl<'src> Parser<'src> {
    fn new(file: &str, source: &'src str, tokens: Vec<Token<'src>>) -> Self {
        Parser {
            file: file.to_string(),
            source,
            tokens,
            pos: 0,
        }
    }

    fn error_at(&self, span: Span, message: impl fmt::Display) -> ParseError {
        ParseError(Diagnostic::new(
            self.file.clone(),
            span.line,
            span.col,
            source_line(self.source, span.line),
            message.to_string(),
        ))
    }

    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token<'src>> {
        self.tokens.get(self.pos + offset)
    }

    fn current_span(&self) -> Span {
        self.peek()
            .map(|t| t.span)
            .unwrap_or_else(|| self.tokens.last().map(|t| t.span).unwrap_or(Span { line: 1, col: 1 }))
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        if self.check(kind) {
            Ok(self.advance().unwrap())
        } else {
            let span = self.current_span();
            let found = self
                .peek()
                .map(|t| t.kind.to_string())
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error_at(span, format!("expected {kind}, found {found}")))
        }
    }

    /// Consume zero or more statement-separating newlines.
    fn skip_newlines(&mut self) {
        while self.matches(TokenKind::Newline) {}
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // -- statements ---------------------------------------------------

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !self.at_end() {
            stmts.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Program { stmts })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        self.skip_newlines();
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) {
            stmts.push(self.parse_statement()?);
            self.skip_newlines();
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Var) | Some(TokenKind::Let) => self.parse_declare(),
            Some(TokenKind::Return) => self.parse_return(),
            Some(TokenKind::Exported) | Some(TokenKind::Fn) => self.parse_fn_decl(),
            Some(TokenKind::If) => self.parse_if(),
            Some(TokenKind::For) => self.parse_for(),
            Some(TokenKind::Import) => self.parse_import(),
            _ => self.parse_expr_or_assign_statement(),
        }
    }

    fn parse_declare(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance().unwrap();
        let kind = if tok.kind == TokenKind::Var {
            DeclKind::Var
        } else {
            DeclKind::Let
        };
        let span = tok.span;
        let name_tok = self.expect(TokenKind::Id)?;
        let name = Id::new(name_tok.text.to_string());
        let init = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Stmt::Declare { kind, name, init, span })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance().unwrap();
        let span = tok.span;
        let value = if matches!(
            self.peek_kind(),
            None | Some(TokenKind::Newline) | Some(TokenKind::RBrace)
        ) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        Ok(Stmt::Return(value, span))
    }

    fn parse_fn_decl(&mut self) -> Result<Stmt, ParseError> {
        let exported = self.matches(TokenKind::Exported);
        self.skip_newlines();
        let span = self.current_span();
        self.expect(TokenKind::Fn)?;
        let name_tok = self.expect(TokenKind::Id)?;
        let name = Id::new(name_tok.text.to_string());
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let arg_tok = self.expect(TokenKind::Id)?;
                args.push(Id::new(arg_tok.text.to_string()));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.skip_newlines();
        let body = self.parse_block()?;
        Ok(Stmt::FnDecl {
            name,
            exported,
            args,
            body,
            span,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance().unwrap();
        let span = tok.span;
        let cond = self.parse_expression()?;
        self.skip_newlines();
        let body = self.parse_block()?;
        Ok(Stmt::If { cond, body, span })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance().unwrap();
        let span = tok.span;
        let var_tok = self.expect(TokenKind::Id)?;
        let var = Id::new(var_tok.text.to_string());
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expression()?;
        self.skip_newlines();
        let body = self.parse_block()?;
        Ok(Stmt::For {
            var,
            iterable,
            body,
            span,
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance().unwrap();
        let span = tok.span;
        let path_tok = self.expect(TokenKind::Str)?;
        let path = unescape_string(path_tok.text);
        Ok(Stmt::Import { path, span })
    }

    fn parse_expr_or_assign_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.check(TokenKind::Id) && self.peek_at(1).map(|t| t.kind) == Some(TokenKind::Assign) {
            let name_tok = self.advance().unwrap();
            let name = Id::new(name_tok.text.to_string());
            let span = name_tok.span;
            self.advance(); // '='
            let value = self.parse_expression()?;
            return Ok(Stmt::Assign { name, value, span });
        }
        let expr = self.parse_expression()?;
        Ok(Stmt::Expr(expr))
    }

    // -- expressions ----------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_conjunction()
    }

    fn parse_conjunction(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::And) => BinOp::And,
                Some(TokenKind::Or) => BinOp::Or,
                _ => break,
            };
            let span = self.advance().unwrap().span;
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => BinOp::Eq,
                Some(TokenKind::NotEq) => BinOp::Ne,
                _ => break,
            };
            let span = self.advance().unwrap().span;
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::LtEq) => BinOp::Le,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::GtEq) => BinOp::Ge,
                _ => break,
            };
            let span = self.advance().unwrap().span;
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term_md()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                Some(TokenKind::Percent) => BinOp::Mod,
                _ => break,
            };
            let span = self.advance().unwrap().span;
            let right = self.parse_term_md()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_term_md(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Asterisk) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => break,
            };
            let span = self.advance().unwrap().span;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => Some(UnOp::Neg),
            Some(TokenKind::Bang) => Some(UnOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            let span = self.advance().unwrap().span;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_range()
    }

    /// Ranges (`a..b`) bind at primary level per spec.md §6, between unary
    /// and the innermost literal/call/group forms.
    fn parse_range(&mut self) -> Result<Expr, ParseError> {
        let begin = self.parse_primary()?;
        if self.matches(TokenKind::DotDot) {
            let span = begin.span();
            let end = self.parse_primary()?;
            return Ok(Expr::Range {
                begin: Box::new(begin),
                end: Box::new(end),
                span,
            });
        }
        Ok(begin)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.current_span();
        match self.peek_kind() {
            Some(TokenKind::Num) => {
                let tok = self.advance().unwrap();
                let n: i32 = tok
                    .text
                    .parse()
                    .map_err(|_| self.error_at(span, format!("invalid integer literal '{}'", tok.text)))?;
                Ok(Expr::Literal(Literal::Int(n), span))
            }
            Some(TokenKind::Float) => {
                let tok = self.advance().unwrap();
                let x: f64 = tok
                    .text
                    .parse()
                    .map_err(|_| self.error_at(span, format!("invalid float literal '{}'", tok.text)))?;
                Ok(Expr::Literal(Literal::Float(x), span))
            }
            Some(TokenKind::Str) => {
                let tok = self.advance().unwrap();
                Ok(Expr::Literal(Literal::String(unescape_string(tok.text)), span))
            }
            Some(TokenKind::True) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true), span))
            }
            Some(TokenKind::False) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false), span))
            }
            Some(TokenKind::Nil) => {
                self.advance();
                Ok(Expr::Literal(Literal::Nil, span))
            }
            Some(TokenKind::LParen) => self.parse_group_or_tuple(span),
            Some(TokenKind::Id) => self.parse_id_primary(span),
            _ => {
                let found = self
                    .peek()
                    .map(|t| t.kind.to_string())
                    .unwrap_or_else(|| "end of input".to_string());
                Err(self.error_at(span, format!("expected an expression, found {found}")))
            }
        }
    }

    fn parse_group_or_tuple(&mut self, span: Span) -> Result<Expr, ParseError> {
        self.advance(); // '('
        self.skip_newlines();
        if self.matches(TokenKind::RParen) {
            return Ok(Expr::Tuple(Vec::new(), span));
        }
        let first = self.parse_expression()?;
        self.skip_newlines();
        if self.matches(TokenKind::Comma) {
            let mut items = vec![first];
            loop {
                self.skip_newlines();
                if self.check(TokenKind::RParen) {
                    break;
                }
                items.push(self.parse_expression()?);
                self.skip_newlines();
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.skip_newlines();
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::Tuple(items, span));
        }
        self.skip_newlines();
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Group(Box::new(first)))
    }

    fn parse_id_primary(&mut self, span: Span) -> Result<Expr, ParseError> {
        let tok = self.advance().unwrap();
        let name = Id::new(tok.text.to_string());

        let mut expr = if self.check(TokenKind::LParen) {
            self.advance();
            let mut args = Vec::new();
            if !self.check(TokenKind::RParen) {
                loop {
                    args.push(self.parse_expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
            Expr::Call { name, args, span }
        } else {
            Expr::Var(name, span)
        };

        while self.matches(TokenKind::Dot) {
            let member_tok = self.expect(TokenKind::Id)?;
            expr = Expr::Member {
                object: Box::new(expr),
                name: Id::new(member_tok.text.to_string()),
                span,
            };
        }

        Ok(expr)
    }
}

/// Strip the surrounding quotes and resolve `\"`, `\\`, and `\n` escapes.
fn unescape_string(literal: &str) -> String {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a complete source file into a [`Program`].
pub fn parse(file: &str, input: &str) -> Result<Program, ParseError> {
    let tokens = lex_all(input).map_err(|e| {
        ParseError(Diagnostic::new(
            file.to_string(),
            e.span.line,
            e.span.col,
            source_line(input, e.span.line),
            e.to_string(),
        ))
    })?;
    let mut parser = Parser::new(file, input, tokens);
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let program = parse("<test>", "print(1 + 2 * 3)").unwrap();
        assert_eq!(program.stmts.len(), 1);
    }

    #[test]
    fn parses_fn_decl_and_if() {
        let src = "fn fib(n) { if n < 2 { return n }\nreturn fib(n-1) + fib(n-2) }";
        let program = parse("<test>", src).unwrap();
        assert_eq!(program.stmts.len(), 1);
        match &program.stmts[0] {
            Stmt::FnDecl { name, args, body, .. } => {
                assert_eq!(name.as_str(), "fib");
                assert_eq!(args.len(), 1);
                assert_eq!(body.len(), 2);
            }
            other => panic!("expected FnDecl, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_over_range() {
        let program = parse("<test>", "for i in 1..3 { print(i) }").unwrap();
        match &program.stmts[0] {
            Stmt::For { var, .. } => assert_eq!(var.as_str(), "i"),
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn parses_tuple_literal() {
        let program = parse("<test>", "print((1, 2, 3))").unwrap();
        match &program.stmts[0] {
            Stmt::Expr(Expr::Call { args, .. }) => match &args[0] {
                Expr::Tuple(items, _) => assert_eq!(items.len(), 3),
                other => panic!("expected tuple, got {other:?}"),
            },
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn reassigning_reports_an_error_when_followed_by_let_semantics() {
        // Parsing never rejects reassignment — that's a compiler-level
        // constant check (spec.md §7) — but it must still parse cleanly.
        let program = parse("<test>", "let s = \"foo\" + \"bar\"\ns = \"x\"").unwrap();
        assert_eq!(program.stmts.len(), 2);
    }

    #[test]
    fn unexpected_token_is_a_parse_error() {
        assert!(parse("<test>", "var = 1").is_err());
    }
}
