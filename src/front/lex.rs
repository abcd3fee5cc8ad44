//! The lexer: regex-driven longest-alternative-first scanning into a flat
//! token stream, in the style of the teacher's skeleton (a whitespace
//! matcher plus an ordered list of `(Regex, TokenKind)` matchers tried in
//! turn at the current position).

use derive_more::Display;
use regex::Regex;

use crate::front::ast::Span;

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("float")]
    Float,
    #[display("string")]
    Str,

    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display(":")]
    Colon,
    #[display(",")]
    Comma,
    #[display(".")]
    Dot,
    #[display("\\n")]
    Newline,

    #[display("=")]
    Assign,
    #[display("!")]
    Bang,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Asterisk,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("==")]
    EqEq,
    #[display("!=")]
    NotEq,
    #[display("<")]
    Lt,
    #[display("<=")]
    LtEq,
    #[display(">")]
    Gt,
    #[display(">=")]
    GtEq,
    #[display("->")]
    Arrow,
    #[display("..")]
    DotDot,

    #[display("and")]
    And,
    #[display("or")]
    Or,

    #[display("true")]
    True,
    #[display("false")]
    False,
    #[display("nil")]
    Nil,

    #[display("var")]
    Var,
    #[display("let")]
    Let,
    #[display("fn")]
    Fn,
    #[display("return")]
    Return,
    #[display("if")]
    If,
    #[display("for")]
    For,
    #[display("in")]
    In,
    #[display("import")]
    Import,
    #[display("/exported/")]
    Exported,
}

/// A token: its class, the source text it carries, and its source span.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    pub span: Span,
}

#[derive(Debug)]
pub struct LexError {
    pub pos: usize,
    pub span: Span,
    pub ch: char,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unexpected character {:?} at byte {}", self.ch, self.pos)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: usize,
    col: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        // Ordered so that longer / more specific alternatives are tried
        // before their prefixes (`->` before nothing-shorter clashes, `..`
        // before a bare `.`, keywords before the general identifier rule).
        let matchers = vec![
            (r"\A->", TokenKind::Arrow),
            (r"\A\.\.", TokenKind::DotDot),
            (r"\A==", TokenKind::EqEq),
            (r"\A!=", TokenKind::NotEq),
            (r"\A<=", TokenKind::LtEq),
            (r"\A>=", TokenKind::GtEq),
            (r"\A/exported/", TokenKind::Exported),
            (r"\A\d+\.\d+", TokenKind::Float),
            (r"\A\d+", TokenKind::Num),
            (r#"\A"(?:[^"\\]|\\.)*""#, TokenKind::Str),
            (r"\Avar\b", TokenKind::Var),
            (r"\Alet\b", TokenKind::Let),
            (r"\Afn\b", TokenKind::Fn),
            (r"\Areturn\b", TokenKind::Return),
            (r"\Aif\b", TokenKind::If),
            (r"\Afor\b", TokenKind::For),
            (r"\Ain\b", TokenKind::In),
            (r"\Aimport\b", TokenKind::Import),
            (r"\Aand\b", TokenKind::And),
            (r"\Aor\b", TokenKind::Or),
            (r"\Atrue\b", TokenKind::True),
            (r"\Afalse\b", TokenKind::False),
            (r"\Anil\b", TokenKind::Nil),
            (r"\A[A-Za-z_][A-Za-z0-9_]*", TokenKind::Id),
            (r"\A\(", TokenKind::LParen),
            (r"\A\)", TokenKind::RParen),
            (r"\A\{", TokenKind::LBrace),
            (r"\A\}", TokenKind::RBrace),
            (r"\A:", TokenKind::Colon),
            (r"\A,", TokenKind::Comma),
            (r"\A\.", TokenKind::Dot),
            (r"\A\n", TokenKind::Newline),
            (r"\A=", TokenKind::Assign),
            (r"\A!", TokenKind::Bang),
            (r"\A\+", TokenKind::Plus),
            (r"\A-", TokenKind::Minus),
            (r"\A\*", TokenKind::Asterisk),
            (r"\A/", TokenKind::Slash),
            (r"\A%", TokenKind::Percent),
            (r"\A<", TokenKind::Lt),
            (r"\A>", TokenKind::Gt),
        ]
        .into_iter()
        .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), kind))
        .collect();

        Lexer {
            input,
            pos: 0,
            line: 1,
            col: 1,
            whitespace: Regex::new(r"\A(?:[ \t\r]|(?://[^\n]*))*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += text.len();
    }

    // Skip comments and non-newline whitespace.
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            let text = m.as_str().to_string();
            self.advance(&text);
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input (`Ok(None)`) and a
    /// lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();

        if self.end_of_input() {
            return Ok(None);
        }

        let span = Span {
            line: self.line,
            col: self.col,
        };
        let rest = &self.input[self.pos..];

        for (regex, kind) in &self.matchers {
            if let Some(m) = regex.find(rest) {
                let text = m.as_str();
                let token = Token {
                    kind: *kind,
                    text,
                    span,
                };
                self.advance(text);
                return Ok(Some(token));
            }
        }

        let ch = rest.chars().next().unwrap();
        Err(LexError {
            pos: self.pos,
            span,
            ch,
        })
    }
}

/// Lex an entire input into a flat token vector, for callers (and tests)
/// that want the whole stream rather than incremental pulls.
pub fn lex_all(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_arithmetic() {
        let tokens = lex_all("1 + 2 * 3").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Num,
                TokenKind::Plus,
                TokenKind::Num,
                TokenKind::Asterisk,
                TokenKind::Num
            ]
        );
    }

    #[test]
    fn keywords_take_priority_over_identifiers() {
        let tokens = lex_all("var x = true").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Var, TokenKind::Id, TokenKind::Assign, TokenKind::True]
        );
    }

    #[test]
    fn identifiers_with_keyword_prefixes_are_not_split() {
        let tokens = lex_all("variable").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Id);
        assert_eq!(tokens[0].text, "variable");
    }

    #[test]
    fn newline_is_significant() {
        let tokens = lex_all("x\ny").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Id, TokenKind::Newline, TokenKind::Id]);
    }

    #[test]
    fn range_and_member_dots_are_distinct() {
        let tokens = lex_all("1..3").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::DotDot);
        let tokens = lex_all("a.b").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Dot);
    }

    #[test]
    fn unexpected_character_is_an_error() {
        assert!(lex_all("1 + @").is_err());
    }
}
