//! Error kinds and caret-style source diagnostics.
//!
//! Every stage of the pipeline (lex, parse, compile, run) is fatal on error:
//! there is no recovery and no partial execution. `Diagnostic` formats a
//! `file:line:col` caret underline the way a human-facing compiler error
//! should read.

use std::fmt;

use thiserror::Error;

/// A source-span diagnostic: file name, 1-based line/column, the offending
/// source line, and a short message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub col: usize,
    pub source_line: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        file: impl Into<String>,
        line: usize,
        col: usize,
        source_line: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            file: file.into(),
            line,
            col,
            source_line: source_line.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:{}:{}: {}", self.file, self.line, self.col, self.message)?;
        writeln!(f, "{}", self.source_line)?;
        let caret_pos = self.col.saturating_sub(1);
        writeln!(f, "{}^", " ".repeat(caret_pos))
    }
}

/// Top-level error type threaded through every pipeline stage.
#[derive(Debug, Error)]
pub enum RillError {
    #[error("lexical error\n{0}")]
    Lex(Diagnostic),

    #[error("syntax error\n{0}")]
    Parse(Diagnostic),

    #[error("semantic error\n{0}")]
    Semantic(Diagnostic),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::front::parse::ParseError> for RillError {
    fn from(e: crate::front::parse::ParseError) -> Self {
        RillError::Parse(e.0)
    }
}

pub type Result<T> = std::result::Result<T, RillError>;
