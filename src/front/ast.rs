//! The abstract syntax tree produced by the parser and consumed by the
//! compiler. Lexing and parsing themselves are out of scope for this crate's
//! core (spec.md §1 treats them as external collaborators); the AST shape
//! below is the contract between them and `compiler::codegen`.

use crate::common::Id;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// `var` — mutable.
    Var,
    /// `let` — immutable after initialization.
    Let,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Declare {
        kind: DeclKind,
        name: Id,
        init: Option<Expr>,
        span: Span,
    },
    Assign {
        name: Id,
        value: Expr,
        span: Span,
    },
    Return(Option<Expr>, Span),
    FnDecl {
        name: Id,
        exported: bool,
        args: Vec<Id>,
        body: Vec<Stmt>,
        span: Span,
    },
    If {
        cond: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    For {
        var: Id,
        iterable: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Import {
        path: String,
        span: Span,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Float(f64),
    String(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal, Span),
    Var(Id, Span),
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Group(Box<Expr>),
    Tuple(Vec<Expr>, Span),
    Range {
        begin: Box<Expr>,
        end: Box<Expr>,
        span: Span,
    },
    Call {
        name: Id,
        args: Vec<Expr>,
        span: Span,
    },
    Member {
        object: Box<Expr>,
        name: Id,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, s) => *s,
            Expr::Var(_, s) => *s,
            Expr::Unary { span, .. } => *span,
            Expr::Binary { span, .. } => *span,
            Expr::Group(e) => e.span(),
            Expr::Tuple(_, s) => *s,
            Expr::Range { span, .. } => *span,
            Expr::Call { span, .. } => *span,
            Expr::Member { span, .. } => *span,
        }
    }
}

// Reprints a parsed program back into source text. Exists so the round-trip
// property (lex -> parse -> print -> parse again -> same tree) has a printer
// to round-trip through; not used by the compiler itself.

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for stmt in &self.stmts {
            writeln!(f, "{stmt}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stmt::Expr(e) => write!(f, "{e}"),
            Stmt::Declare { kind, name, init, .. } => {
                let keyword = match kind {
                    DeclKind::Var => "var",
                    DeclKind::Let => "let",
                };
                match init {
                    Some(e) => write!(f, "{keyword} {name} = {e}"),
                    None => write!(f, "{keyword} {name}"),
                }
            }
            Stmt::Assign { name, value, .. } => write!(f, "{name} = {value}"),
            Stmt::Return(Some(e), _) => write!(f, "return {e}"),
            Stmt::Return(None, _) => write!(f, "return"),
            Stmt::FnDecl {
                name,
                exported,
                args,
                body,
                ..
            } => {
                if *exported {
                    write!(f, "exported ")?;
                }
                write!(f, "fn {name}(")?;
                write_comma_separated(f, args)?;
                write!(f, ") {{ ")?;
                write_block(f, body)?;
                write!(f, " }}")
            }
            Stmt::If { cond, body, .. } => {
                write!(f, "if {cond} {{ ")?;
                write_block(f, body)?;
                write!(f, " }}")
            }
            Stmt::For { var, iterable, body, .. } => {
                write!(f, "for {var} in {iterable} {{ ")?;
                write_block(f, body)?;
                write!(f, " }}")
            }
            Stmt::Import { path, .. } => write!(f, "import \"{path}\""),
        }
    }
}

fn write_comma_separated(f: &mut std::fmt::Formatter<'_>, names: &[Id]) -> std::fmt::Result {
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{name}")?;
    }
    Ok(())
}

fn write_block(f: &mut std::fmt::Formatter<'_>, body: &[Stmt]) -> std::fmt::Result {
    for (i, stmt) in body.iter().enumerate() {
        if i > 0 {
            write!(f, "\n")?;
        }
        write!(f, "{stmt}")?;
    }
    Ok(())
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Nil => write!(f, "nil"),
        }
    }
}

impl BinOp {
    fn as_source(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(lit, _) => write!(f, "{lit}"),
            Expr::Var(name, _) => write!(f, "{name}"),
            Expr::Unary { op, operand, .. } => {
                let sigil = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "!",
                };
                write!(f, "{sigil}{operand}")
            }
            Expr::Binary { op, left, right, .. } => write!(f, "{left} {} {right}", op.as_source()),
            Expr::Group(inner) => write!(f, "({inner})"),
            Expr::Tuple(items, _) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Expr::Range { begin, end, .. } => write!(f, "{begin}..{end}"),
            Expr::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Member { object, name, .. } => write!(f, "{object}.{name}"),
        }
    }
}
