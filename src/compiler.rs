//! The compiler: symbol resolution and AST→bytecode lowering.

pub mod codegen;
pub mod symbol;

pub use codegen::compile;
