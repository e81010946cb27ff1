//! Crate root: wires together the compilation pipeline.
//!
//! The stages are small and composable:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns the expression AST.
//! - `codegen` lowers the AST into stack-machine instructions and renders them
//!   as x86-64 assembly.
//! - `machine` executes generated instructions to check what they compute.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod codegen;
pub mod error;
pub mod machine;
pub mod parser;
pub mod tokenizer;

pub use codegen::{CodegenOptions, Instruction, Reg, Syntax};
pub use error::{CompileError, CompileResult};
pub use machine::{EvalError, Machine, MachineError, evaluate};

use error::WrongArgumentCountSnafu;

/// Pick the single expression out of the positional arguments.
pub fn expression_from_args(args: &[String]) -> CompileResult<&str> {
  match args {
    [expr] => Ok(expr.as_str()),
    _ => WrongArgumentCountSnafu { got: args.len() }.fail(),
  }
}

/// Tokenize, parse and lower an expression into instructions.
pub fn compile(expr: &str) -> CompileResult<Vec<Instruction>> {
  let tokens = tokenizer::tokenize(expr)?;
  let root = parser::parse(tokens, expr)?;
  Ok(codegen::generate(&root))
}

/// Compile a source string into an assembly listing.
pub fn generate_assembly(expr: &str, options: &CodegenOptions) -> CompileResult<String> {
  let program = compile(expr)?;
  Ok(codegen::emit(&program, options))
}
