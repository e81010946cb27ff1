//! Code generation: lower the parsed AST into x86-64 assembly.
//!
//! The emitter uses a simple stack machine: every expression leaves a single
//! value on the stack, and binary operators pop both operands into `%rax`
//! (left) and `%rdi` (right) before pushing the result back. Lowering produces
//! typed [`Instruction`]s first so the same program can be rendered in either
//! assembler dialect or executed by [`crate::machine::Machine`].

use std::fmt;
use std::str::FromStr;

use log::debug;
use snafu::Snafu;

use crate::parser::{AstNode, BinaryOp};

const INDENT: &str = "  ";

/// Registers touched by generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
  Rax,
  Rdi,
}

impl Reg {
  fn name(self) -> &'static str {
    match self {
      Self::Rax => "rax",
      Self::Rdi => "rdi",
    }
  }
}

/// One line of generated assembly. Two-operand forms are `(dst, src)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
  PushImm(i32),
  Push(Reg),
  Pop(Reg),
  Add(Reg, Reg),
  Sub(Reg, Reg),
  Imul(Reg, Reg),
  /// Sign-extend `rax` into `rdx:rax`.
  Cqo,
  /// Signed divide `rdx:rax`; quotient in `rax`, remainder in `rdx`.
  Idiv(Reg),
  Ret,
}

/// Assembler dialect used when rendering instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
  #[default]
  Intel,
  Att,
}

impl Syntax {
  fn directive(self) -> &'static str {
    match self {
      Self::Intel => ".intel_syntax noprefix",
      Self::Att => ".att_syntax prefix",
    }
  }

  fn reg(self, reg: Reg) -> String {
    match self {
      Self::Intel => reg.name().to_string(),
      Self::Att => format!("%{}", reg.name()),
    }
  }

  fn binary(self, mnemonic: &str, dst: Reg, src: Reg) -> String {
    match self {
      Self::Intel => format!("{mnemonic} {}, {}", self.reg(dst), self.reg(src)),
      Self::Att => format!("{mnemonic} {}, {}", self.reg(src), self.reg(dst)),
    }
  }

  /// Render a single instruction without indentation.
  pub fn render(self, inst: &Instruction) -> String {
    match *inst {
      Instruction::PushImm(value) => match self {
        Self::Intel => format!("push {value}"),
        Self::Att => format!("push ${value}"),
      },
      Instruction::Push(reg) => format!("push {}", self.reg(reg)),
      Instruction::Pop(reg) => format!("pop {}", self.reg(reg)),
      Instruction::Add(dst, src) => self.binary("add", dst, src),
      Instruction::Sub(dst, src) => self.binary("sub", dst, src),
      Instruction::Imul(dst, src) => self.binary("imul", dst, src),
      Instruction::Cqo => "cqo".to_string(),
      Instruction::Idiv(src) => format!("idiv {}", self.reg(src)),
      Instruction::Ret => "ret".to_string(),
    }
  }
}

#[derive(Debug, Snafu)]
#[snafu(display("unknown syntax \"{name}\" (expected \"intel\" or \"att\")"))]
pub struct UnknownSyntax {
  name: String,
}

impl FromStr for Syntax {
  type Err = UnknownSyntax;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "intel" => Ok(Self::Intel),
      "att" => Ok(Self::Att),
      _ => UnknownSyntaxSnafu { name: s }.fail(),
    }
  }
}

impl fmt::Display for Syntax {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Intel => f.write_str("intel"),
      Self::Att => f.write_str("att"),
    }
  }
}

/// Knobs for the textual listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
  pub syntax: Syntax,
  /// Globally visible label the listing starts at.
  pub entry: String,
}

impl Default for CodegenOptions {
  fn default() -> Self {
    Self {
      syntax: Syntax::default(),
      entry: "main".to_string(),
    }
  }
}

/// Lower an expression into a complete program that returns its value in `rax`.
pub fn generate(root: &AstNode) -> Vec<Instruction> {
  let mut program = Vec::new();
  emit_expr(root, &mut program);

  // The whole expression's value is the only thing left on the stack.
  program.push(Instruction::Pop(Reg::Rax));
  program.push(Instruction::Ret);

  debug!("generated {} instructions", program.len());
  program
}

enum Step<'a> {
  Visit(&'a AstNode),
  Combine(BinaryOp),
}

/// Emit stack-based code for an expression tree in post-order.
fn emit_expr(root: &AstNode, program: &mut Vec<Instruction>) {
  let mut pending = vec![Step::Visit(root)];
  while let Some(step) = pending.pop() {
    match step {
      Step::Visit(AstNode::Num { value }) => program.push(Instruction::PushImm(*value)),
      Step::Visit(AstNode::Binary { op, lhs, rhs }) => {
        pending.push(Step::Combine(*op));
        pending.push(Step::Visit(rhs.as_ref()));
        pending.push(Step::Visit(lhs.as_ref()));
      }
      Step::Combine(op) => {
        program.push(Instruction::Pop(Reg::Rdi));
        program.push(Instruction::Pop(Reg::Rax));
        match op {
          BinaryOp::Add => program.push(Instruction::Add(Reg::Rax, Reg::Rdi)),
          BinaryOp::Sub => program.push(Instruction::Sub(Reg::Rax, Reg::Rdi)),
          BinaryOp::Mul => program.push(Instruction::Imul(Reg::Rax, Reg::Rdi)),
          BinaryOp::Div => {
            program.push(Instruction::Cqo);
            program.push(Instruction::Idiv(Reg::Rdi));
          }
        }
        program.push(Instruction::Push(Reg::Rax));
      }
    }
  }
}

/// Render a program as an assembly listing with the entry-point preamble.
pub fn emit(program: &[Instruction], options: &CodegenOptions) -> String {
  let syntax = options.syntax;
  let mut asm = String::new();
  asm.push_str(syntax.directive());
  asm.push('\n');
  asm.push_str(&format!(".globl {}\n", options.entry));
  asm.push_str(&format!("{}:\n", options.entry));

  for inst in program {
    asm.push_str(INDENT);
    asm.push_str(&syntax.render(inst));
    asm.push('\n');
  }

  asm
}

#[cfg(test)]
mod tests {
  use super::*;
  use Instruction::*;
  use Reg::*;

  #[test]
  fn literal_is_pushed_then_returned() {
    assert_eq!(
      generate(&AstNode::number(42)),
      vec![PushImm(42), Pop(Rax), Ret]
    );
  }

  #[test]
  fn operands_are_emitted_left_then_right() {
    let tree = AstNode::binary(BinaryOp::Sub, AstNode::number(8), AstNode::number(3));
    assert_eq!(
      generate(&tree),
      vec![
        PushImm(8),
        PushImm(3),
        Pop(Rdi),
        Pop(Rax),
        Sub(Rax, Rdi),
        Push(Rax),
        Pop(Rax),
        Ret,
      ]
    );
  }

  #[test]
  fn division_sign_extends_first() {
    let tree = AstNode::binary(BinaryOp::Div, AstNode::number(7), AstNode::number(2));
    let program = generate(&tree);
    assert_eq!(&program[4..6], &[Cqo, Idiv(Rdi)]);
  }

  #[test]
  fn nested_children_are_emitted_post_order() {
    // (2+3)*4
    let tree = AstNode::binary(
      BinaryOp::Mul,
      AstNode::binary(BinaryOp::Add, AstNode::number(2), AstNode::number(3)),
      AstNode::number(4),
    );
    let pushes: Vec<_> = generate(&tree)
      .into_iter()
      .filter(|inst| matches!(inst, PushImm(_)))
      .collect();
    assert_eq!(pushes, vec![PushImm(2), PushImm(3), PushImm(4)]);
  }

  #[test]
  fn long_left_deep_chain_is_lowered() {
    let terms = 100_000;
    let mut tree = AstNode::number(1);
    for _ in 1..terms {
      tree = AstNode::binary(BinaryOp::Add, tree, AstNode::number(1));
    }
    let program = generate(&tree);
    // One push per literal, then 4 instructions per addition, then pop + ret.
    assert_eq!(program.len(), terms + 4 * (terms - 1) + 2);
    assert_eq!(&program[..3], &[PushImm(1), PushImm(1), Pop(Rdi)]);
    assert_eq!(&program[program.len() - 2..], &[Pop(Rax), Ret]);
  }

  #[test]
  fn intel_rendering_puts_destination_first() {
    let syntax = Syntax::Intel;
    assert_eq!(syntax.render(&PushImm(5)), "push 5");
    assert_eq!(syntax.render(&Add(Rax, Rdi)), "add rax, rdi");
    assert_eq!(syntax.render(&Imul(Rax, Rdi)), "imul rax, rdi");
    assert_eq!(syntax.render(&Idiv(Rdi)), "idiv rdi");
  }

  #[test]
  fn att_rendering_puts_source_first() {
    let syntax = Syntax::Att;
    assert_eq!(syntax.render(&PushImm(5)), "push $5");
    assert_eq!(syntax.render(&Pop(Rdi)), "pop %rdi");
    assert_eq!(syntax.render(&Sub(Rax, Rdi)), "sub %rdi, %rax");
    assert_eq!(syntax.render(&Cqo), "cqo");
  }

  #[test]
  fn listing_has_preamble_and_indentation() {
    let program = generate(&AstNode::number(1));
    let options = CodegenOptions {
      syntax: Syntax::Att,
      entry: "_main".to_string(),
    };
    assert_eq!(
      emit(&program, &options),
      ".att_syntax prefix\n.globl _main\n_main:\n  push $1\n  pop %rax\n  ret\n"
    );
  }

  #[test]
  fn syntax_round_trips_through_strings() {
    assert_eq!("intel".parse::<Syntax>().unwrap(), Syntax::Intel);
    assert_eq!("att".parse::<Syntax>().unwrap(), Syntax::Att);
    assert_eq!(Syntax::Att.to_string(), "att");
    let err = "masm".parse::<Syntax>().unwrap_err();
    assert_eq!(
      err.to_string(),
      "unknown syntax \"masm\" (expected \"intel\" or \"att\")"
    );
  }
}
