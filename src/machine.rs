//! A tiny x86-64 subset simulator for generated programs.
//!
//! Only the instructions the code generator emits are modelled. Arithmetic
//! wraps like the hardware does and `idiv` faults the same way `#DE` would,
//! so running a program here gives the value the assembled binary returns.

use log::trace;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::codegen::{Instruction, Reg};
use crate::compile;
use crate::error::CompileError;

pub type MachineResult<T> = Result<T, MachineError>;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum MachineError {
  #[snafu(display("instruction {index}: pop from an empty stack"))]
  StackUnderflow { index: usize },

  #[snafu(display("instruction {index}: divide error ({dividend} / {divisor})"))]
  DivideError {
    index: usize,
    dividend: i64,
    divisor: i64,
  },

  #[snafu(display("ret with {depth} value(s) still on the stack"))]
  UnbalancedStack { depth: usize },

  #[snafu(display("program ended without ret"))]
  MissingReturn,
}

/// Register file and operand stack.
#[derive(Debug, Default)]
pub struct Machine {
  rax: i64,
  rdi: i64,
  rdx: i64,
  stack: Vec<i64>,
}

impl Machine {
  pub fn new() -> Self {
    Self::default()
  }

  fn get(&self, reg: Reg) -> i64 {
    match reg {
      Reg::Rax => self.rax,
      Reg::Rdi => self.rdi,
    }
  }

  fn set(&mut self, reg: Reg, value: i64) {
    match reg {
      Reg::Rax => self.rax = value,
      Reg::Rdi => self.rdi = value,
    }
  }

  /// Execute until `ret` and return the C `int` result (the low half of `rax`).
  pub fn run(&mut self, program: &[Instruction]) -> MachineResult<i32> {
    for (index, inst) in program.iter().enumerate() {
      trace!("{index}: {inst:?} stack={:?}", self.stack);
      match *inst {
        Instruction::PushImm(value) => self.stack.push(i64::from(value)),
        Instruction::Push(reg) => self.stack.push(self.get(reg)),
        Instruction::Pop(reg) => {
          let value = self.stack.pop().context(StackUnderflowSnafu { index })?;
          self.set(reg, value);
        }
        Instruction::Add(dst, src) => self.set(dst, self.get(dst).wrapping_add(self.get(src))),
        Instruction::Sub(dst, src) => self.set(dst, self.get(dst).wrapping_sub(self.get(src))),
        Instruction::Imul(dst, src) => self.set(dst, self.get(dst).wrapping_mul(self.get(src))),
        Instruction::Cqo => self.rdx = if self.rax < 0 { -1 } else { 0 },
        Instruction::Idiv(src) => self.idiv(index, self.get(src))?,
        Instruction::Ret => {
          if !self.stack.is_empty() {
            return UnbalancedStackSnafu {
              depth: self.stack.len(),
            }
            .fail();
          }
          return Ok(self.rax as i32);
        }
      }
    }
    MissingReturnSnafu.fail()
  }

  fn idiv(&mut self, index: usize, divisor: i64) -> MachineResult<()> {
    let dividend = (i128::from(self.rdx) << 64) | i128::from(self.rax as u64);
    let fault = || DivideSnafu {
      index,
      dividend: self.rax,
      divisor,
    };
    if divisor == 0 {
      return fault().fail();
    }
    let divisor_wide = i128::from(divisor);
    let quotient = i64::try_from(dividend / divisor_wide).map_err(|_| fault().build())?;
    // |remainder| < |divisor|, so it always fits.
    let remainder = (dividend % divisor_wide) as i64;
    self.rax = quotient;
    self.rdx = remainder;
    Ok(())
  }
}

/// Failure of [`evaluate`]: either the expression did not compile or the
/// generated program faulted.
#[derive(Debug, Snafu)]
pub enum EvalError {
  #[snafu(display("{source}"))]
  Compile { source: CompileError },

  #[snafu(display("{source}"))]
  Execute { source: MachineError },
}

/// Compile an expression and run the generated program.
pub fn evaluate(expr: &str) -> Result<i32, EvalError> {
  let program = compile(expr).context(CompileSnafu)?;
  Machine::new().run(&program).context(ExecuteSnafu)
}

#[cfg(test)]
mod tests {
  use super::*;
  use Instruction::*;
  use Reg::*;

  fn value_of(expr: &str) -> i32 {
    evaluate(expr).unwrap()
  }

  #[test]
  fn precedence_and_associativity() {
    assert_eq!(value_of("42"), 42);
    assert_eq!(value_of("2+3*4"), 14);
    assert_eq!(value_of("8-3-2"), 3);
    assert_eq!(value_of("(2+3)*4"), 20);
    assert_eq!(value_of("100/10/5"), 2);
    assert_eq!(value_of("5+6*7"), 47);
    assert_eq!(value_of("5*(9-6)"), 15);
    assert_eq!(value_of("(3+5)/2"), 4);
  }

  #[test]
  fn division_truncates_toward_zero() {
    assert_eq!(value_of("7/2"), 3);
    assert_eq!(value_of("(1-8)/2"), -3);
    assert_eq!(value_of("7/(0-2)"), -3);
  }

  #[test]
  fn intermediate_results_can_be_negative() {
    assert_eq!(value_of("1-2-3"), -4);
    assert_eq!(value_of("(0-3)*(0-4)"), 12);
  }

  #[test]
  fn results_wider_than_int_are_truncated_like_eax() {
    assert_eq!(value_of("2147483647+1"), i32::MIN);
    assert_eq!(value_of("65536*65536"), 0);
  }

  #[test]
  fn division_by_zero_faults_at_run_time() {
    match evaluate("1/0") {
      Err(EvalError::Execute {
        source: MachineError::DivideError {
          dividend, divisor, ..
        },
      }) => {
        assert_eq!(dividend, 1);
        assert_eq!(divisor, 0);
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn compile_errors_pass_through() {
    assert!(matches!(
      evaluate("(1+2"),
      Err(EvalError::Compile {
        source: CompileError::UnmatchedParenthesis { .. }
      })
    ));
  }

  #[test]
  fn evaluates_exactly_what_compile_emits() {
    let program = compile("(2+3)*4").unwrap();
    assert_eq!(Machine::new().run(&program), Ok(20));
    assert_eq!(value_of("(2+3)*4"), 20);
  }

  #[test]
  fn long_chains_evaluate() {
    let source = vec!["1"; 100_000].join("+");
    assert_eq!(value_of(&source), 100_000);
  }

  #[test]
  fn deep_nesting_is_a_compile_error() {
    let source = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
    assert!(matches!(
      evaluate(&source),
      Err(EvalError::Compile {
        source: CompileError::NestingTooDeep { .. }
      })
    ));
  }

  #[test]
  fn quotient_overflow_faults() {
    let program = [
      PushImm(i32::MIN),
      PushImm(i32::MIN),
      Pop(Rdi),
      Pop(Rax),
      Imul(Rax, Rdi),
      Push(Rax),
      Pop(Rax),
      Add(Rax, Rax),
      Push(Rax),
      PushImm(-1),
      Pop(Rdi),
      Pop(Rax),
      Cqo,
      Idiv(Rdi),
      Push(Rax),
      Pop(Rax),
      Ret,
    ];
    assert_eq!(
      Machine::new().run(&program),
      Err(MachineError::DivideError {
        index: 13,
        dividend: i64::MIN,
        divisor: -1,
      })
    );
  }

  #[test]
  fn popping_an_empty_stack_underflows() {
    assert_eq!(
      Machine::new().run(&[Pop(Rax), Ret]),
      Err(MachineError::StackUnderflow { index: 0 })
    );
  }

  #[test]
  fn leftover_values_are_unbalanced() {
    assert_eq!(
      Machine::new().run(&[PushImm(1), PushImm(2), Pop(Rax), Ret]),
      Err(MachineError::UnbalancedStack { depth: 1 })
    );
  }

  #[test]
  fn falling_off_the_end_is_an_error() {
    assert_eq!(
      Machine::new().run(&[PushImm(1), Pop(Rax)]),
      Err(MachineError::MissingReturn)
    );
  }
}
