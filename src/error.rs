//! Shared error utilities used across the compilation pipeline.
//!
//! Every stage reports failures through [`CompileError`]. Variants carry the
//! byte offset of the offending input so the driver can point at it with a
//! caret in the style of chibicc.

use snafu::Snafu;
use std::num::ParseIntError;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("usage: exprcc <expr> (expected 1 argument, got {got})"))]
  WrongArgumentCount { got: usize },

  #[snafu(display("invalid token '{ch}'"))]
  InvalidToken { loc: usize, ch: char },

  #[snafu(display("number {text} does not fit in a 32-bit int"))]
  NumberOutOfRange {
    loc: usize,
    text: String,
    source: ParseIntError,
  },

  #[snafu(display("expected a number, but got \"{got}\""))]
  ExpectedNumber { loc: usize, got: String },

  #[snafu(display("expected \")\", but got \"{got}\""))]
  UnmatchedParenthesis { loc: usize, got: String },

  #[snafu(display("expected an operator, but got \"{got}\""))]
  ExpectedOperator { loc: usize, got: String },

  #[snafu(display("unexpected \"{got}\" after expression"))]
  TrailingTokens { loc: usize, got: String },

  #[snafu(display("parentheses nested deeper than {limit} levels"))]
  NestingTooDeep { loc: usize, limit: usize },
}

impl CompileError {
  /// Byte offset into the source the error is anchored at, if any.
  pub fn loc(&self) -> Option<usize> {
    match self {
      Self::WrongArgumentCount { .. } => None,
      Self::InvalidToken { loc, .. }
      | Self::NumberOutOfRange { loc, .. }
      | Self::ExpectedNumber { loc, .. }
      | Self::UnmatchedParenthesis { loc, .. }
      | Self::ExpectedOperator { loc, .. }
      | Self::TrailingTokens { loc, .. }
      | Self::NestingTooDeep { loc, .. } => Some(*loc),
    }
  }

  /// Format the error against the source it was raised for: the line holding
  /// the failing byte, then a caret under its column followed by the message.
  pub fn render(&self, source: &str) -> String {
    let Some(loc) = self.loc() else {
      return self.to_string();
    };

    let mut loc = loc.min(source.len());
    while !source.is_char_boundary(loc) {
      loc -= 1;
    }
    let line_start = source[..loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[loc..].find('\n').map_or(source.len(), |i| loc + i);
    let line = &source[line_start..line_end];
    let column = source[line_start..loc].chars().count();
    format!("{line}\n{}^ {self}", " ".repeat(column))
  }
}
