//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer is intentionally tiny – it knows nothing about semantics
//! beyond recognising the six punctuators and decimal integer literals.

use log::{debug, trace};
use snafu::ResultExt;

use crate::error::{CompileResult, InvalidTokenSnafu, NumberOutOfRangeSnafu};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Punctuator,
  Num,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  /// Only set for `Num`.
  pub value: Option<i32>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize, value: Option<i32>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
    }
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      let value = text
        .parse::<i32>()
        .context(NumberOutOfRangeSnafu { loc: start, text })?;
      trace!("number {value} at {start}");
      tokens.push(Token::new(TokenKind::Num, start, i - start, Some(value)));
      continue;
    }

    if matches!(c, b'+' | b'-' | b'*' | b'/' | b'(' | b')') {
      trace!("punctuator '{}' at {i}", c as char);
      tokens.push(Token::new(TokenKind::Punctuator, i, 1, None));
      i += 1;
      continue;
    }

    let ch = input[i..].chars().next().unwrap_or('\0');
    return InvalidTokenSnafu { loc: i, ch }.fail();
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None));
  debug!("tokenized {} bytes into {} tokens", input.len(), tokens.len());
  Ok(tokens)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}
