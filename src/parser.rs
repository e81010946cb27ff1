//! Recursive-descent parser producing an expression AST.
//!
//! The parser mirrors the classic chibicc structure with one helper per
//! precedence level: `parse_expr` handles `+`/`-`, `parse_term` handles
//! `*`/`/` and `parse_primary` handles literals and parenthesised groups.

use std::{fmt, mem};

use log::debug;

use crate::error::{
  CompileResult, ExpectedNumberSnafu, ExpectedOperatorSnafu, NestingTooDeepSnafu,
  TrailingTokensSnafu, UnmatchedParenthesisSnafu,
};
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};

/// Deepest parenthesis nesting `parse_primary` will recurse into.
pub const MAX_NESTING: usize = 256;

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
}

impl BinaryOp {
  pub fn symbol(self) -> &'static str {
    match self {
      Self::Add => "+",
      Self::Sub => "-",
      Self::Mul => "*",
      Self::Div => "/",
    }
  }
}

/// Expression tree produced by the parser.
///
/// A chain like `1+1+...+1` is as deep as it is long, so every walk over the
/// tree (including dropping it) uses an explicit stack instead of recursion.
#[derive(Debug, PartialEq, Eq)]
pub enum AstNode {
  Num {
    value: i32,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<AstNode>,
    rhs: Box<AstNode>,
  },
}

impl AstNode {
  pub fn number(value: i32) -> Self {
    Self::Num { value }
  }

  pub fn binary(op: BinaryOp, lhs: AstNode, rhs: AstNode) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  /// Longest path from this node down to a leaf, counting this node.
  pub fn depth(&self) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(self, 1)];
    while let Some((node, depth)) = pending.pop() {
      deepest = deepest.max(depth);
      if let Self::Binary { lhs, rhs, .. } = node {
        pending.push((lhs.as_ref(), depth + 1));
        pending.push((rhs.as_ref(), depth + 1));
      }
    }
    deepest
  }

  /// Move both children out, leaving leaves behind.
  fn take_children(&mut self, out: &mut Vec<AstNode>) {
    if let Self::Binary { lhs, rhs, .. } = self {
      out.push(mem::replace(&mut **lhs, AstNode::number(0)));
      out.push(mem::replace(&mut **rhs, AstNode::number(0)));
    }
  }
}

impl Drop for AstNode {
  fn drop(&mut self) {
    let mut pending = Vec::new();
    self.take_children(&mut pending);
    while let Some(mut node) = pending.pop() {
      node.take_children(&mut pending);
    }
  }
}

enum Piece<'a> {
  Node(&'a AstNode),
  Text(&'static str),
}

/// Prints the tree as an S-expression, e.g. `(+ 2 (* 3 4))`.
impl fmt::Display for AstNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut pending = vec![Piece::Node(self)];
    while let Some(piece) = pending.pop() {
      match piece {
        Piece::Text(text) => f.write_str(text)?,
        Piece::Node(Self::Num { value }) => write!(f, "{value}")?,
        Piece::Node(Self::Binary { op, lhs, rhs }) => {
          write!(f, "({} ", op.symbol())?;
          pending.push(Piece::Text(")"));
          pending.push(Piece::Node(rhs.as_ref()));
          pending.push(Piece::Text(" "));
          pending.push(Piece::Node(lhs.as_ref()));
        }
      }
    }
    Ok(())
  }
}

/// Parse a whole expression from the token stream.
///
/// The entire input must be consumed; anything left after a complete
/// expression is reported rather than silently dropped.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<AstNode> {
  let mut stream = TokenStream::new(tokens, source);
  let node = parse_expr(&mut stream)?;

  if let Some(token) = stream.peek()
    && token.kind != TokenKind::Eof
  {
    let got = describe_token(Some(token), source);
    let loc = token.loc;
    let starts_operand = token.kind == TokenKind::Num || token_text(token, source) == "(";
    return if starts_operand {
      ExpectedOperatorSnafu { loc, got }.fail()
    } else {
      TrailingTokensSnafu { loc, got }.fail()
    };
  }

  debug!("parsed {node} (depth {})", node.depth());
  Ok(node)
}

// expr = term ("+" term | "-" term)*
fn parse_expr(stream: &mut TokenStream) -> CompileResult<AstNode> {
  let mut node = parse_term(stream)?;

  loop {
    if stream.equal("+") {
      let rhs = parse_term(stream)?;
      node = AstNode::binary(BinaryOp::Add, node, rhs);
    } else if stream.equal("-") {
      let rhs = parse_term(stream)?;
      node = AstNode::binary(BinaryOp::Sub, node, rhs);
    } else {
      return Ok(node);
    }
  }
}

// term = primary ("*" primary | "/" primary)*
fn parse_term(stream: &mut TokenStream) -> CompileResult<AstNode> {
  let mut node = parse_primary(stream)?;

  loop {
    if stream.equal("*") {
      let rhs = parse_primary(stream)?;
      node = AstNode::binary(BinaryOp::Mul, node, rhs);
    } else if stream.equal("/") {
      let rhs = parse_primary(stream)?;
      node = AstNode::binary(BinaryOp::Div, node, rhs);
    } else {
      return Ok(node);
    }
  }
}

// primary = "(" expr ")" | num
fn parse_primary(stream: &mut TokenStream) -> CompileResult<AstNode> {
  let open = stream.loc();
  if stream.equal("(") {
    if stream.depth == MAX_NESTING {
      return NestingTooDeepSnafu {
        loc: open,
        limit: MAX_NESTING,
      }
      .fail();
    }
    stream.depth += 1;
    let node = parse_expr(stream)?;
    stream.expect_close_paren()?;
    stream.depth -= 1;
    return Ok(node);
  }

  let value = stream.get_number()?;
  Ok(AstNode::number(value))
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
  /// Open parentheses enclosing the cursor.
  depth: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
      depth: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  /// Offset and description of the current token, falling back to the end of
  /// the source if the cursor ran past the `Eof` marker.
  fn here(&self) -> (usize, String) {
    match self.peek() {
      Some(token) => (token.loc, describe_token(Some(token), self.source)),
      None => (self.source.len(), "EOF".to_string()),
    }
  }

  /// Consume the current token if it matches the provided punctuator.
  fn equal(&mut self, op: &str) -> bool {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Punctuator
      && token_text(token, self.source) == op
    {
      self.pos += 1;
      return true;
    }
    false
  }

  fn expect_close_paren(&mut self) -> CompileResult<()> {
    if self.equal(")") {
      return Ok(());
    }
    let (loc, got) = self.here();
    UnmatchedParenthesisSnafu { loc, got }.fail()
  }

  /// Consume the current token as an integer literal and return its value.
  fn get_number(&mut self) -> CompileResult<i32> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
      && let Some(value) = token.value
    {
      self.pos += 1;
      return Ok(value);
    }
    let (loc, got) = self.here();
    ExpectedNumberSnafu { loc, got }.fail()
  }
}
