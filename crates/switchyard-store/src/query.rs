//! Document query language.
//!
//! ```text
//! query      := filter clause*
//! clause     := "order" path ("asc" | "desc") | "limit" count | "offset" count
//! filter     := conjunct ("or" conjunct)*
//! conjunct   := term ("and" term)*
//! term       := "(" filter ")" | "true" | "false" | path op value
//! path       := word ("." word)*
//! op         := "=" | "!=" | ">=" | "<=" | ">" | "<"
//! value      := $n | 'string' | number | true | false | null
//! count      := $n | whole number
//! ```
//!
//! Comparisons only match when the document value has the literal's type;
//! a missing path never matches. An empty query matches every document.

use std::cmp::Ordering;

use serde_json::Value;

use crate::StoreError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Word(String),
  Dot,
  Op(Op),
  Str(String),
  Num(f64),
  Placeholder(usize),
  Open,
  Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
  Eq,
  Ne,
  Gt,
  Lt,
  Ge,
  Le,
}

impl Op {
  fn accepts(self, ordering: Ordering) -> bool {
    match self {
      Op::Eq => ordering == Ordering::Equal,
      Op::Ne => ordering != Ordering::Equal,
      Op::Gt => ordering == Ordering::Greater,
      Op::Lt => ordering == Ordering::Less,
      Op::Ge => ordering != Ordering::Less,
      Op::Le => ordering != Ordering::Greater,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
  Str(String),
  Num(f64),
  Bool(bool),
  Null,
  /// Arrays and objects bound through placeholders; equality only.
  Other(Value),
}

impl From<&Value> for Literal {
  fn from(value: &Value) -> Self {
    match value {
      Value::String(s) => Literal::Str(s.clone()),
      Value::Number(n) => n.as_f64().map(Literal::Num).unwrap_or(Literal::Null),
      Value::Bool(b) => Literal::Bool(*b),
      Value::Null => Literal::Null,
      other => Literal::Other(other.clone()),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
  Const(bool),
  Compare {
    path: Vec<String>,
    op: Op,
    literal: Literal,
  },
  And(Vec<Expr>),
  Or(Vec<Expr>),
}

impl Expr {
  fn eval(&self, doc: &Value) -> bool {
    match self {
      Expr::Const(b) => *b,
      Expr::Compare { path, op, literal } => match lookup(doc, path) {
        Some(value) => compare(value, *op, literal),
        None => false,
      },
      Expr::And(terms) => terms.iter().all(|t| t.eval(doc)),
      Expr::Or(terms) => terms.iter().any(|t| t.eval(doc)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
struct Order {
  path: Vec<String>,
  descending: bool,
}

/// A parsed query with its placeholders bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  filter: Expr,
  order: Option<Order>,
  limit: Option<usize>,
  offset: Option<usize>,
}

impl Query {
  /// Parse `text` and bind `$n` placeholders to `params[n - 1]`.
  pub fn compile(text: &str, params: &[Value]) -> Result<Self, StoreError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
      return Ok(Self {
        filter: Expr::Const(true),
        order: None,
        limit: None,
        offset: None,
      });
    }

    let mut parser = Parser {
      tokens,
      pos: 0,
      params,
    };
    let filter = parser.filter()?;
    let mut query = Self {
      filter,
      order: None,
      limit: None,
      offset: None,
    };

    while parser.peek().is_some() {
      if parser.eat_keyword("order") {
        let path = parser.path()?;
        let descending = if parser.eat_keyword("desc") {
          true
        } else if parser.eat_keyword("asc") {
          false
        } else {
          return Err(StoreError::query("expected 'asc' or 'desc' after order path"));
        };
        query.order = Some(Order { path, descending });
      } else if parser.eat_keyword("limit") {
        query.limit = Some(parser.count()?);
      } else if parser.eat_keyword("offset") {
        query.offset = Some(parser.count()?);
      } else {
        return Err(StoreError::query(format!(
          "unexpected token {:?}",
          parser.peek()
        )));
      }
    }

    Ok(query)
  }

  pub fn matches(&self, doc: &Value) -> bool {
    self.filter.eval(doc)
  }

  /// Filter, order and page `docs`.
  pub fn apply(&self, docs: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut results: Vec<Value> = docs.into_iter().filter(|doc| self.matches(doc)).collect();

    if let Some(order) = &self.order {
      results.sort_by(|a, b| {
        let ordering = order_values(lookup(a, &order.path), lookup(b, &order.path));
        if order.descending {
          ordering.reverse()
        } else {
          ordering
        }
      });
    }

    let offset = self.offset.unwrap_or(0);
    let limit = self.limit.unwrap_or(usize::MAX);
    results.into_iter().skip(offset).take(limit).collect()
  }
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
  path.iter().try_fold(doc, |value, key| value.as_object()?.get(key))
}

fn compare(value: &Value, op: Op, literal: &Literal) -> bool {
  match (literal, value) {
    (Literal::Str(b), Value::String(a)) => op.accepts(a.as_str().cmp(b.as_str())),
    (Literal::Num(b), Value::Number(a)) => a
      .as_f64()
      .and_then(|a| a.partial_cmp(b))
      .is_some_and(|ordering| op.accepts(ordering)),
    (Literal::Bool(b), Value::Bool(a)) => match op {
      Op::Eq => a == b,
      Op::Ne => a != b,
      _ => false,
    },
    (Literal::Null, a) => match op {
      Op::Eq => a.is_null(),
      Op::Ne => !a.is_null(),
      _ => false,
    },
    (Literal::Other(b), a) => match op {
      Op::Eq => a == b,
      Op::Ne => a != b,
      _ => false,
    },
    _ => false,
  }
}

fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  match (a, b) {
    (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
    (Some(Value::Number(a)), Some(Value::Number(b))) => a
      .as_f64()
      .partial_cmp(&b.as_f64())
      .unwrap_or(Ordering::Equal),
    (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
    _ => Ordering::Equal,
  }
}

fn tokenize(text: &str) -> Result<Vec<Token>, StoreError> {
  let chars: Vec<char> = text.chars().collect();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    match c {
      c if c.is_whitespace() => i += 1,
      '.' => {
        tokens.push(Token::Dot);
        i += 1;
      }
      '(' => {
        tokens.push(Token::Open);
        i += 1;
      }
      ')' => {
        tokens.push(Token::Close);
        i += 1;
      }
      '=' => {
        tokens.push(Token::Op(Op::Eq));
        i += 1;
      }
      '!' | '>' | '<' => {
        let has_eq = chars.get(i + 1) == Some(&'=');
        let op = match (c, has_eq) {
          ('!', true) => Op::Ne,
          ('>', true) => Op::Ge,
          ('<', true) => Op::Le,
          ('>', false) => Op::Gt,
          ('<', false) => Op::Lt,
          _ => return Err(StoreError::query("expected '=' after '!'")),
        };
        tokens.push(Token::Op(op));
        i += if has_eq { 2 } else { 1 };
      }
      '\'' => {
        let end = chars[i + 1..]
          .iter()
          .position(|&c| c == '\'')
          .ok_or_else(|| StoreError::query("unterminated string"))?;
        tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
        i += end + 2;
      }
      '$' => {
        let digits: String = chars[i + 1..]
          .iter()
          .take_while(|c| c.is_ascii_digit())
          .collect();
        let index: usize = digits
          .parse()
          .map_err(|_| StoreError::query("expected a number after '$'"))?;
        if index == 0 {
          return Err(StoreError::query("placeholders start at $1"));
        }
        tokens.push(Token::Placeholder(index));
        i += 1 + digits.len();
      }
      c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())) => {
        let start = i;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
          i += 1;
        }
        if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
          i += 1;
          while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
          }
        }
        let text: String = chars[start..i].iter().collect();
        let number = text
          .parse()
          .map_err(|_| StoreError::query(format!("invalid number '{text}'")))?;
        tokens.push(Token::Num(number));
      }
      c if c.is_alphabetic() || c == '_' => {
        let start = i;
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
          i += 1;
        }
        tokens.push(Token::Word(chars[start..i].iter().collect()));
      }
      other => return Err(StoreError::query(format!("unexpected character '{other}'"))),
    }
  }

  Ok(tokens)
}

struct Parser<'a> {
  tokens: Vec<Token>,
  pos: usize,
  params: &'a [Value],
}

impl Parser<'_> {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_at(&self, offset: usize) -> Option<&Token> {
    self.tokens.get(self.pos + offset)
  }

  fn advance(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn is_keyword(&self, keyword: &str) -> bool {
    matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
  }

  fn eat_keyword(&mut self, keyword: &str) -> bool {
    if self.is_keyword(keyword) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn param(&self, index: usize) -> Result<&Value, StoreError> {
    self.params.get(index - 1).ok_or_else(|| {
      StoreError::query(format!(
        "placeholder ${index} has no parameter ({} given)",
        self.params.len()
      ))
    })
  }

  fn filter(&mut self) -> Result<Expr, StoreError> {
    let mut terms = vec![self.conjunct()?];
    while self.eat_keyword("or") {
      terms.push(self.conjunct()?);
    }
    Ok(if terms.len() == 1 {
      terms.remove(0)
    } else {
      Expr::Or(terms)
    })
  }

  fn conjunct(&mut self) -> Result<Expr, StoreError> {
    let mut terms = vec![self.term()?];
    while self.eat_keyword("and") {
      terms.push(self.term()?);
    }
    Ok(if terms.len() == 1 {
      terms.remove(0)
    } else {
      Expr::And(terms)
    })
  }

  fn term(&mut self) -> Result<Expr, StoreError> {
    if self.peek() == Some(&Token::Open) {
      self.pos += 1;
      let inner = self.filter()?;
      if self.advance() != Some(Token::Close) {
        return Err(StoreError::query("expected ')'"));
      }
      return Ok(inner);
    }

    let followed_by_op = matches!(self.peek_at(1), Some(Token::Op(_)) | Some(Token::Dot));
    if !followed_by_op {
      if self.eat_keyword("true") {
        return Ok(Expr::Const(true));
      }
      if self.eat_keyword("false") {
        return Ok(Expr::Const(false));
      }
    }

    let path = self.path()?;
    let op = match self.advance() {
      Some(Token::Op(op)) => op,
      other => return Err(StoreError::query(format!("expected comparison, found {other:?}"))),
    };
    let literal = self.value()?;
    Ok(Expr::Compare { path, op, literal })
  }

  fn path(&mut self) -> Result<Vec<String>, StoreError> {
    let mut path = Vec::new();
    loop {
      match self.advance() {
        Some(Token::Word(word)) => path.push(word),
        other => return Err(StoreError::query(format!("expected field name, found {other:?}"))),
      }
      if self.peek() != Some(&Token::Dot) {
        return Ok(path);
      }
      self.pos += 1;
    }
  }

  fn value(&mut self) -> Result<Literal, StoreError> {
    match self.advance() {
      Some(Token::Placeholder(index)) => Ok(Literal::from(self.param(index)?)),
      Some(Token::Str(s)) => Ok(Literal::Str(s)),
      Some(Token::Num(n)) => Ok(Literal::Num(n)),
      Some(Token::Word(w)) if w == "true" => Ok(Literal::Bool(true)),
      Some(Token::Word(w)) if w == "false" => Ok(Literal::Bool(false)),
      Some(Token::Word(w)) if w == "null" => Ok(Literal::Null),
      other => Err(StoreError::query(format!("expected value, found {other:?}"))),
    }
  }

  fn count(&mut self) -> Result<usize, StoreError> {
    let count = match self.advance() {
      Some(Token::Placeholder(index)) => self.param(index)?.as_u64(),
      Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => Some(n as u64),
      _ => None,
    };
    count
      .map(|n| n as usize)
      .ok_or_else(|| StoreError::query("limit and offset take a whole number"))
  }
}
