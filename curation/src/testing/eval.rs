//! A tiny interpreter for the statement shapes the engine's rules emit.
//!
//! Supported:
//! - `SELECT * FROM `p.d.t` [WHERE <predicate>]`
//! - `SELECT COUNT(*) FROM `p.d.t` [WHERE <predicate>]`
//! - `CREATE TABLE IF NOT EXISTS `p.d.t` AS SELECT <col> FROM UNNEST([..]) AS <col>`
//!
//! Predicates support `AND`, `OR`, `NOT`, `IS [NOT] NULL`, the six
//! comparison operators, parentheses, integer/float/string literals,
//! `TRUE`/`FALSE`/`NULL` and `DATE('YYYY-MM-DD')`. Evaluation follows SQL
//! three-valued logic; `WHERE` keeps rows whose predicate is true.

use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// One table row, column name to value.
pub type Row = BTreeMap<String, Value>;

/// A fully qualified table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TablePath {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TablePath {
    pub fn new(project: &str, dataset: &str, table: &str) -> Self {
        Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    fn parse(quoted: &str) -> Option<Self> {
        let mut parts = quoted.split('.');
        let path = Self::new(parts.next()?, parts.next()?, parts.next()?);
        parts.next().is_none().then_some(path)
    }
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select { source: TablePath, filter: Option<Expr> },
    Count { source: TablePath, filter: Option<Expr> },
    CreateFromList { target: TablePath, column: String, values: Vec<Value> },
}

static SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+\*\s+FROM\s+`([^`]+)`(?:\s+WHERE\s+(.+?))?\s*;?\s*$")
        .expect("select pattern is valid")
});

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+COUNT\(\*\)\s+FROM\s+`([^`]+)`(?:\s+WHERE\s+(.+?))?\s*;?\s*$")
        .expect("count pattern is valid")
});

static CREATE_FROM_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*CREATE\s+TABLE\s+IF\s+NOT\s+EXISTS\s+`([^`]+)`\s+AS\s+SELECT\s+(\w+)\s+FROM\s+UNNEST\(\[([^\]]*)\]\)\s+AS\s+(\w+)\s*;?\s*$",
    )
    .expect("create pattern is valid")
});

/// Parses one statement.
pub fn parse_statement(sql: &str) -> Result<Statement, String> {
    if let Some(caps) = COUNT.captures(sql) {
        return Ok(Statement::Count {
            source: table_path(&caps[1])?,
            filter: caps.get(2).map(|m| parse_expr(m.as_str())).transpose()?,
        });
    }
    if let Some(caps) = SELECT.captures(sql) {
        return Ok(Statement::Select {
            source: table_path(&caps[1])?,
            filter: caps.get(2).map(|m| parse_expr(m.as_str())).transpose()?,
        });
    }
    if let Some(caps) = CREATE_FROM_LIST.captures(sql) {
        if !caps[2].eq_ignore_ascii_case(&caps[4]) {
            return Err(format!("column '{}' does not match alias '{}'", &caps[2], &caps[4]));
        }
        let values = caps[3]
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| literal(v).ok_or_else(|| format!("unsupported list value '{v}'")))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Statement::CreateFromList {
            target: table_path(&caps[1])?,
            column: caps[2].to_string(),
            values,
        });
    }
    Err("unsupported statement".to_string())
}

fn table_path(quoted: &str) -> Result<TablePath, String> {
    TablePath::parse(quoted).ok_or_else(|| format!("'{quoted}' is not project.dataset.table"))
}

fn literal(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Some(Value::from(f));
    }
    raw.strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .map(|s| Value::String(s.to_string()))
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A predicate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    Compare { op: CmpOp, left: Box<Expr>, right: Box<Expr> },
}

impl Expr {
    /// Evaluates the expression as a predicate. `None` is SQL `NULL`.
    pub fn test(&self, row: &Row) -> Option<bool> {
        match self {
            Self::Literal(Value::Bool(b)) => Some(*b),
            Self::Literal(_) | Self::Column(_) => match self.value(row) {
                Value::Bool(b) => Some(b),
                _ => None,
            },
            Self::Not(inner) => inner.test(row).map(|b| !b),
            Self::And(l, r) => match (l.test(row), r.test(row)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Self::Or(l, r) => match (l.test(row), r.test(row)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Self::IsNull { expr, negated } => Some(expr.value(row).is_null() != *negated),
            Self::Compare { op, left, right } => {
                let ordering = compare(&left.value(row), &right.value(row))?;
                Some(match op {
                    CmpOp::Eq => ordering == Ordering::Equal,
                    CmpOp::Ne => ordering != Ordering::Equal,
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::Le => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    CmpOp::Ge => ordering != Ordering::Less,
                })
            }
        }
    }

    fn value(&self, row: &Row) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Column(name) => row.get(name).cloned().unwrap_or(Value::Null),
            other => other.test(row).map_or(Value::Null, Value::Bool),
        }
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Value),
    Str(String),
    LParen,
    RParen,
    Op(CmpOp),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|c| *c == '\'')
                    .ok_or("unterminated string literal")?;
                tokens.push(Token::Str(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '<' => {
                let (op, width) = match chars.get(i + 1) {
                    Some('=') => (CmpOp::Le, 2),
                    Some('>') => (CmpOp::Ne, 2),
                    _ => (CmpOp::Lt, 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '>' => {
                let (op, width) = if chars.get(i + 1) == Some(&'=') { (CmpOp::Ge, 2) } else { (CmpOp::Gt, 1) };
                tokens.push(Token::Op(op));
                i += width;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                let value = literal(&raw).ok_or_else(|| format!("bad number '{raw}'"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

/// Parses a predicate expression.
pub fn parse_expr(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected token {token:?}")),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(id)) if id.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), String> {
        match self.next() {
            Some(ref t) if t == token => Ok(()),
            other => Err(format!("expected {token:?}, found {other:?}")),
        }
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.keyword("OR") {
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.not()?;
        while self.keyword("AND") {
            left = Expr::And(Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, String> {
        if self.keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.primary()?;
        if self.keyword("IS") {
            let negated = self.keyword("NOT");
            if !self.keyword("NULL") {
                return Err("expected NULL after IS".to_string());
            }
            return Ok(Expr::IsNull { expr: Box::new(left), negated });
        }
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.primary()?;
            return Ok(Expr::Compare { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Expr::Literal(v)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(id)) => match id.to_ascii_uppercase().as_str() {
                "NULL" => Ok(Expr::Literal(Value::Null)),
                "TRUE" => Ok(Expr::Literal(Value::Bool(true))),
                "FALSE" => Ok(Expr::Literal(Value::Bool(false))),
                "DATE" => {
                    self.expect(&Token::LParen)?;
                    let date = match self.next() {
                        Some(Token::Str(s)) => s,
                        other => return Err(format!("DATE() expects a string literal, found {other:?}")),
                    };
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Literal(Value::String(date)))
                }
                "AND" | "OR" | "NOT" | "IS" | "IN" | "EXISTS" | "SELECT" => {
                    Err(format!("unsupported keyword '{id}'"))
                }
                _ => {
                    if self.peek() == Some(&Token::LParen) {
                        return Err(format!("unsupported function '{id}'"));
                    }
                    Ok(Expr::Column(id))
                }
            },
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}
