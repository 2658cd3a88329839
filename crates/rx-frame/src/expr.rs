//! Expression engine for row filters written as strings over table columns.
//!
//! Supports arithmetic (+, -, *, /, %), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), the conditional `c ? a : b`, the literals
//! `true`/`false`, float literals with a trailing `f` (`0.06f`), and built-in
//! functions (abs, fabs, sqrt, log, exp, pow, min, max, cos, sin).
//!
//! Every value is an `f64`; booleans are 1.0/0.0 and a value is truthy when
//! it is non-zero and not NaN.

use rx_core::{Error, Result};

use crate::table::Table;

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize), // index into required_branches
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
    Cos,
    Sin,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        Some(match name {
            "abs" | "fabs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "log" => (Func::Log, 1),
            "exp" => (Func::Exp, 1),
            "cos" => (Func::Cos, 1),
            "sin" => (Func::Sin, 1),
            "pow" => (Func::Pow, 2),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            _ => return None,
        })
    }
}

/// A compiled expression ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
    /// Column names referenced by this expression (ordered by first occurrence).
    pub required_branches: Vec<String>,
}

impl CompiledExpr {
    /// Parse and compile an expression string.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(Error::Expression("empty expression".into()));
        }
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_cond()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::Expression(format!(
                "unexpected token after expression: {:?}",
                parser.tokens[parser.pos]
            )));
        }
        let branches = std::mem::take(&mut parser.branches);
        Ok(CompiledExpr { source: input.trim().to_string(), ast, required_branches: branches })
    }

    /// The expression text as given (trimmed).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the expression for a single row.
    ///
    /// `values` must have the same length and order as `required_branches`.
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval_expr(&self.ast, values)
    }

    /// Evaluate over every row of `table`.
    pub fn eval_table(&self, table: &Table) -> Result<Vec<f64>> {
        let columns = self
            .required_branches
            .iter()
            .map(|name| {
                let col = table.column(name)?;
                if !col.dtype().is_scalar_numeric() {
                    return Err(Error::Expression(format!(
                        "column '{name}' of type {:?} cannot be used in '{}'",
                        col.dtype(),
                        self.source
                    )));
                }
                col.to_f64()
            })
            .collect::<Result<Vec<_>>>()?;
        let n = table.num_rows();
        let mut row = vec![0.0f64; columns.len()];
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            for (j, col) in columns.iter().enumerate() {
                row[j] = col[i];
            }
            out.push(eval_expr(&self.ast, &row));
        }
        Ok(out)
    }

    /// Evaluate as a row predicate.
    pub fn eval_mask(&self, table: &Table) -> Result<Vec<bool>> {
        Ok(self.eval_table(table)?.into_iter().map(truthy).collect())
    }
}

fn truthy(x: f64) -> bool {
    x != 0.0 && !x.is_nan()
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr(e: &Expr, vals: &[f64]) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => vals[*i],
        Expr::UnaryNeg(a) => -eval_expr(a, vals),
        Expr::UnaryNot(a) => flag(!truthy(eval_expr(a, vals))),
        Expr::Cond(c, a, b) => {
            if truthy(eval_expr(c, vals)) {
                eval_expr(a, vals)
            } else {
                eval_expr(b, vals)
            }
        }
        Expr::BinOp(BinOp::And, a, b) => {
            flag(truthy(eval_expr(a, vals)) && truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(BinOp::Or, a, b) => {
            flag(truthy(eval_expr(a, vals)) || truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vals);
            let rhs = eval_expr(b, vals);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Rem => lhs % rhs,
                BinOp::Eq => flag((lhs - rhs).abs() < f64::EPSILON),
                BinOp::Ne => flag((lhs - rhs).abs() >= f64::EPSILON),
                BinOp::Lt => flag(lhs < rhs),
                BinOp::Le => flag(lhs <= rhs),
                BinOp::Gt => flag(lhs > rhs),
                BinOp::Ge => flag(lhs >= rhs),
                BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled above"),
            }
        }
        Expr::Call(f, args) => {
            let a0 = || eval_expr(&args[0], vals);
            let a1 = || eval_expr(&args[1], vals);
            match f {
                Func::Abs => a0().abs(),
                Func::Sqrt => a0().sqrt(),
                Func::Log => a0().ln(),
                Func::Exp => a0().exp(),
                Func::Cos => a0().cos(),
                Func::Sin => a0().sin(),
                Func::Pow => a0().powf(a1()),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if i + 1 < chars.len() {
            let two: String = chars[i..i + 2].iter().collect();
            let tok = match two.as_str() {
                "&&" => Some(Token::And),
                "||" => Some(Token::Or),
                "==" => Some(Token::Eq),
                "!=" => Some(Token::Ne),
                "<=" => Some(Token::Le),
                ">=" => Some(Token::Ge),
                "::" => {
                    return Err(Error::Expression(format!(
                        "qualified names are not supported: '{input}'"
                    )));
                }
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 =
                s.parse().map_err(|_| Error::Expression(format!("invalid number: '{s}'")))?;
            // C-style float suffix
            if i < chars.len() && (chars[i] == 'f' || chars[i] == 'F') {
                i += 1;
            }
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(Error::Expression(format!("unexpected character: '{c}'")));
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    branches: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, branches: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.branches.iter().position(|b| b == name) {
            i
        } else {
            self.branches.push(name.to_string());
            self.branches.len() - 1
        }
    }

    fn parse_cond(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if !matches!(self.peek(), Some(Token::Question)) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_cond()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_cond()?;
        Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_cond()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) if name == "true" => Ok(Expr::Number(1.0)),
            Some(Token::Ident(name)) if name == "false" => Ok(Expr::Number(0.0)),
            Some(Token::Ident(name)) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    let idx = self.resolve_var(&name);
                    return Ok(Expr::Var(idx));
                }
                self.advance();
                let (func, arity) = Func::lookup(&name)
                    .ok_or_else(|| Error::Expression(format!("unknown function: '{name}'")))?;
                let mut args = vec![self.parse_cond()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    args.push(self.parse_cond()?);
                }
                self.expect(&Token::RParen)?;
                if args.len() != arity {
                    return Err(Error::Expression(format!(
                        "{name}() takes {arity} argument(s), got {}",
                        args.len()
                    )));
                }
                Ok(Expr::Call(func, args))
            }
            other => Err(Error::Expression(format!(
                "expected number, identifier, or '(', got {other:?}"
            ))),
        }
    }
}
