//! Safe arithmetic grammar over named input tokens. Implemented as a
//! hand-written recursive-descent parser producing a typed AST, evaluated
//! by a pure tree walker — never `eval`, never deferred to a host
//! expression engine.

use std::collections::HashSet;
use std::fmt;

pub const WHITELISTED_FUNCTIONS: &[&str] =
    &["abs", "sqrt", "exp", "log", "sin", "cos", "tan", "pow", "min", "max", "round", "floor", "ceil"];

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at position {})", self.message, self.position)
    }
}

impl std::error::Error for FormulaError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Free variables referenced anywhere in the tree, for the compiler to
    /// check against the sink port's actual connection names.
    pub fn free_vars(&self, out: &mut HashSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(inner) => inner.free_vars(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.free_vars(out);
                rhs.free_vars(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.free_vars(out);
                }
            }
        }
    }

    pub fn eval(&self, inputs: &std::collections::HashMap<String, f64>) -> Result<f64, FormulaError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Var(name) => inputs.get(name).copied().ok_or_else(|| FormulaError {
                message: format!("unknown identifier '{name}'"),
                position: 0,
            }),
            Expr::Neg(inner) => Ok(-inner.eval(inputs)?),
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(inputs)?;
                let r = rhs.eval(inputs)?;
                Ok(match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => l / r,
                })
            }
            Expr::Call(name, args) => {
                let vals: Result<Vec<f64>, FormulaError> =
                    args.iter().map(|a| a.eval(inputs)).collect();
                let vals = vals?;
                eval_call(name, &vals)
            }
        }
    }
}

fn eval_call(name: &str, args: &[f64]) -> Result<f64, FormulaError> {
    let unary = |f: fn(f64) -> f64| -> Result<f64, FormulaError> {
        args.first().copied().map(f).ok_or_else(|| FormulaError {
            message: format!("'{name}' expects 1 argument"),
            position: 0,
        })
    };
    match name {
        "abs" => unary(f64::abs),
        "sqrt" => unary(f64::sqrt),
        "exp" => unary(f64::exp),
        "log" => unary(f64::ln),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "round" => unary(f64::round),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "pow" => match args {
            [b, e] => Ok(b.powf(*e)),
            _ => Err(FormulaError { message: "'pow' expects 2 arguments".to_string(), position: 0 }),
        },
        "min" => match args {
            [a, b] => Ok(a.min(*b)),
            _ => Err(FormulaError { message: "'min' expects 2 arguments".to_string(), position: 0 }),
        },
        "max" => match args {
            [a, b] => Ok(a.max(*b)),
            _ => Err(FormulaError { message: "'max' expects 2 arguments".to_string(), position: 0 }),
        },
        other => Err(FormulaError {
            message: format!("'{other}' is not a whitelisted function"),
            position: 0,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0 }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, FormulaError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.pos >= self.bytes.len() {
                break;
            }
            let start = self.pos;
            let c = self.bytes[self.pos] as char;
            match c {
                '+' => {
                    tokens.push((Token::Plus, start));
                    self.pos += 1;
                }
                '-' => {
                    tokens.push((Token::Minus, start));
                    self.pos += 1;
                }
                '*' => {
                    tokens.push((Token::Star, start));
                    self.pos += 1;
                }
                '/' => {
                    tokens.push((Token::Slash, start));
                    self.pos += 1;
                }
                '(' => {
                    tokens.push((Token::LParen, start));
                    self.pos += 1;
                }
                ')' => {
                    tokens.push((Token::RParen, start));
                    self.pos += 1;
                }
                ',' => {
                    tokens.push((Token::Comma, start));
                    self.pos += 1;
                }
                c if c.is_ascii_digit() || c == '.' => {
                    tokens.push((self.lex_number()?, start));
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    tokens.push((self.lex_ident(), start));
                }
                other => {
                    return Err(FormulaError {
                        message: format!("unexpected character '{other}'"),
                        position: start,
                    });
                }
            }
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && (self.bytes[self.pos] as char).is_whitespace() {
            self.pos += 1;
        }
    }

    fn lex_number(&mut self) -> Result<Token, FormulaError> {
        let start = self.pos;
        let mut seen_dot = false;
        let mut seen_exp = false;
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos] as char;
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E') && !seen_exp {
                seen_exp = true;
                self.pos += 1;
                if self.pos < self.bytes.len()
                    && (self.bytes[self.pos] as char == '+' || self.bytes[self.pos] as char == '-')
                {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        let slice = &self.src[start..self.pos];
        slice.parse::<f64>().map(Token::Number).map_err(|_| FormulaError {
            message: format!("malformed number literal '{slice}'"),
            position: start,
        })
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos] as char;
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Token::Ident(self.src[start..self.pos].to_string())
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end_position: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, usize)>, end_position: usize) -> Self {
        Self { tokens, pos: 0, end_position }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position_of(&self, idx: usize) -> usize {
        self.tokens.get(idx).map(|(_, p)| *p).unwrap_or(self.end_position)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        item
    }

    fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Slash) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        let pos = self.position_of(self.pos);
        match self.advance() {
            Some((Token::Number(n), _)) => Ok(Expr::Number(n)),
            Some((Token::Ident(name), ident_pos)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), Some(Token::Comma)) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    match self.advance() {
                        Some((Token::RParen, _)) => {}
                        _ => {
                            return Err(FormulaError {
                                message: "unbalanced parentheses".to_string(),
                                position: self.position_of(self.pos.saturating_sub(1)),
                            })
                        }
                    }
                    if !WHITELISTED_FUNCTIONS.contains(&name.as_str()) {
                        return Err(FormulaError {
                            message: format!("'{name}' is not a whitelisted function"),
                            position: ident_pos,
                        });
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some((Token::LParen, _)) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some((Token::RParen, _)) => Ok(inner),
                    _ => Err(FormulaError {
                        message: "unbalanced parentheses".to_string(),
                        position: self.end_position,
                    }),
                }
            }
            Some((other, p)) => Err(FormulaError {
                message: format!("unexpected token {other:?}"),
                position: p,
            }),
            None => Err(FormulaError { message: "unexpected end of formula".to_string(), position: pos }),
        }
    }
}

/// Parses a formula string into a typed AST. Fails on empty expressions,
/// unknown identifiers (caught lazily during evaluation, not here — the set
/// of known identifiers depends on the sink port's connections), unbalanced
/// parentheses, or stray characters.
pub fn parse(src: &str) -> Result<Expr, FormulaError> {
    if src.trim().is_empty() {
        return Err(FormulaError { message: "empty formula".to_string(), position: 0 });
    }
    let end_position = src.len();
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens, end_position);
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        let pos = parser.position_of(parser.pos);
        return Err(FormulaError { message: "trailing characters after expression".to_string(), position: pos });
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn inputs(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn fan_in_formula_evaluates() {
        let expr = parse("in1 + in2 * 2").unwrap();
        let result = expr.eval(&inputs(&[("in1", 10.0), ("in2", 20.0)])).unwrap();
        assert_eq!(result, 50.0);
    }

    #[test]
    fn precedence_and_parens() {
        let expr = parse("(in1 + in2) * 2").unwrap();
        let result = expr.eval(&inputs(&[("in1", 10.0), ("in2", 20.0)])).unwrap();
        assert_eq!(result, 60.0);
    }

    #[test]
    fn whitelisted_function_call() {
        let expr = parse("sqrt(in1)").unwrap();
        assert_eq!(expr.eval(&inputs(&[("in1", 16.0)])).unwrap(), 4.0);
    }

    #[test]
    fn rejects_non_whitelisted_function() {
        let err = parse("eval(in1)").unwrap_err();
        assert!(err.message.contains("not a whitelisted function"));
    }

    #[test]
    fn rejects_empty_expression() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn rejects_unbalanced_parentheses() {
        assert!(parse("(in1 + in2").is_err());
        assert!(parse("in1 + in2)").is_err());
    }

    #[test]
    fn rejects_stray_characters() {
        assert!(parse("in1 $ in2").is_err());
    }

    #[test]
    fn free_vars_collects_all_identifiers() {
        let expr = parse("in1 + sqrt(in2) * in3").unwrap();
        let mut vars = std::collections::HashSet::new();
        expr.free_vars(&mut vars);
        assert_eq!(vars.len(), 3);
        assert!(vars.contains("in1"));
        assert!(vars.contains("in2"));
        assert!(vars.contains("in3"));
    }
}
