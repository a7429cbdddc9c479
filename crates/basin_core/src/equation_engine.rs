use crate::traits::{DynamicalSystem, Scalar};
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquationError {
    #[error("Unexpected token at position {0}")]
    UnexpectedToken(usize),
    #[error("Expected ')' at position {0}")]
    UnclosedParen(usize),
    #[error("Trailing input at position {0}")]
    TrailingInput(usize),
    #[error("Invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("Unknown variable or parameter: {0}")]
    UnknownName(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
}

/// Stack machine instructions. Binary ops pop `b` then `a` and push `a op b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    /// State variable by declaration index.
    LoadVar(usize),
    /// Parameter by declaration index.
    LoadParam(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Sin,
    Cos,
    Exp,
    Tanh,
    Ln,
    Abs,
}

impl OpCode {
    fn function(name: &str) -> Option<OpCode> {
        match name {
            "sin" => Some(OpCode::Sin),
            "cos" => Some(OpCode::Cos),
            "exp" => Some(OpCode::Exp),
            "tanh" => Some(OpCode::Tanh),
            "ln" => Some(OpCode::Ln),
            "abs" => Some(OpCode::Abs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Evaluates bytecode against a state and parameter vector.
pub struct VM;

impl VM {
    /// Compiled bytecode always leaves exactly one value on the stack; an empty
    /// program evaluates to zero.
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], params: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(val).unwrap_or_else(T::nan)),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    let b = stack.pop().unwrap_or_else(T::nan);
                    let a = stack.pop().unwrap_or_else(T::nan);
                    stack.push(match *op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    });
                }
                unary => {
                    let a = stack.pop().unwrap_or_else(T::nan);
                    stack.push(match unary {
                        OpCode::Neg => -a,
                        OpCode::Sin => a.sin(),
                        OpCode::Cos => a.cos(),
                        OpCode::Exp => a.exp(),
                        OpCode::Tanh => a.tanh(),
                        OpCode::Ln => a.ln(),
                        _ => a.abs(),
                    });
                }
            }
        }

        stack.pop().unwrap_or_else(T::zero)
    }
}

// --- AST & compiler ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    /// Operator is one of `+ - * / ^`.
    Binary(Box<Expr>, char, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Resolves names to variable/parameter slots and lowers an `Expr` to `Bytecode`.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let index = |names: &[String]| {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>()
        };
        Self {
            var_map: index(var_names),
            param_map: index(param_names),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EquationError> {
        let mut ops = Vec::new();
        self.lower(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn lower(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EquationError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                // State variables shadow parameters of the same name.
                let op = if let Some(&idx) = self.var_map.get(name) {
                    OpCode::LoadVar(idx)
                } else if let Some(&idx) = self.param_map.get(name) {
                    OpCode::LoadParam(idx)
                } else {
                    return Err(EquationError::UnknownName(name.clone()));
                };
                ops.push(op);
            }
            Expr::Binary(left, op, right) => {
                self.lower(left, ops)?;
                self.lower(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    _ => OpCode::Pow,
                });
            }
            Expr::Neg(operand) => {
                self.lower(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                let op = OpCode::function(func)
                    .ok_or_else(|| EquationError::UnknownFunction(func.clone()))?;
                self.lower(arg, ops)?;
                ops.push(op);
            }
        }
        Ok(())
    }
}

// --- Parser ---

pub fn parse(input: &str) -> Result<Expr, EquationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_sum()?;
    if parser.pos < parser.tokens.len() {
        return Err(EquationError::TrailingInput(parser.pos));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EquationError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign = (d == '-' || d == '+') && literal.ends_with(['e', 'E']);
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .map_err(|_| EquationError::InvalidNumber(literal.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' | '-' | '*' | '/' | '^' => Token::Op(c),
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => return Err(EquationError::UnexpectedToken(tokens.len())),
            });
            chars.next();
        }
    }
    Ok(tokens)
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(c)) if ops.contains(c) => {
                let c = *c;
                self.pos += 1;
                Some(c)
            }
            _ => None,
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_product()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_power()?;
        while let Some(op) = self.eat_op(&['*', '/']) {
            let right = self.parse_power()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Left-associative; a leading minus is folded into the base, so -2^2 == 4.
    fn parse_power(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_unary()?;
        while self.eat_op(&['^']).is_some() {
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), '^', Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EquationError> {
        if self.eat_op(&['-']).is_some() {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EquationError> {
        let at = self.pos;
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let arg = self.parse_sum()?;
                    self.expect_close()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                self.expect_close()?;
                Ok(expr)
            }
            _ => Err(EquationError::UnexpectedToken(at)),
        }
    }

    fn expect_close(&mut self) -> Result<(), EquationError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err(EquationError::UnclosedParen(self.pos)),
        }
    }
}

// --- EquationSystem ---

/// `DynamicalSystem` backed by one compiled expression per state variable.
pub struct EquationSystem<T: Scalar> {
    pub equations: Vec<Bytecode>,
    pub params: Vec<T>,
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
    // Scratch stack reused across evaluations; makes the system !Sync.
    stack: RefCell<Vec<T>>,
}

impl<T: Scalar> EquationSystem<T> {
    pub fn new(equations: Vec<Bytecode>, params: Vec<T>) -> Self {
        Self {
            equations,
            params,
            var_map: HashMap::new(),
            param_map: HashMap::new(),
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }

    pub fn set_maps(&mut self, param_map: HashMap<String, usize>, var_map: HashMap<String, usize>) {
        self.param_map = param_map;
        self.var_map = var_map;
    }
}

impl EquationSystem<f64> {
    /// Parses `equations` (one per entry of `var_names`) and binds parameter values.
    pub fn from_sources(
        equations: &[String],
        var_names: &[String],
        param_names: &[String],
        params: Vec<f64>,
    ) -> anyhow::Result<Self> {
        if equations.len() != var_names.len() {
            anyhow::bail!(
                "Expected one equation per variable ({} variables, {} equations).",
                var_names.len(),
                equations.len()
            );
        }
        if params.len() != param_names.len() {
            anyhow::bail!(
                "Parameter value count mismatch. Expected {}, got {}.",
                param_names.len(),
                params.len()
            );
        }
        let compiler = Compiler::new(var_names, param_names);
        let bytecodes = equations
            .iter()
            .map(|source| compiler.compile(&parse(source)?))
            .collect::<Result<Vec<_>, EquationError>>()?;
        let mut system = Self::new(bytecodes, params);
        system.set_maps(compiler.param_map, compiler.var_map);
        Ok(system)
    }
}

impl<T: Scalar> DynamicalSystem<T> for EquationSystem<T> {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let mut stack = self.stack.borrow_mut();
        for (slot, eq) in out.iter_mut().zip(&self.equations) {
            *slot = VM::execute(eq, x, &self.params, &mut stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(source: &str, vars: &[f64], params: &[f64]) -> f64 {
        let compiler = Compiler::new(&names(&["x", "y"]), &names(&["r"]));
        let code = compiler.compile(&parse(source).expect("parse")).expect("compile");
        VM::execute(&code, vars, params, &mut Vec::new())
    }

    #[test]
    fn respects_operator_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[0.0, 0.0], &[0.0]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[0.0, 0.0], &[0.0]), 9.0);
        assert_eq!(eval("-2 ^ 2", &[0.0, 0.0], &[0.0]), 4.0);
        assert_eq!(eval("2 * 3 ^ 2", &[0.0, 0.0], &[0.0]), 18.0);
    }

    #[test]
    fn evaluates_logistic_map_step() {
        let value = eval("r * x * (1 - x)", &[0.5, 0.0], &[3.0]);
        assert!((value - 0.75).abs() < 1e-15);
    }

    #[test]
    fn supports_network_style_functions() {
        let value = eval("tanh(y) + abs(-x) + ln(exp(1))", &[2.0, 0.5], &[0.0]);
        assert!((value - (0.5f64.tanh() + 3.0)).abs() < 1e-12);
    }

    #[test]
    fn parses_scientific_literals() {
        assert_eq!(eval("1e-3 * 2", &[0.0, 0.0], &[0.0]), 0.002);
    }

    #[test]
    fn rejects_unknown_names_and_functions() {
        let compiler = Compiler::new(&names(&["x"]), &names(&["r"]));
        let err = compiler.compile(&parse("q + 1").unwrap()).unwrap_err();
        assert_eq!(err, EquationError::UnknownName("q".into()));
        let err = compiler.compile(&parse("sinh(x)").unwrap()).unwrap_err();
        assert_eq!(err, EquationError::UnknownFunction("sinh".into()));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(parse("1 +"), Err(EquationError::UnexpectedToken(_))));
        assert!(matches!(parse("(x"), Err(EquationError::UnclosedParen(_))));
        assert!(matches!(parse("x x"), Err(EquationError::TrailingInput(1))));
        assert!(matches!(parse("x # 1"), Err(EquationError::UnexpectedToken(_))));
    }

    #[test]
    fn from_sources_checks_counts() {
        let err = EquationSystem::from_sources(&names(&["x"]), &names(&["x", "y"]), &[], vec![])
            .err()
            .expect("should fail");
        assert!(format!("{err}").contains("one equation per variable"));

        let system = EquationSystem::from_sources(
            &names(&["r * x"]),
            &names(&["x"]),
            &names(&["r"]),
            vec![2.0],
        )
        .expect("system");
        let mut out = [0.0];
        system.apply(0.0, &[1.5], &mut out);
        assert_eq!(out[0], 3.0);
        assert_eq!(system.param_map.get("r"), Some(&0));
        assert_eq!(system.var_map.get("x"), Some(&0));
    }
}
