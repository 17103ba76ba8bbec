//! Restricted expression language for `FilterRows`, `DeriveColumn` and the
//! `expr` operation of `TransformColumn`.
//!
//! Expressions are parsed once into a small AST and evaluated per row. The
//! grammar only admits literals, names, arithmetic, comparisons, boolean
//! connectives and calls to a fixed allow-list of functions. Anything else
//! is rejected at parse time.
//!
//! ```
//! use colstore::expr::Expr;
//! use colstore::Value;
//!
//! let expr = Expr::parse("x * 2 + 1 > 6").unwrap();
//! let result = expr.evaluate(&|name: &str| (name == "x").then(|| Value::Int(3))).unwrap();
//! assert_eq!(result, Value::Bool(true));
//! ```

mod eval;
mod parser;

use thiserror::Error;

use crate::types::Value;

pub(crate) use eval::{binary, float_to_int, round_int, round_to};
pub use parser::parse;

/// Result type for expression parsing and evaluation
pub type ExprResult<T> = Result<T, ExprError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("function '{0}' is not allowed")]
    DisallowedFunction(String),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("evaluation error: {0}")]
    Eval(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    In,
    And,
    Or,
}

/// The complete set of callable functions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Abs,
    Round,
    Min,
    Max,
    Len,
    Str,
    Int,
    Float,
    Lower,
    Upper,
    Strip,
    Sqrt,
    Log,
    Exp,
    Floor,
    Ceil,
    IsNull,
    Contains,
    StartsWith,
    EndsWith,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        let func = match name {
            "abs" => Func::Abs,
            "round" => Func::Round,
            "min" => Func::Min,
            "max" => Func::Max,
            "len" => Func::Len,
            "str" => Func::Str,
            "int" => Func::Int,
            "float" => Func::Float,
            "lower" => Func::Lower,
            "upper" => Func::Upper,
            "strip" => Func::Strip,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "exp" => Func::Exp,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "is_null" => Func::IsNull,
            "contains" => Func::Contains,
            "startswith" => Func::StartsWith,
            "endswith" => Func::EndsWith,
            _ => return None,
        };
        Some(func)
    }

    /// Accepted argument counts as `(min, max)`; `None` means unbounded
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Func::Round | Func::Log => (1, Some(2)),
            Func::Min | Func::Max => (1, None),
            Func::Contains | Func::StartsWith | Func::EndsWith => (2, Some(2)),
            _ => (1, Some(1)),
        }
    }
}

impl Expr {
    /// Parse an expression, rejecting anything outside the grammar
    pub fn parse(input: &str) -> ExprResult<Expr> {
        parse(input)
    }

    /// Evaluate with `lookup` resolving names to values
    pub fn evaluate<F>(&self, lookup: &F) -> ExprResult<Value>
    where
        F: Fn(&str) -> Option<Value>,
    {
        eval::evaluate(self, lookup)
    }

    /// Names referenced anywhere in the expression, in first-use order
    pub fn names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Name(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Unary { expr, .. } => expr.collect_names(out),
            Expr::Binary { left, right, .. } => {
                left.collect_names(out);
                right.collect_names(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_names(out)),
        }
    }
}
