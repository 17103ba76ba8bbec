use std::cmp::Ordering;

use super::{BinaryOp, Expr, ExprError, ExprResult, Func, UnaryOp};
use crate::types::Value;

pub(super) fn evaluate<F>(expr: &Expr, lookup: &F) -> ExprResult<Value>
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => lookup(name).ok_or_else(|| ExprError::UnknownName(name.clone())),
        Expr::Unary { op, expr } => {
            let value = evaluate(expr, lookup)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Negate => negate(value),
            }
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = evaluate(left, lookup)?;
                if !l.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(evaluate(right, lookup)?.is_truthy()))
            }
            BinaryOp::Or => {
                let l = evaluate(left, lookup)?;
                if l.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(evaluate(right, lookup)?.is_truthy()))
            }
            _ => {
                let l = evaluate(left, lookup)?;
                let r = evaluate(right, lookup)?;
                binary(*op, l, r)
            }
        },
        Expr::Call { func, args } => {
            let values = args
                .iter()
                .map(|a| evaluate(a, lookup))
                .collect::<ExprResult<Vec<_>>>()?;
            call(*func, values)
        }
    }
}

fn type_error(op: &str, l: &Value, r: &Value) -> ExprError {
    ExprError::Eval(format!(
        "unsupported operand types for {op}: {} and {}",
        l.type_name(),
        r.type_name()
    ))
}

fn negate(value: Value) -> ExprResult<Value> {
    match value {
        Value::Int(i) => Ok(i
            .checked_neg()
            .map(Value::Int)
            .unwrap_or(Value::Float(-(i as f64)))),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(ExprError::Eval(format!(
            "bad operand type for unary -: {}",
            other.type_name()
        ))),
    }
}

/// Integer arithmetic stays integral until it overflows
fn int_or_float(checked: Option<i64>, fallback: f64) -> Value {
    checked.map(Value::Int).unwrap_or(Value::Float(fallback))
}

pub(crate) fn binary(op: BinaryOp, l: Value, r: Value) -> ExprResult<Value> {
    use BinaryOp::*;

    match op {
        Equals => return Ok(Value::Bool(l.structurally_eq(&r))),
        NotEquals => return Ok(Value::Bool(!l.structurally_eq(&r))),
        Less | LessEquals | Greater | GreaterEquals => {
            let ord = compare(&l, &r).ok_or_else(|| type_error("comparison", &l, &r))?;
            let result = match op {
                Less => ord == Ordering::Less,
                LessEquals => ord != Ordering::Greater,
                Greater => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        In => return membership(&l, &r).map(Value::Bool),
        _ => {}
    }

    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => Ok(int_or_float(a.checked_add(b), a as f64 + b as f64)),
                Subtract => Ok(int_or_float(a.checked_sub(b), a as f64 - b as f64)),
                Multiply => Ok(int_or_float(a.checked_mul(b), a as f64 * b as f64)),
                Divide => divide(a as f64, b as f64),
                FloorDivide => {
                    if b == 0 {
                        return Err(ExprError::Eval("integer division by zero".into()));
                    }
                    // i64::MIN // -1 leaves the integer range
                    let floored = a.checked_div(b).map(|q| {
                        let r = a.wrapping_rem(b);
                        if r != 0 && ((r < 0) != (b < 0)) {
                            q - 1
                        } else {
                            q
                        }
                    });
                    Ok(int_or_float(floored, (a as f64 / b as f64).floor()))
                }
                Modulo => {
                    if b == 0 {
                        return Err(ExprError::Eval("integer modulo by zero".into()));
                    }
                    let r = a.wrapping_rem(b);
                    let floored = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
                    Ok(Value::Int(floored))
                }
                Power => {
                    if b >= 0 {
                        let exact = u32::try_from(b).ok().and_then(|e| a.checked_pow(e));
                        Ok(int_or_float(exact, (a as f64).powf(b as f64)))
                    } else {
                        Ok(Value::Float((a as f64).powf(b as f64)))
                    }
                }
                _ => Err(type_error("operator", &l, &r)),
            }
        }
        (a, b) if a.is_number() && b.is_number() => {
            let (x, y) = (a.as_number().unwrap_or(0.0), b.as_number().unwrap_or(0.0));
            match op {
                Add => Ok(Value::Float(x + y)),
                Subtract => Ok(Value::Float(x - y)),
                Multiply => Ok(Value::Float(x * y)),
                Divide => divide(x, y),
                FloorDivide => {
                    if y == 0.0 {
                        return Err(ExprError::Eval("float floor division by zero".into()));
                    }
                    Ok(Value::Float((x / y).floor()))
                }
                Modulo => {
                    if y == 0.0 {
                        return Err(ExprError::Eval("float modulo".into()));
                    }
                    Ok(Value::Float(x - y * (x / y).floor()))
                }
                Power => Ok(Value::Float(x.powf(y))),
                _ => Err(type_error("operator", &l, &r)),
            }
        }
        (Value::Str(a), Value::Str(b)) if op == Add => Ok(Value::Str(format!("{a}{b}"))),
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == Multiply => {
            Ok(Value::Str(s.repeat(usize::try_from(*n).unwrap_or(0))))
        }
        (Value::List(a), Value::List(b)) if op == Add => {
            Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => Err(type_error(op_symbol(op), &l, &r)),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::FloorDivide => "//",
        BinaryOp::Modulo => "%",
        BinaryOp::Power => "**",
        _ => "operator",
    }
}

fn divide(x: f64, y: f64) -> ExprResult<Value> {
    if y == 0.0 {
        Err(ExprError::Eval("division by zero".into()))
    } else {
        Ok(Value::Float(x / y))
    }
}

/// Ordering for `<`-style comparisons; `None` when the operands are not comparable
fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (a, b) if a.is_number() && b.is_number() => {
            a.as_number()?.partial_cmp(&b.as_number()?)
        }
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::List(_), Value::List(_)) => Some(l.sort_cmp(r)),
        _ => None,
    }
}

fn membership(needle: &Value, haystack: &Value) -> ExprResult<bool> {
    match haystack {
        Value::List(items) => Ok(items.iter().any(|v| v.structurally_eq(needle))),
        Value::Map(map) => Ok(map.contains_key(&needle.to_key_string())),
        Value::Str(s) => match needle {
            Value::Str(n) => Ok(s.contains(n.as_str())),
            other => Err(ExprError::Eval(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        other => Err(ExprError::Eval(format!(
            "argument of type {} is not iterable",
            other.type_name()
        ))),
    }
}

fn number_arg(func: &str, value: &Value) -> ExprResult<f64> {
    value.as_number().ok_or_else(|| {
        ExprError::Eval(format!(
            "{func}() expects a number, got {}",
            value.type_name()
        ))
    })
}

fn str_arg<'a>(func: &str, value: &'a Value) -> ExprResult<&'a str> {
    value.as_str().ok_or_else(|| {
        ExprError::Eval(format!(
            "{func}() expects a string, got {}",
            value.type_name()
        ))
    })
}

/// Round half to even, at `digits` decimal places
pub(crate) fn round_to(x: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (x * factor).round_ties_even() / factor
}

/// Round an integer to `digits` decimal places, halves to even.
///
/// Non-negative `digits` leave it unchanged; `None` when the result
/// overflows.
pub(crate) fn round_int(i: i64, digits: i32) -> Option<i64> {
    if digits >= 0 {
        return Some(i);
    }
    let Some(step) = 10i64.checked_pow(digits.unsigned_abs()) else {
        return Some(0);
    };
    let (q, r) = (i.div_euclid(step), i.rem_euclid(step));
    let q = match r.cmp(&(step - r)) {
        Ordering::Less => q,
        Ordering::Greater => q + 1,
        Ordering::Equal if q % 2 == 0 => q,
        Ordering::Equal => q + 1,
    };
    q.checked_mul(step)
}

/// Integral float as `Int` when it fits, otherwise left as `Float`
pub(crate) fn float_to_int(f: f64) -> Value {
    if f.is_finite() && f.abs() < 9.2e18 {
        Value::Int(f as i64)
    } else {
        Value::Float(f)
    }
}

fn call(func: Func, mut args: Vec<Value>) -> ExprResult<Value> {
    match func {
        Func::Abs => match &args[0] {
            Value::Int(i) => Ok(int_or_float(i.checked_abs(), (*i as f64).abs())),
            v => Ok(Value::Float(number_arg("abs", v)?.abs())),
        },
        Func::Round => {
            let x = number_arg("round", &args[0])?;
            match args.get(1) {
                None => Ok(float_to_int(x.round_ties_even())),
                Some(d) => {
                    let digits = d
                        .coerce_int()
                        .ok_or_else(|| ExprError::Eval("round() digits must be an integer".into()))?;
                    let digits = digits.clamp(-300, 300) as i32;
                    if let Value::Int(i) = &args[0] {
                        if let Some(rounded) = round_int(*i, digits) {
                            return Ok(Value::Int(rounded));
                        }
                    }
                    Ok(Value::Float(round_to(x, digits)))
                }
            }
        }
        Func::Min | Func::Max => {
            let candidates = if args.len() == 1 {
                match args.pop() {
                    Some(Value::List(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                }
            } else {
                args
            };
            let want = if func == Func::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<Value> = None;
            for v in candidates {
                best = match best {
                    None => Some(v),
                    Some(b) => {
                        let ord = compare(&v, &b)
                            .ok_or_else(|| type_error("comparison", &v, &b))?;
                        Some(if ord == want { v } else { b })
                    }
                };
            }
            best.ok_or_else(|| ExprError::Eval("min()/max() of an empty sequence".into()))
        }
        Func::Len => match &args[0] {
            Value::Str(s) => Ok(Value::from(s.chars().count())),
            Value::List(items) => Ok(Value::from(items.len())),
            Value::Map(map) => Ok(Value::from(map.len())),
            other => Err(ExprError::Eval(format!(
                "object of type {} has no len()",
                other.type_name()
            ))),
        },
        Func::Str => Ok(Value::Str(args[0].to_key_string())),
        Func::Int => args[0]
            .coerce_int()
            .map(Value::Int)
            .ok_or_else(|| ExprError::Eval(format!("cannot convert {} to int", args[0]))),
        Func::Float => args[0]
            .coerce_float()
            .map(Value::Float)
            .ok_or_else(|| ExprError::Eval(format!("cannot convert {} to float", args[0]))),
        Func::Lower => Ok(Value::Str(str_arg("lower", &args[0])?.to_lowercase())),
        Func::Upper => Ok(Value::Str(str_arg("upper", &args[0])?.to_uppercase())),
        Func::Strip => Ok(Value::Str(str_arg("strip", &args[0])?.trim().to_string())),
        Func::Sqrt => {
            let x = number_arg("sqrt", &args[0])?;
            if x < 0.0 {
                return Err(ExprError::Eval("math domain error".into()));
            }
            Ok(Value::Float(x.sqrt()))
        }
        Func::Log => {
            let x = number_arg("log", &args[0])?;
            if x <= 0.0 {
                return Err(ExprError::Eval("math domain error".into()));
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = number_arg("log", base)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(ExprError::Eval("math domain error".into()));
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        Func::Exp => Ok(Value::Float(number_arg("exp", &args[0])?.exp())),
        Func::Floor => match &args[0] {
            Value::Int(i) => Ok(Value::Int(*i)),
            v => Ok(float_to_int(number_arg("floor", v)?.floor())),
        },
        Func::Ceil => match &args[0] {
            Value::Int(i) => Ok(Value::Int(*i)),
            v => Ok(float_to_int(number_arg("ceil", v)?.ceil())),
        },
        Func::IsNull => Ok(Value::Bool(args[0].is_missing())),
        Func::Contains => membership(&args[1], &args[0]).map(Value::Bool),
        Func::StartsWith => {
            let s = str_arg("startswith", &args[0])?;
            let p = str_arg("startswith", &args[1])?;
            Ok(Value::Bool(s.starts_with(p)))
        }
        Func::EndsWith => {
            let s = str_arg("endswith", &args[0])?;
            let p = str_arg("endswith", &args[1])?;
            Ok(Value::Bool(s.ends_with(p)))
        }
    }
}
