//! Built-in job functions.
//!
//! Integer arguments stay integers (`add(2, 3)` yields `5`, not `5.0`);
//! any float argument switches the computation to `f64`.

use serde_json::{json, Number, Value};
use vcloud_core::DispatchError;

use crate::registry::JobFunction;

pub const BUILTIN_FUNCTIONS: &[(&str, JobFunction)] = &[
    ("add", add),
    ("subtract", subtract),
    ("multiply", multiply),
    ("divide", divide),
    ("sum", sum),
    ("max", max),
    ("fibonacci", fibonacci),
    ("is_prime", is_prime),
    ("echo", echo),
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::from(i),
            Num::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        }
    }
}

fn number(function: &str, value: &Value) -> Result<Num, DispatchError> {
    if let Some(i) = value.as_i64() {
        return Ok(Num::Int(i));
    }
    value
        .as_f64()
        .map(Num::Float)
        .ok_or_else(|| {
            DispatchError::invalid_arguments(function, format!("{value} is not a number"))
        })
}

fn exactly<'a>(function: &str, args: &'a [Value], n: usize) -> Result<&'a [Value], DispatchError> {
    if args.len() == n {
        Ok(args)
    } else {
        Err(DispatchError::invalid_arguments(
            function,
            format!("expected {n} arguments, got {}", args.len()),
        ))
    }
}

/// Either variadic numbers or a single array of numbers.
fn numbers(function: &str, args: &[Value]) -> Result<Vec<Num>, DispatchError> {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    items.iter().map(|v| number(function, v)).collect()
}

fn binary(
    function: &str,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, DispatchError> {
    let args = exactly(function, args, 2)?;
    let (a, b) = (number(function, &args[0])?, number(function, &args[1])?);
    let result = match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_op(a, b)
            .map(Num::Int)
            .ok_or_else(|| DispatchError::Failed(format!("{function} overflowed")))?,
        _ => Num::Float(float_op(a.as_f64(), b.as_f64())),
    };
    Ok(result.into_value())
}

fn add(args: &[Value]) -> Result<Value, DispatchError> {
    binary("add", args, i64::checked_add, |a, b| a + b)
}

fn subtract(args: &[Value]) -> Result<Value, DispatchError> {
    binary("subtract", args, i64::checked_sub, |a, b| a - b)
}

fn multiply(args: &[Value]) -> Result<Value, DispatchError> {
    binary("multiply", args, i64::checked_mul, |a, b| a * b)
}

fn divide(args: &[Value]) -> Result<Value, DispatchError> {
    let args = exactly("divide", args, 2)?;
    let a = number("divide", &args[0])?.as_f64();
    let b = number("divide", &args[1])?.as_f64();
    if b == 0.0 {
        return Err(DispatchError::Failed("division by zero".to_string()));
    }
    Ok(Num::Float(a / b).into_value())
}

fn sum(args: &[Value]) -> Result<Value, DispatchError> {
    let values = numbers("sum", args)?;
    let mut total = Num::Int(0);
    for value in values {
        total = match (total, value) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .ok_or_else(|| DispatchError::Failed("sum overflowed".to_string()))?,
            (a, b) => Num::Float(a.as_f64() + b.as_f64()),
        };
    }
    Ok(total.into_value())
}

fn max(args: &[Value]) -> Result<Value, DispatchError> {
    let values = numbers("max", args)?;
    let mut best: Option<Num> = None;
    for value in values {
        best = match best {
            Some(current) if current.as_f64() >= value.as_f64() => Some(current),
            _ => Some(value),
        };
    }
    best.map(Num::into_value)
        .ok_or_else(|| DispatchError::invalid_arguments("max", "no values given"))
}

fn fibonacci(args: &[Value]) -> Result<Value, DispatchError> {
    let args = exactly("fibonacci", args, 1)?;
    let n = args[0].as_u64().ok_or_else(|| {
        DispatchError::invalid_arguments("fibonacci", "n must be a non-negative integer")
    })?;
    // fib(93) is the last one that fits in u64
    if n > 93 {
        return Err(DispatchError::invalid_arguments("fibonacci", "n must be at most 93"));
    }
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a.saturating_add(b));
    }
    Ok(json!(a))
}

fn is_prime(args: &[Value]) -> Result<Value, DispatchError> {
    let args = exactly("is_prime", args, 1)?;
    let n = args[0]
        .as_i64()
        .ok_or_else(|| DispatchError::invalid_arguments("is_prime", "n must be an integer"))?;
    if n < 2 {
        return Ok(json!(false));
    }
    let mut d = 2i64;
    while d <= n / d {
        if n % d == 0 {
            return Ok(json!(false));
        }
        d += 1;
    }
    Ok(json!(true))
}

fn echo(args: &[Value]) -> Result<Value, DispatchError> {
    match args {
        [single] => Ok(single.clone()),
        _ => Ok(Value::Array(args.to_vec())),
    }
}
