//! Tree-walking evaluation against a JSON context.

use serde_json::Value;
use std::cmp::Ordering;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::parser::number;
use super::{is_empty, EvalError};

/// Names of the built-in functions. Never reported as dependencies.
pub const BUILTINS: &[&str] = &["is_empty", "min", "max", "abs", "floor", "ceil", "round"];

/// Evaluate `expr` against `context`.
pub fn evaluate(expr: &Expr, context: &Value) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Variable(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Expr::Member(base, name) => {
            let target = evaluate(base, context)?;
            match target.get(name) {
                Some(value) if target.is_object() => Ok(value.clone()),
                _ => Err(EvalError::UndefinedMember(member_path(base, name))),
            }
        }
        Expr::Index(base, index) => {
            let target = evaluate(base, context)?;
            let index = evaluate(index, context)?;
            let found = match (&target, &index) {
                (Value::Array(items), Value::Number(n)) => {
                    n.as_u64().and_then(|i| items.get(i as usize))
                }
                (Value::Object(map), Value::String(key)) => map.get(key),
                _ => None,
            };
            found
                .cloned()
                .ok_or_else(|| EvalError::UndefinedMember(format!("{}[{index}]", describe(base))))
        }
        Expr::Call(name, args) => call(name, args, context),
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, context)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Negate => Ok(number(-as_number(&value, "-")?)),
                UnaryOp::Plus => Ok(number(as_number(&value, "+")?)),
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !truthy(&evaluate(lhs, context)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&evaluate(rhs, context)?)))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if truthy(&evaluate(lhs, context)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&evaluate(rhs, context)?)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, context)?;
            let rhs = evaluate(rhs, context)?;
            binary(*op, &lhs, &rhs)
        }
        Expr::Conditional(cond, then, otherwise) => {
            if truthy(&evaluate(cond, context)?) {
                evaluate(then, context)
            } else {
                evaluate(otherwise, context)
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(lhs, rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => match rhs {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| values_equal(lhs, i)))),
            other => Err(EvalError::Type(format!(
                "right side of 'in' must be an array, got {}",
                type_name(other)
            ))),
        },
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(as_number(lhs, "+")? + as_number(rhs, "+")?),
        },
        BinaryOp::Sub => arithmetic(as_number(lhs, "-")? - as_number(rhs, "-")?),
        BinaryOp::Mul => arithmetic(as_number(lhs, "*")? * as_number(rhs, "*")?),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = as_number(rhs, "/")?;
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let dividend = as_number(lhs, "/")?;
            arithmetic(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            })
        }
        BinaryOp::Pow => arithmetic(as_number(lhs, "^")?.powf(as_number(rhs, "^")?)),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators handled by evaluate"),
    }
}

fn call(name: &str, args: &[Expr], context: &Value) -> Result<Value, EvalError> {
    if name == "is_empty" {
        let [arg] = args else {
            return Err(EvalError::Arity {
                function: name.to_string(),
                expected: 1,
                found: args.len(),
            });
        };
        // An absent path is the most common empty value there is.
        return match evaluate(arg, context) {
            Ok(value) => Ok(Value::Bool(is_empty(&value))),
            Err(e) if e.is_undefined_reference() && arg.static_path().is_some() => {
                Ok(Value::Bool(true))
            }
            Err(e) => Err(e),
        };
    }

    let values = args
        .iter()
        .map(|arg| evaluate(arg, context))
        .collect::<Result<Vec<_>, _>>()?;

    match name {
        "min" | "max" => {
            let numbers = match values.as_slice() {
                [Value::Array(items)] => Some(items.clone()),
                _ => None,
            }
            .unwrap_or(values);
            let mut numbers = numbers
                .iter()
                .map(|v| as_number(v, name))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter();
            let first = numbers.next().ok_or_else(|| EvalError::Arity {
                function: name.to_string(),
                expected: 1,
                found: 0,
            })?;
            let result = numbers.fold(first, |acc, n| {
                if name == "min" {
                    acc.min(n)
                } else {
                    acc.max(n)
                }
            });
            arithmetic(result)
        }
        "abs" | "floor" | "ceil" | "round" => {
            let [value] = values.as_slice() else {
                return Err(EvalError::Arity {
                    function: name.to_string(),
                    expected: 1,
                    found: values.len(),
                });
            };
            let n = as_number(value, name)?;
            arithmetic(match name {
                "abs" => n.abs(),
                "floor" => n.floor(),
                "ceil" => n.ceil(),
                _ => n.round(),
            })
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

/// Truthiness: `null`, `false`, `0` and `""` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Equality where numbers compare by value, so `1 == 1.0`.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => {
            let a = as_number(lhs, "comparison")?;
            let b = as_number(rhs, "comparison")?;
            a.partial_cmp(&b)
                .ok_or_else(|| EvalError::Type("cannot order NaN".to_string()))
        }
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EvalError::Type(format!("'{op}' operand out of range"))),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(EvalError::Type(format!(
            "'{op}' expects a number, got {}",
            type_name(other)
        ))),
    }
}

fn arithmetic(n: f64) -> Result<Value, EvalError> {
    if n.is_finite() {
        Ok(number(n))
    } else {
        Err(EvalError::Type(format!("non-finite result {n}")))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn member_path(base: &Expr, name: &str) -> String {
    format!("{}.{name}", describe(base))
}

fn describe(expr: &Expr) -> String {
    expr.static_path().unwrap_or_else(|| "<expression>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;
    use serde_json::json;

    fn eval(source: &str, context: &Value) -> Result<Value, EvalError> {
        evaluate(&parse(source).unwrap(), context)
    }

    #[test]
    fn test_member_comparison() {
        let ctx = json!({"configs": {"USART1": {"mode": "sync"}}});
        assert_eq!(eval("configs.USART1.mode == 'sync'", &ctx).unwrap(), json!(true));
        assert_eq!(eval("configs.USART1.mode != 'sync'", &ctx).unwrap(), json!(false));
    }

    #[test]
    fn test_undefined_reads_are_classified() {
        let ctx = json!({"configs": {"USART1": {}}});
        let err = eval("configs.USART1.mode == 'sync'", &ctx).unwrap_err();
        assert!(err.is_undefined_reference());
        let err = eval("missing > 1", &ctx).unwrap_err();
        assert_eq!(err, EvalError::UndefinedVariable("missing".into()));
        let err = eval("configs.SPI1.mode", &ctx).unwrap_err();
        assert_eq!(err, EvalError::UndefinedMember("configs.SPI1".into()));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let ctx = json!({"x": 1.0});
        assert_eq!(eval("x == 1", &ctx).unwrap(), json!(true));
        assert_eq!(eval("x + 1", &ctx).unwrap(), json!(2));
        assert_eq!(eval("7 / 2", &ctx).unwrap(), json!(3.5));
    }

    #[test]
    fn test_short_circuit_skips_undefined_side() {
        let ctx = json!({"x": 7});
        assert_eq!(eval("x > 5 or nothing.here", &ctx).unwrap(), json!(true));
        assert_eq!(eval("x < 5 and nothing.here", &ctx).unwrap(), json!(false));
        assert!(eval("x < 5 or nothing.here", &ctx).is_err());
    }

    #[test]
    fn test_is_empty_builtin() {
        let ctx = json!({"a": "", "b": [], "c": {}, "d": null, "e": 0, "f": {"g": 1}});
        for name in ["a", "b", "c", "d"] {
            assert_eq!(eval(&format!("is_empty({name})"), &ctx).unwrap(), json!(true));
        }
        assert_eq!(eval("is_empty(e)", &ctx).unwrap(), json!(false));
        assert_eq!(eval("is_empty(f)", &ctx).unwrap(), json!(false));
        // Absent paths count as empty.
        assert_eq!(eval("is_empty(f.missing)", &ctx).unwrap(), json!(true));
        assert_eq!(eval("is_empty(nope.deeper)", &ctx).unwrap(), json!(true));
    }

    #[test]
    fn test_numeric_builtins() {
        let ctx = json!({"clk": 72000000});
        assert_eq!(eval("max(1, clk / 1000000, 3)", &ctx).unwrap(), json!(72));
        assert_eq!(eval("min([4, 2, 9])", &ctx).unwrap(), json!(2));
        assert_eq!(eval("floor(7 / 2) + ceil(0.2) + abs(-1)", &ctx).unwrap(), json!(5));
        assert_eq!(eval("round(2.5)", &ctx).unwrap(), json!(3));
    }

    #[test]
    fn test_in_and_ternary() {
        let ctx = json!({"mode": "spi", "list": ["spi", "i2c"]});
        assert_eq!(eval("mode in ['uart', 'spi']", &ctx).unwrap(), json!(true));
        assert_eq!(eval("mode in list ? 10 : 20", &ctx).unwrap(), json!(10));
        assert_eq!(eval("list[1]", &ctx).unwrap(), json!("i2c"));
    }

    #[test]
    fn test_type_errors() {
        let ctx = json!({"s": "text", "n": 2});
        assert!(matches!(eval("s * n", &ctx), Err(EvalError::Type(_))));
        assert_eq!(eval("n / 0", &ctx), Err(EvalError::DivisionByZero));
        assert!(matches!(eval("nope(1)", &ctx), Err(EvalError::UnknownFunction(_))));
        assert!(matches!(eval("abs(1, 2)", &ctx), Err(EvalError::Arity { .. })));
    }
}
