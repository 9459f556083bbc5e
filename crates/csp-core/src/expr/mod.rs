//! Condition expression evaluator.
//!
//! IP definitions gate parameters, bounds and variants with small string
//! expressions such as `configs.${IP_INSTANCE}.mode == 'sync'`. This module
//! parses them once (cached per exact string), evaluates them against the
//! project document, and statically extracts the paths they read.
//!
//! # Failure policy
//!
//! [`Evaluator::evaluate`] never fails. Reading an absent path yields the
//! caller's fallback silently, since that is the normal state while a
//! dependency is still unset. Every other failure is logged and also yields
//! the fallback.

pub mod ast;
pub mod eval;
pub mod parser;
pub mod tokenizer;

use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use thiserror::Error;
use tracing::{error, trace};

pub use ast::Expr;
pub use eval::{truthy, values_equal, BUILTINS};
pub use parser::number;

/// Syntax error with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at offset {position}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Runtime evaluation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("undefined member: {0}")]
    UndefinedMember(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function}() expects {expected} argument(s), found {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("division by zero")]
    DivisionByZero,
}

impl EvalError {
    /// True for reads of absent paths, the expected transient failure.
    pub fn is_undefined_reference(&self) -> bool {
        matches!(
            self,
            EvalError::UndefinedVariable(_) | EvalError::UndefinedMember(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// `null`, `""`, `[]` and `{}` are empty; everything else is not.
///
/// The configuration store uses the same rule to prune keys.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Parses, caches and evaluates expressions.
///
/// Single-threaded: the cache sits behind a `RefCell` and parsed trees are
/// shared as `Rc<Expr>`.
#[derive(Debug, Default)]
pub struct Evaluator {
    cache: RefCell<HashMap<String, Rc<Expr>>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `expression`, reusing the cached tree for an identical string.
    pub fn parse(&self, expression: &str) -> Result<Rc<Expr>, ParseError> {
        if let Some(expr) = self.cache.borrow().get(expression) {
            return Ok(Rc::clone(expr));
        }
        let expr = Rc::new(parser::parse(expression)?);
        self.cache
            .borrow_mut()
            .insert(expression.to_string(), Rc::clone(&expr));
        Ok(expr)
    }

    /// Number of distinct expressions parsed so far.
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Evaluate, reporting every failure to the caller.
    pub fn try_evaluate(&self, expression: &str, context: &Value) -> Result<Value, ExprError> {
        let expr = self.parse(expression)?;
        Ok(eval::evaluate(&expr, context)?)
    }

    /// Evaluate, resolving any failure to `fallback`.
    pub fn evaluate(&self, expression: &str, context: &Value, fallback: Value) -> Value {
        match self.try_evaluate(expression, context) {
            Ok(value) => value,
            Err(ExprError::Eval(e)) if e.is_undefined_reference() => {
                trace!(expression, error = %e, "unresolved reference, using fallback");
                fallback
            }
            Err(e) => {
                error!(expression, error = %e, "expression evaluation failed");
                fallback
            }
        }
    }

    /// Evaluate as a condition. Non-boolean results use truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value, fallback: bool) -> bool {
        truthy(&self.evaluate(expression, context, Value::Bool(fallback)))
    }

    /// Evaluate as a number; a non-numeric result yields `fallback`.
    pub fn evaluate_number(&self, expression: &str, context: &Value, fallback: f64) -> f64 {
        match self.evaluate(expression, context, Value::Null) {
            Value::Number(n) => n.as_f64().unwrap_or(fallback),
            Value::Null => fallback,
            other => {
                error!(expression, result = %other, "expression did not produce a number");
                fallback
            }
        }
    }

    /// Sorted, de-duplicated paths the expression reads.
    ///
    /// Member chains are reported whole (`configs.USART1.mode`). Built-in
    /// function names are excluded. A malformed expression has no
    /// dependencies (the failure is logged).
    pub fn dependencies(&self, expression: &str) -> Vec<String> {
        match self.parse(expression) {
            Ok(expr) => {
                let mut out = BTreeSet::new();
                expr.collect_variables(BUILTINS, &mut out);
                out.into_iter().collect()
            }
            Err(e) => {
                error!(expression, error = %e, "dependency extraction failed");
                Vec::new()
            }
        }
    }
}

/// Instance-name placeholders substituted into expressions before parsing.
///
/// One static IP definition serves every instance of the peripheral: for
/// IP type `SPI`, instance `SPI1` has suffix `1`, instance `QSPI` has
/// prefix `Q`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    instance: String,
    prefix: String,
    suffix: String,
}

impl Placeholders {
    pub const INSTANCE: &'static str = "${IP_INSTANCE}";
    pub const PREFIXED: &'static str = "${IP_PREFIXED}";
    pub const SUFFIXED: &'static str = "${IP_SUFFIXED}";

    /// Derive prefix and suffix of `instance` around the IP type `name`.
    pub fn new(instance: &str, name: &str) -> Self {
        let prefix = instance.strip_suffix(name).unwrap_or_default();
        let suffix = instance.strip_prefix(name).unwrap_or_default();
        Self {
            instance: instance.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn substitute(&self, expression: &str) -> String {
        expression
            .replace(Self::INSTANCE, &self.instance)
            .replace(Self::PREFIXED, &self.prefix)
            .replace(Self::SUFFIXED, &self.suffix)
    }
}
