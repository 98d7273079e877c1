//! Restricted expression evaluation for condition steps and transform filters
//!
//! Expressions are parsed into a small tree (see `parser`) and evaluated
//! against a snapshot of the run's variable store. There is no dynamic code
//! execution path: the grammar is closed over path access, comparisons, and
//! boolean connectives.

use anyhow::{bail, Result};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

mod parser;
mod value;

pub use parser::{parse_expression, ComparisonOp, Expression, LogicalOp};
pub use value::Value;

use crate::interpolation::lookup_path;

/// Evaluates condition expressions against run variables
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an expression and coerce the result to a boolean
    pub fn evaluate(&self, expression: &str, variables: &HashMap<String, JsonValue>) -> Result<bool> {
        let expr = parse_expression(expression)?;
        Ok(self.evaluate_node(&expr, variables)?.is_truthy())
    }

    /// Evaluate an expression to its value
    pub fn evaluate_value(
        &self,
        expression: &str,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<Value> {
        let expr = parse_expression(expression)?;
        self.evaluate_node(&expr, variables)
    }

    fn evaluate_node(&self, expr: &Expression, variables: &HashMap<String, JsonValue>) -> Result<Value> {
        match expr {
            // Undefined paths resolve to null rather than erroring, so
            // conditions can probe outputs that may not have been produced.
            Expression::Variable(path) => Ok(lookup_path(variables, path)
                .map(|v| Value::from_json(&v))
                .unwrap_or(Value::Null)),
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Comparison { left, op, right } => {
                let left = self.evaluate_node(left, variables)?;
                let right = self.evaluate_node(right, variables)?;
                compare(&left, op, &right)
            }
            Expression::Logical { left, op, right } => match op {
                LogicalOp::And => {
                    if !self.evaluate_node(left, variables)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(self.evaluate_node(right, variables)?.is_truthy()))
                }
                LogicalOp::Or => {
                    if self.evaluate_node(left, variables)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(self.evaluate_node(right, variables)?.is_truthy()))
                }
            },
            Expression::Not(inner) => {
                Ok(Value::Bool(!self.evaluate_node(inner, variables)?.is_truthy()))
            }
            Expression::Exists(path) => Ok(Value::Bool(lookup_path(variables, path).is_some())),
        }
    }
}

fn compare(left: &Value, op: &ComparisonOp, right: &Value) -> Result<Value> {
    let (left, right) = coerce_pair(left.clone(), right.clone());

    let result = match op {
        ComparisonOp::Equal => left == right,
        ComparisonOp::NotEqual => left != right,
        ComparisonOp::GreaterThan => ordered(&left, &right, |o| o == std::cmp::Ordering::Greater)?,
        ComparisonOp::LessThan => ordered(&left, &right, |o| o == std::cmp::Ordering::Less)?,
        ComparisonOp::GreaterThanOrEqual => {
            ordered(&left, &right, |o| o != std::cmp::Ordering::Less)?
        }
        ComparisonOp::LessThanOrEqual => {
            ordered(&left, &right, |o| o != std::cmp::Ordering::Greater)?
        }
    };
    Ok(Value::Bool(result))
}

/// Numeric strings compared against numbers are coerced to numbers
fn coerce_pair(left: Value, right: Value) -> (Value, Value) {
    match (&left, &right) {
        (Value::String(s), Value::Number(_)) => match s.parse::<f64>() {
            Ok(n) => (Value::Number(n), right),
            Err(_) => (left, right),
        },
        (Value::Number(_), Value::String(s)) => match s.parse::<f64>() {
            Ok(n) => (left, Value::Number(n)),
            Err(_) => (left, right),
        },
        _ => (left, right),
    }
}

fn ordered(left: &Value, right: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> Result<bool> {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.partial_cmp(r),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    };
    match ordering {
        Some(o) => Ok(check(o)),
        None => bail!("Cannot order {:?} and {:?}", left, right),
    }
}
