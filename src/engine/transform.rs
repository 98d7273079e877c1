//! Data transform step handler and the closed transformation pipeline
//!
//! A transform step builds its input object from the variable store, then
//! applies a sequence of operations strictly in order, each consuming the
//! previous operation's output. The operation set is a closed enum evaluated
//! by exhaustive match; there is no arbitrary-code escape hatch.

use crate::engine::{StepExecutionResult, StepExecutor, TransformStepConfig, WorkflowContext, WorkflowStep};
use crate::expression::ExpressionEvaluator;
use crate::interpolation::{lookup_in_value, lookup_path};
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// One pipeline operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransformOp {
    /// Descend to a nested value (`items`, `result.rows[0]`)
    Select { path: String },
    /// Keep only the listed fields of an object, or of each element of an
    /// array of objects
    Pick { fields: Vec<String> },
    /// Rename fields per `from -> to` mapping
    Rename { mapping: HashMap<String, String> },
    /// Keep array elements for which the expression holds, with `item`
    /// bound to the element
    Filter { expression: String },
    /// Sort an array of objects by a field
    Sort {
        by: String,
        #[serde(default)]
        order: SortOrder,
    },
    /// Truncate an array
    Limit { count: usize },
    /// Fold an array to a scalar
    Aggregate {
        op: AggregateOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl StepExecutor {
    pub(crate) async fn execute_transform_step(
        &self,
        step: &WorkflowStep,
        config: &TransformStepConfig,
        context: &WorkflowContext,
    ) -> StepExecutionResult {
        let start = Instant::now();
        let snapshot = context.variables.snapshot().await;

        let mut input = Map::new();
        for (local_key, variable_path) in &config.input_mapping {
            match lookup_path(&snapshot, variable_path) {
                Some(value) => {
                    input.insert(local_key.clone(), value);
                }
                None => debug!(
                    step_id = %step.id,
                    variable_path = %variable_path,
                    "input mapping path unresolved, omitting key"
                ),
            }
        }

        match apply_transformations(&config.transformations, Value::Object(input), &self.evaluator)
        {
            Ok(output) => {
                context
                    .variables
                    .set_from(&step.id, config.output_variable.clone(), output.clone())
                    .await;
                context
                    .variables
                    .set_from(&step.id, step.id.clone(), output.clone())
                    .await;
                StepExecutionResult {
                    step_id: step.id.clone(),
                    step_type: Some(step.step_type()),
                    success: true,
                    data: Some(output),
                    error: None,
                    next_step_id: step.on_success.clone(),
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    resources_created: Vec::new(),
                    metadata: [(
                        "output_variable".to_string(),
                        json!(config.output_variable),
                    )]
                    .into_iter()
                    .collect(),
                }
            }
            Err(err) => StepExecutionResult::failed(
                step,
                format!("transform failed: {err}"),
                start.elapsed().as_millis() as u64,
            ),
        }
    }
}

/// Run the pipeline: each operation consumes the previous one's output
pub fn apply_transformations(
    ops: &[TransformOp],
    input: Value,
    evaluator: &ExpressionEvaluator,
) -> Result<Value> {
    let mut current = input;
    for op in ops {
        current = apply_op(op, current, evaluator)?;
    }
    Ok(current)
}

fn apply_op(op: &TransformOp, input: Value, evaluator: &ExpressionEvaluator) -> Result<Value> {
    match op {
        TransformOp::Select { path } => lookup_in_value(&input, path)
            .ok_or_else(|| anyhow!("select path '{}' not found", path)),
        TransformOp::Pick { fields } => pick(input, fields),
        TransformOp::Rename { mapping } => rename(input, mapping),
        TransformOp::Filter { expression } => filter(input, expression, evaluator),
        TransformOp::Sort { by, order } => sort(input, by, *order),
        TransformOp::Limit { count } => match input {
            Value::Array(mut items) => {
                items.truncate(*count);
                Ok(Value::Array(items))
            }
            other => bail!("limit requires an array, got {}", type_name(&other)),
        },
        TransformOp::Aggregate { op, field } => aggregate(input, *op, field.as_deref()),
    }
}

fn pick(input: Value, fields: &[String]) -> Result<Value> {
    match input {
        Value::Object(map) => Ok(Value::Object(pick_object(map, fields))),
        Value::Array(items) => {
            let picked = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(Value::Object(pick_object(map, fields))),
                    other => bail!("pick requires object elements, got {}", type_name(&other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(picked))
        }
        other => bail!("pick requires an object or array, got {}", type_name(&other)),
    }
}

fn pick_object(map: Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    let mut picked = Map::new();
    for field in fields {
        if let Some(value) = map.get(field) {
            picked.insert(field.clone(), value.clone());
        }
    }
    picked
}

fn rename(input: Value, mapping: &HashMap<String, String>) -> Result<Value> {
    match input {
        Value::Object(map) => Ok(Value::Object(rename_object(map, mapping))),
        Value::Array(items) => {
            let renamed = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(Value::Object(rename_object(map, mapping))),
                    other => bail!("rename requires object elements, got {}", type_name(&other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(renamed))
        }
        other => bail!("rename requires an object or array, got {}", type_name(&other)),
    }
}

fn rename_object(map: Map<String, Value>, mapping: &HashMap<String, String>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let key = mapping.get(&key).cloned().unwrap_or(key);
            (key, value)
        })
        .collect()
}

fn filter(input: Value, expression: &str, evaluator: &ExpressionEvaluator) -> Result<Value> {
    let Value::Array(items) = input else {
        bail!("filter requires an array, got {}", type_name(&input));
    };
    let mut kept = Vec::new();
    for item in items {
        let scope: HashMap<String, Value> = [("item".to_string(), item.clone())].into_iter().collect();
        if evaluator.evaluate(expression, &scope)? {
            kept.push(item);
        }
    }
    Ok(Value::Array(kept))
}

fn sort(input: Value, by: &str, order: SortOrder) -> Result<Value> {
    let Value::Array(mut items) = input else {
        bail!("sort requires an array, got {}", type_name(&input));
    };
    items.sort_by(|a, b| {
        let left = lookup_in_value(a, by).unwrap_or(Value::Null);
        let right = lookup_in_value(b, by).unwrap_or(Value::Null);
        let ordering = json_cmp(&left, &right);
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    Ok(Value::Array(items))
}

fn aggregate(input: Value, op: AggregateOp, field: Option<&str>) -> Result<Value> {
    let Value::Array(items) = input else {
        bail!("aggregate requires an array, got {}", type_name(&input));
    };

    if op == AggregateOp::Count {
        let count = match field {
            Some(field) => items
                .iter()
                .filter(|item| lookup_in_value(item, field).is_some())
                .count(),
            None => items.len(),
        };
        return Ok(json!(count));
    }

    let mut numbers = Vec::with_capacity(items.len());
    for item in &items {
        let value = match field {
            Some(field) => lookup_in_value(item, field)
                .ok_or_else(|| anyhow!("aggregate field '{}' absent from element", field))?,
            None => item.clone(),
        };
        let number = value
            .as_f64()
            .ok_or_else(|| anyhow!("aggregate requires numeric values, got {}", type_name(&value)))?;
        numbers.push(number);
    }

    let folded = match op {
        AggregateOp::Count => unreachable!("count handled above"),
        AggregateOp::Sum => Some(numbers.iter().sum::<f64>()),
        AggregateOp::Avg => {
            if numbers.is_empty() {
                None
            } else {
                Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateOp::Min => numbers.iter().cloned().reduce(f64::min),
        AggregateOp::Max => numbers.iter().cloned().reduce(f64::max),
    };
    Ok(match folded {
        Some(n) => json!(n),
        // empty array: no meaningful min/max/avg
        None => Value::Null,
    })
}

/// Total order over JSON values: null < bool < number < string < composite
fn json_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
