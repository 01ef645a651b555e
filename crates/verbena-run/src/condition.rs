//! Transition guard evaluation using minijinja expressions.
//!
//! Conditions are boolean expressions over run variables, e.g.
//! `amount > 1000 and region == "eu"`. They are compiled and evaluated
//! against the run's variable map; the result is coerced with minijinja's
//! truthiness rules.

use std::collections::HashMap;

use minijinja::Environment;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConditionError {
  #[error("failed to evaluate condition '{expression}': {message}")]
  Evaluation { expression: String, message: String },
}

/// Evaluate a guard expression against run variables.
pub fn evaluate_condition(
  expression: &str,
  variables: &HashMap<String, serde_json::Value>,
) -> Result<bool, ConditionError> {
  let env = Environment::new();
  let expr = env
    .compile_expression(expression)
    .map_err(|e| ConditionError::Evaluation {
      expression: expression.to_string(),
      message: e.to_string(),
    })?;

  let result = expr
    .eval(minijinja::Value::from_serialize(variables))
    .map_err(|e| ConditionError::Evaluation {
      expression: expression.to_string(),
      message: e.to_string(),
    })?;

  Ok(result.is_true())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn vars(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect()
  }

  #[test]
  fn comparison_over_variables() {
    let v = vars(&[("amount", json!(1500))]);
    assert!(evaluate_condition("amount > 1000", &v).unwrap());
    assert!(!evaluate_condition("amount > 2000", &v).unwrap());
  }

  #[test]
  fn string_equality() {
    let v = vars(&[("region", json!("eu"))]);
    assert!(evaluate_condition("region == 'eu'", &v).unwrap());
  }

  #[test]
  fn missing_variable_is_falsy() {
    let v = vars(&[]);
    assert!(!evaluate_condition("approved", &v).unwrap());
  }

  #[test]
  fn malformed_expression_is_an_error() {
    let v = vars(&[]);
    assert!(evaluate_condition("1 ==", &v).is_err());
  }
}
