//! Structural difference reporting for object-equality assertions.
//!
//! A [`Differ`] only enriches failure messages; pass/fail is decided by
//! value equality in the assertion itself, so a missing differ degrades
//! diagnostics without changing semantics.

use serde_json::Value;

/// Produces a human-readable report of how `actual` deviates from
/// `expected`.
pub trait Differ: Send + Sync {
    /// Describe the differences, or `None` when the values are equal.
    fn difference(&self, expected: &Value, actual: &Value) -> Option<String>;
}

/// Default differ: recursive walk over JSON values reporting path-qualified
/// mismatches.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralDiffer;

impl Differ for StructuralDiffer {
    fn difference(&self, expected: &Value, actual: &Value) -> Option<String> {
        let mut lines = Vec::new();
        walk("$", expected, actual, &mut lines);
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("; "))
        }
    }
}

fn walk(path: &str, expected: &Value, actual: &Value, lines: &mut Vec<String>) {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => {
            for (key, exp_value) in exp {
                let child = format!("{path}.{key}");
                match act.get(key) {
                    Some(act_value) => walk(&child, exp_value, act_value, lines),
                    None => lines.push(format!("{child}: missing (expected {exp_value})")),
                }
            }
            for key in act.keys().filter(|k| !exp.contains_key(*k)) {
                lines.push(format!("{path}.{key}: unexpected"));
            }
        }
        (Value::Array(exp), Value::Array(act)) => {
            if exp.len() != act.len() {
                lines.push(format!(
                    "{path}: length {} != expected {}",
                    act.len(),
                    exp.len()
                ));
            }
            for (index, (exp_value, act_value)) in exp.iter().zip(act).enumerate() {
                walk(&format!("{path}[{index}]"), exp_value, act_value, lines);
            }
        }
        _ => {
            if expected != actual {
                lines.push(format!("{path}: expected {expected}, got {actual}"));
            }
        }
    }
}
