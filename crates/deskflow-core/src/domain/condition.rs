//! Condition groups and their evaluator
//!
//! Conditions compare a context field against a literal or `$variable`
//! value using a closed operator set. A node- or connection-level
//! condition is a list of groups: members of a group combine under the
//! group's own AND/OR operator, the groups themselves combine under OR.
//! Evaluation never fails; unresolvable fields simply read as absent.

use crate::context::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operator combining the conditions inside one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    /// Every member must hold
    And,
    /// Any member suffices
    Or,
}

/// Comparison applied between the resolved field and the comparison value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    /// Field equals the value (numeric values compare numerically)
    Equals,
    /// Field differs from the value
    NotEquals,
    /// String contains a substring, array contains an element
    Contains,
    /// Negation of `Contains`
    NotContains,
    /// Numeric greater-than, coercing numeric strings
    GreaterThan,
    /// Numeric less-than, coercing numeric strings
    LessThan,
    /// Field is absent, null, or an empty string/array/object
    IsEmpty,
    /// Field is present and non-empty
    IsNotEmpty,
}

/// A single field comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the context, with or without a leading `$`
    pub field: String,
    /// Comparison operator
    pub operator: ComparisonOperator,
    /// Literal comparison value, or a `"$variable"` reference
    #[serde(default)]
    pub value: Value,
}

/// Conditions combined under one logical operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    /// How the member conditions combine
    pub operator: LogicalOperator,
    /// Member conditions
    pub conditions: Vec<Condition>,
}

/// Evaluate a list of condition groups against a run context
///
/// Groups combine under OR. An empty list evaluates to true, the
/// deliberate pass-through default for unconditioned connections.
pub fn evaluate_groups(groups: &[ConditionGroup], context: &ExecutionContext) -> bool {
    if groups.is_empty() {
        return true;
    }
    groups.iter().any(|group| evaluate_group(group, context))
}

fn evaluate_group(group: &ConditionGroup, context: &ExecutionContext) -> bool {
    match group.operator {
        LogicalOperator::And => group
            .conditions
            .iter()
            .all(|condition| evaluate_condition(condition, context)),
        LogicalOperator::Or => group
            .conditions
            .iter()
            .any(|condition| evaluate_condition(condition, context)),
    }
}

/// Evaluate one condition; missing fields satisfy `IsEmpty` and nothing else
pub fn evaluate_condition(condition: &Condition, context: &ExecutionContext) -> bool {
    let field = context.lookup_path(&condition.field);

    let Some(field) = field else {
        return condition.operator == ComparisonOperator::IsEmpty;
    };

    match condition.operator {
        ComparisonOperator::IsEmpty => is_empty(&field),
        ComparisonOperator::IsNotEmpty => !is_empty(&field),
        ComparisonOperator::Equals => values_equal(&field, &resolve_operand(condition, context)),
        ComparisonOperator::NotEquals => {
            !values_equal(&field, &resolve_operand(condition, context))
        }
        ComparisonOperator::Contains => contains(&field, &resolve_operand(condition, context)),
        ComparisonOperator::NotContains => {
            !contains(&field, &resolve_operand(condition, context))
        }
        ComparisonOperator::GreaterThan => {
            numeric_compare(&field, &resolve_operand(condition, context))
                .map(|ordering| ordering == std::cmp::Ordering::Greater)
                .unwrap_or(false)
        }
        ComparisonOperator::LessThan => {
            numeric_compare(&field, &resolve_operand(condition, context))
                .map(|ordering| ordering == std::cmp::Ordering::Less)
                .unwrap_or(false)
        }
    }
}

/// Resolve the comparison value: `"$name"` strings read from the context,
/// anything else is a literal. An unresolvable reference reads as null.
fn resolve_operand(condition: &Condition, context: &ExecutionContext) -> Value {
    match &condition.value {
        Value::String(s) if s.len() > 1 && s.starts_with('$') && !s.starts_with("$__") => {
            context.lookup_path(s).unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(sub) => s.contains(sub.as_str()),
            other => s.contains(&other.to_string()),
        },
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => match needle {
            Value::String(key) => map.contains_key(key),
            _ => false,
        },
        _ => false,
    }
}

fn numeric_compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    let (left, right) = (as_number(left)?, as_number(right)?);
    left.partial_cmp(&right)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::seeded(
            &[],
            &json!({
                "ticket": {
                    "priority": "high",
                    "reopen_count": 2,
                    "tags": ["vip", "billing"],
                    "summary": "printer is on fire",
                },
                "threshold": "3",
            }),
        )
    }

    fn condition(field: &str, operator: ComparisonOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    fn group(operator: LogicalOperator, conditions: Vec<Condition>) -> ConditionGroup {
        ConditionGroup {
            operator,
            conditions,
        }
    }

    #[test]
    fn test_empty_group_list_passes_through() {
        assert!(evaluate_groups(&[], &context()));
    }

    #[test]
    fn test_equals_and_not_equals() {
        let ctx = context();
        assert!(evaluate_condition(
            &condition("$ticket.priority", ComparisonOperator::Equals, json!("high")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("ticket.priority", ComparisonOperator::NotEquals, json!("low")),
            &ctx
        ));
        // Numeric equality normalizes representations
        assert!(evaluate_condition(
            &condition("$ticket.reopen_count", ComparisonOperator::Equals, json!(2.0)),
            &ctx
        ));
    }

    #[test]
    fn test_missing_field_semantics() {
        let ctx = context();
        assert!(evaluate_condition(
            &condition("$ticket.closed_at", ComparisonOperator::IsEmpty, Value::Null),
            &ctx
        ));
        // Every other operator is false on a missing field, never a panic
        for operator in [
            ComparisonOperator::Equals,
            ComparisonOperator::NotEquals,
            ComparisonOperator::Contains,
            ComparisonOperator::NotContains,
            ComparisonOperator::GreaterThan,
            ComparisonOperator::LessThan,
            ComparisonOperator::IsNotEmpty,
        ] {
            assert!(
                !evaluate_condition(
                    &condition("$ticket.closed_at", operator, json!("anything")),
                    &ctx
                ),
                "{operator:?} should be false for a missing field"
            );
        }
    }

    #[test]
    fn test_contains_on_strings_arrays_objects() {
        let ctx = context();
        assert!(evaluate_condition(
            &condition("$ticket.summary", ComparisonOperator::Contains, json!("fire")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("$ticket.tags", ComparisonOperator::Contains, json!("vip")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("$ticket", ComparisonOperator::Contains, json!("priority")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("$ticket.tags", ComparisonOperator::NotContains, json!("spam")),
            &ctx
        ));
    }

    #[test]
    fn test_numeric_comparison_with_string_coercion() {
        let ctx = context();
        // threshold is the string "3"; reopen_count the number 2
        assert!(evaluate_condition(
            &condition("$threshold", ComparisonOperator::GreaterThan, json!("$ticket.reopen_count")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("$ticket.reopen_count", ComparisonOperator::LessThan, json!("3")),
            &ctx
        ));
        // Non-numeric operands are false, not an error
        assert!(!evaluate_condition(
            &condition("$ticket.priority", ComparisonOperator::GreaterThan, json!(1)),
            &ctx
        ));
    }

    #[test]
    fn test_variable_reference_value() {
        let ctx = context();
        assert!(evaluate_condition(
            &condition("$threshold", ComparisonOperator::Equals, json!("$threshold")),
            &ctx
        ));
        // Unresolvable reference reads as null
        assert!(!evaluate_condition(
            &condition("$ticket.priority", ComparisonOperator::Equals, json!("$missing")),
            &ctx
        ));
    }

    #[test]
    fn test_group_combination() {
        let ctx = context();
        let failing_and = group(
            LogicalOperator::And,
            vec![
                condition("$ticket.priority", ComparisonOperator::Equals, json!("high")),
                condition("$ticket.reopen_count", ComparisonOperator::GreaterThan, json!(5)),
            ],
        );
        let passing_or = group(
            LogicalOperator::Or,
            vec![
                condition("$ticket.priority", ComparisonOperator::Equals, json!("low")),
                condition("$ticket.tags", ComparisonOperator::Contains, json!("vip")),
            ],
        );

        assert!(!evaluate_groups(std::slice::from_ref(&failing_and), &ctx));
        assert!(evaluate_groups(std::slice::from_ref(&passing_or), &ctx));
        // Groups combine under OR: one passing group carries the list
        assert!(evaluate_groups(&[failing_and, passing_or], &ctx));
    }

    #[test]
    fn test_serde_round_trip() {
        let original = group(
            LogicalOperator::And,
            vec![condition(
                "$ticket.priority",
                ComparisonOperator::NotEquals,
                json!("low"),
            )],
        );
        let text = serde_json::to_string(&original).unwrap();
        assert!(text.contains("\"and\""));
        assert!(text.contains("\"not_equals\""));
        let parsed: ConditionGroup = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }
}
