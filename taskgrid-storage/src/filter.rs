//! Row filters for keyed selects and deletes.

use crate::Row;
use serde_json::Value;
use std::cmp::Ordering;

/// One column predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq { column, .. } | Condition::In { column, .. } => column,
        }
    }

    fn matches(&self, row: &Row) -> bool {
        let actual = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Condition::Eq { value, .. } => value_eq(actual, value),
            Condition::In { values, .. } => values.iter().any(|v| value_eq(actual, v)),
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Conjunction of column predicates plus an optional ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    order: Option<Order>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn in_list<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    /// True when every condition holds for `row`.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// Sort rows in place according to the filter's ordering, if any.
    /// The sort is stable.
    pub fn sort(&self, rows: &mut [Row]) {
        if let Some(order) = &self.order {
            rows.sort_by(|a, b| {
                let left = a.get(&order.column).unwrap_or(&Value::Null);
                let right = b.get(&order.column).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right);
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
    }

    /// PostgREST query-string encoding (`col=eq.v`, `col=in.(a,b)`,
    /// `order=col.asc`).
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .conditions
            .iter()
            .map(|condition| match condition {
                Condition::Eq { column, value } => {
                    (column.clone(), format!("eq.{}", value_to_param(value)))
                }
                Condition::In { column, values } => {
                    let list = values
                        .iter()
                        .map(value_to_param)
                        .collect::<Vec<_>>()
                        .join(",");
                    (column.clone(), format!("in.({})", list))
                }
            })
            .collect();
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            pairs.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        pairs
    }
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn value_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Total order over JSON scalars: null < bool < number < string < other.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}
