//! Row filters shared by queries, mutations and the fake backend

use serde_json::Value;

/// Operator for filter expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to
    Eq,

    /// Not equal to
    Neq,

    /// Greater than
    Gt,

    /// Greater than or equal to
    Gte,

    /// Less than
    Lt,

    /// Less than or equal to
    Lte,

    /// In a list of values
    In,
}

impl FilterOperator {
    /// Convert the operator to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
        }
    }
}

/// A `column op value` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: String,
}

impl Filter {
    pub fn new<T: ToString>(column: &str, operator: FilterOperator, value: T) -> Self {
        Self {
            column: column.to_string(),
            operator,
            value: value.to_string(),
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<T: ToString>(column: &str, value: T) -> Self {
        Self::new(column, FilterOperator::Eq, value)
    }

    /// Filter rows where column does not equal a value
    pub fn neq<T: ToString>(column: &str, value: T) -> Self {
        Self::new(column, FilterOperator::Neq, value)
    }

    /// Filter rows where column is in a list of values
    pub fn in_list<T: ToString>(column: &str, values: &[T]) -> Self {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        Self::new(column, FilterOperator::In, format!("({})", values.join(",")))
    }

    /// The `column=op.value` query pair understood by PostgREST
    pub fn to_query_pair(&self) -> (String, String) {
        (
            self.column.clone(),
            format!("{}.{}", self.operator.as_str(), self.value),
        )
    }

    /// Evaluates the filter against a JSON row.
    ///
    /// Values are compared as numbers when both sides parse as numbers,
    /// otherwise as text. A missing column never matches.
    pub fn matches(&self, row: &Value) -> bool {
        let cell = match row.get(&self.column) {
            Some(Value::Null) | None => return false,
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        match self.operator {
            FilterOperator::Eq => cell == self.value,
            FilterOperator::Neq => cell != self.value,
            FilterOperator::In => self
                .value
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .any(|v| v == cell),
            op => {
                let ordering = match (cell.parse::<f64>(), self.value.parse::<f64>()) {
                    (Ok(a), Ok(b)) => a.partial_cmp(&b),
                    _ => Some(cell.as_str().cmp(self.value.as_str())),
                };
                match (op, ordering) {
                    (FilterOperator::Gt, Some(o)) => o.is_gt(),
                    (FilterOperator::Gte, Some(o)) => o.is_ge(),
                    (FilterOperator::Lt, Some(o)) => o.is_lt(),
                    (FilterOperator::Lte, Some(o)) => o.is_le(),
                    _ => false,
                }
            }
        }
    }
}
