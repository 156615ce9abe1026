//! Declarative predicate model and filter compilation
//!
//! Predicates arrive either through the typed builder or as the wire form: a
//! JSON map from column name to a scalar (equality) or an operator object
//! such as `{"gte": 100}` or `{"between": [a, b]}`.
//!
//! Compilation produces the flat SQL-like filter string consumed by the
//! columnar engine. Invalid clauses (unknown operator, operand type
//! mismatch) are logged and skipped; they never fail the whole query. An
//! empty predicate compiles to an empty filter (match-all).

use serde_json::Value;

/// A single column condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Between(Value, Value),
    In(Vec<Value>),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
}

/// A column paired with its condition
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: String,
    pub condition: Condition,
}

/// Conjunction of column conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn push(mut self, column: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push(Clause {
            column: column.into(),
            condition,
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, Condition::Eq(value.into()))
    }

    pub fn ne(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, Condition::Ne(value.into()))
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, Condition::Gt(value.into()))
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, Condition::Gte(value.into()))
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, Condition::Lt(value.into()))
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, Condition::Lte(value.into()))
    }

    pub fn between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(column, Condition::Between(low.into(), high.into()))
    }

    pub fn in_list(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.push(column, Condition::In(values))
    }

    pub fn contains(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(column, Condition::Contains(value.into()))
    }

    /// Parse the wire form: `{column: scalar | {op: value, ...}}`.
    ///
    /// Unknown operators and operand type mismatches are logged and skipped.
    pub fn from_json(map: &serde_json::Map<String, Value>) -> Self {
        let mut predicate = Self::new();
        for (column, spec) in map {
            match spec {
                Value::Object(ops) => {
                    for (op, operand) in ops {
                        match parse_condition(column, op, operand) {
                            Some(condition) => {
                                predicate.clauses.push(Clause {
                                    column: column.clone(),
                                    condition,
                                });
                            }
                            None => {
                                tracing::warn!(
                                    column = %column,
                                    operator = %op,
                                    "Skipping unsupported predicate clause"
                                );
                            }
                        }
                    }
                }
                scalar => {
                    predicate.clauses.push(Clause {
                        column: column.clone(),
                        condition: Condition::Eq(scalar.clone()),
                    });
                }
            }
        }
        predicate
    }

    /// Compile to the engine filter string; empty predicate compiles to an
    /// empty (match-all) filter.
    pub fn compile(&self) -> String {
        let parts: Vec<String> = self
            .clauses
            .iter()
            .filter_map(compile_clause)
            .collect();
        parts.join(" AND ")
    }
}

fn parse_condition(column: &str, op: &str, operand: &Value) -> Option<Condition> {
    match op {
        "eq" => Some(Condition::Eq(operand.clone())),
        "ne" => Some(Condition::Ne(operand.clone())),
        "gt" => Some(Condition::Gt(operand.clone())),
        "gte" => Some(Condition::Gte(operand.clone())),
        "lt" => Some(Condition::Lt(operand.clone())),
        "lte" => Some(Condition::Lte(operand.clone())),
        "between" => match operand.as_array() {
            Some(bounds) if bounds.len() == 2 => {
                Some(Condition::Between(bounds[0].clone(), bounds[1].clone()))
            }
            _ => {
                tracing::warn!(column = %column, "'between' requires a 2-element sequence");
                None
            }
        },
        "in" => match operand.as_array() {
            Some(values) if !values.is_empty() => Some(Condition::In(values.clone())),
            _ => {
                tracing::warn!(column = %column, "'in' requires a non-empty sequence");
                None
            }
        },
        "contains" => operand.as_str().map(|s| Condition::Contains(s.to_string())),
        "starts_with" => operand
            .as_str()
            .map(|s| Condition::StartsWith(s.to_string())),
        "ends_with" => operand.as_str().map(|s| Condition::EndsWith(s.to_string())),
        _ => None,
    }
}

fn compile_clause(clause: &Clause) -> Option<String> {
    let column = &clause.column;
    let part = match &clause.condition {
        Condition::Eq(Value::Null) => format!("{} IS NULL", column),
        Condition::Eq(value) => format!("{} = {}", column, format_value(column, value)?),
        Condition::Ne(Value::Null) => format!("{} IS NOT NULL", column),
        Condition::Ne(value) => format!("{} != {}", column, format_value(column, value)?),
        Condition::Gt(value) => format!("{} > {}", column, format_value(column, value)?),
        Condition::Gte(value) => format!("{} >= {}", column, format_value(column, value)?),
        Condition::Lt(value) => format!("{} < {}", column, format_value(column, value)?),
        Condition::Lte(value) => format!("{} <= {}", column, format_value(column, value)?),
        Condition::Between(low, high) => format!(
            "{} BETWEEN {} AND {}",
            column,
            format_value(column, low)?,
            format_value(column, high)?
        ),
        Condition::In(values) => {
            if values.is_empty() {
                tracing::warn!(column = %column, "Skipping empty 'in' clause");
                return None;
            }
            let formatted: Option<Vec<String>> =
                values.iter().map(|v| format_value(column, v)).collect();
            format!("{} IN ({})", column, formatted?.join(", "))
        }
        Condition::Contains(value) => {
            format!("{} LIKE '%{}%'", column, escape_string(value))
        }
        Condition::StartsWith(value) => {
            format!("{} LIKE '{}%'", column, escape_string(value))
        }
        Condition::EndsWith(value) => {
            format!("{} LIKE '%{}'", column, escape_string(value))
        }
    };
    Some(part)
}

/// Format a scalar operand as a SQL literal. Strings are quoted, numbers and
/// booleans literal, NULL passes through; nested structures are unsupported.
fn format_value(column: &str, value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("NULL".to_string()),
        Value::String(s) => Some(format!("'{}'", escape_string(s))),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Object(_) | Value::Array(_) => {
            tracing::warn!(column = %column, "Unsupported operand type, skipping clause");
            None
        }
    }
}

fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}
