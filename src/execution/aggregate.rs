use std::cmp::Ordering;
use std::fmt;

use crate::common::{DbError, Result};
use crate::tuple::Value;

/// Aggregate function names accepted in projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Min,
    Max,
    Avg,
    Count,
    AnyFirst,
    AnyLast,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<AggFunc> {
        let func = match name.to_ascii_uppercase().as_str() {
            "SUM" => AggFunc::Sum,
            "MIN" => AggFunc::Min,
            "MAX" => AggFunc::Max,
            "AVG" => AggFunc::Avg,
            "COUNT" => AggFunc::Count,
            "ANY_FIRST" => AggFunc::AnyFirst,
            "ANY_LAST" => AggFunc::AnyLast,
            _ => return None,
        };
        Some(func)
    }

    /// Whether the function reads its argument.
    pub fn needs_argument(&self) -> bool {
        !matches!(self, AggFunc::Count)
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggFunc::Sum => "SUM",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
            AggFunc::Avg => "AVG",
            AggFunc::Count => "COUNT",
            AggFunc::AnyFirst => "ANY_FIRST",
            AggFunc::AnyLast => "ANY_LAST",
        };
        write!(f, "{}", name)
    }
}

/// Running state of one aggregate over one group.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    /// Integer sums widen to 64-bit signed, others to 64-bit float
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: u64 },
    Count(u64),
    AnyFirst(Option<Value>),
    AnyLast(Option<Value>),
}

impl Aggregator {
    pub fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Sum => Aggregator::Sum(None),
            AggFunc::Min => Aggregator::Min(None),
            AggFunc::Max => Aggregator::Max(None),
            AggFunc::Avg => Aggregator::Avg { sum: 0.0, count: 0 },
            AggFunc::Count => Aggregator::Count(0),
            AggFunc::AnyFirst => Aggregator::AnyFirst(None),
            AggFunc::AnyLast => Aggregator::AnyLast(None),
        }
    }

    /// Folds one input value in. `Count` ignores it.
    pub fn update(&mut self, value: &Value) -> Result<()> {
        match self {
            Aggregator::Sum(acc) => {
                let next = match (acc.take(), value) {
                    (None, v) => widen(v)?,
                    (Some(Value::Int64(a)), v) if v.as_i128().is_some() => {
                        let b = i64::try_from(v.as_i128().unwrap_or_default())
                            .map_err(|_| DbError::Overflow)?;
                        Value::Int64(a.checked_add(b).ok_or(DbError::Overflow)?)
                    }
                    (Some(a), v) => Value::Float64(number(&a)? + number(v)?),
                };
                *acc = Some(next);
            }
            Aggregator::Min(acc) => keep_if(acc, value, Ordering::Less)?,
            Aggregator::Max(acc) => keep_if(acc, value, Ordering::Greater)?,
            Aggregator::Avg { sum, count } => {
                *sum += number(value)?;
                *count += 1;
            }
            Aggregator::Count(n) => *n += 1,
            Aggregator::AnyFirst(acc) => {
                if acc.is_none() {
                    *acc = Some(value.clone());
                }
            }
            Aggregator::AnyLast(acc) => *acc = Some(value.clone()),
        }
        Ok(())
    }

    /// The aggregate's value. Aggregates that never saw a value report the
    /// type default of their kind.
    pub fn result(&self) -> Value {
        match self {
            Aggregator::Sum(acc) => acc.clone().unwrap_or(Value::Int64(0)),
            Aggregator::Avg { sum, count } if *count > 0 => Value::Float64(sum / *count as f64),
            Aggregator::Avg { .. } => Value::Float64(0.0),
            Aggregator::Count(n) => Value::Int64(*n as i64),
            Aggregator::Min(acc)
            | Aggregator::Max(acc)
            | Aggregator::AnyFirst(acc)
            | Aggregator::AnyLast(acc) => acc.clone().unwrap_or(Value::Int64(0)),
        }
    }
}

fn number(value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| DbError::InvalidCast {
        from: value.data_type().to_string(),
        to: "Float64".to_string(),
    })
}

fn widen(value: &Value) -> Result<Value> {
    match value.as_i128() {
        Some(n) if !matches!(value, Value::DateTime(_)) => {
            Ok(Value::Int64(i64::try_from(n).map_err(|_| DbError::Overflow)?))
        }
        _ => Ok(Value::Float64(number(value)?)),
    }
}

fn keep_if(acc: &mut Option<Value>, value: &Value, wanted: Ordering) -> Result<()> {
    let replace = match acc {
        None => true,
        Some(current) => {
            let ord = value.compare(current).ok_or_else(|| DbError::InvalidCast {
                from: value.data_type().to_string(),
                to: current.data_type().to_string(),
            })?;
            ord == wanted
        }
    };
    if replace {
        *acc = Some(value.clone());
    }
    Ok(())
}
