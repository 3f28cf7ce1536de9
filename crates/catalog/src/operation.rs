//! Billable operations: a cost rule plus validation predicates over params.

use std::ops::Add;
use std::sync::Arc;

use serde_json::Value;

use creditforge_core::{CreditError, CreditResult, RoundingStrategy};

/// Parameters supplied by the caller when spending on an operation.
pub type OperationParams = serde_json::Map<String, Value>;

type CostFn = Arc<dyn Fn(&OperationParams) -> f64 + Send + Sync>;
type PredicateFn = Arc<dyn Fn(&OperationParams) -> bool + Send + Sync>;

/// How many credits an operation costs for given params.
#[derive(Clone)]
pub enum Cost {
    /// A flat amount.
    Fixed(i64),
    /// `credits` for every `per_units` of the numeric param `param`.
    PerUnit {
        param: String,
        credits: i64,
        per_units: u64,
    },
    /// Arbitrary function; the result is rounded with the engine's strategy.
    Custom(CostFn),
    /// Sum of components, each rounded on its own.
    Sum(Vec<Cost>),
}

impl Cost {
    pub fn fixed(credits: i64) -> Self {
        Self::Fixed(credits)
    }

    pub fn per(param: impl Into<String>, credits: i64, per_units: u64) -> Self {
        Self::PerUnit {
            param: param.into(),
            credits,
            per_units,
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&OperationParams) -> f64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate against `params`, rounding fractional results.
    pub fn compute(&self, params: &OperationParams, rounding: RoundingStrategy) -> CreditResult<i64> {
        match self {
            Cost::Fixed(credits) => Ok(*credits),
            Cost::PerUnit {
                param,
                credits,
                per_units,
            } => {
                if *per_units == 0 {
                    return Err(CreditError::invalid_operation(format!(
                        "per-unit cost on '{param}' has a zero unit size"
                    )));
                }
                let value = params.get(param).ok_or_else(|| {
                    CreditError::invalid_operation(format!("missing parameter '{param}'"))
                })?;
                if let Some(units) = value.as_u64() {
                    rounding.apply_ratio(
                        i128::from(*credits) * i128::from(units),
                        i128::from(*per_units),
                    )
                } else if let Some(units) = value.as_f64().filter(|u| *u >= 0.0) {
                    rounding.apply_f64(*credits as f64 * units / *per_units as f64)
                } else {
                    Err(CreditError::invalid_operation(format!(
                        "parameter '{param}' must be a non-negative number"
                    )))
                }
            }
            Cost::Custom(f) => rounding.apply_f64(f(params)),
            Cost::Sum(parts) => parts.iter().try_fold(0i64, |acc, part| {
                let cost = part.compute(params, rounding)?;
                acc.checked_add(cost)
                    .ok_or_else(|| CreditError::invalid_operation("operation cost overflow"))
            }),
        }
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        match (self, rhs) {
            (Cost::Sum(mut a), Cost::Sum(b)) => {
                a.extend(b);
                Cost::Sum(a)
            }
            (Cost::Sum(mut a), other) => {
                a.push(other);
                Cost::Sum(a)
            }
            (other, Cost::Sum(mut b)) => {
                b.insert(0, other);
                Cost::Sum(b)
            }
            (a, b) => Cost::Sum(vec![a, b]),
        }
    }
}

impl core::fmt::Debug for Cost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Cost::Fixed(c) => write!(f, "Fixed({c})"),
            Cost::PerUnit {
                param,
                credits,
                per_units,
            } => write!(f, "PerUnit({credits} per {per_units} {param})"),
            Cost::Custom(_) => write!(f, "Custom(..)"),
            Cost::Sum(parts) => f.debug_list().entries(parts).finish(),
        }
    }
}

/// A named predicate the params must satisfy before any credits are spent.
#[derive(Clone)]
pub struct Validation {
    pub message: String,
    predicate: PredicateFn,
}

impl Validation {
    pub fn new<F>(message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&OperationParams) -> bool + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn check(&self, params: &OperationParams) -> bool {
        (self.predicate)(params)
    }
}

impl core::fmt::Debug for Validation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Validation")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// A billable operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub cost: Cost,
    pub validations: Vec<Validation>,
}

impl Operation {
    /// Run every validation, failing with the first violated message.
    pub fn validate(&self, params: &OperationParams) -> CreditResult<()> {
        match self.validations.iter().find(|v| !v.check(params)) {
            Some(failed) => Err(CreditError::invalid_operation(format!(
                "{}: {}",
                self.name, failed.message
            ))),
            None => Ok(()),
        }
    }

    /// Validated, rounded cost for `params`.
    pub fn cost_for(&self, params: &OperationParams, rounding: RoundingStrategy) -> CreditResult<i64> {
        self.validate(params)?;
        let cost = self.cost.compute(params, rounding)?;
        if cost < 0 {
            return Err(CreditError::invalid_operation(format!(
                "{}: computed a negative cost ({cost})",
                self.name
            )));
        }
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> OperationParams {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn per_unit_rounds_up_by_default() {
        let cost = Cost::per("mb", 1, 10);
        let p = params(json!({"mb": 25}));
        assert_eq!(cost.compute(&p, RoundingStrategy::Ceil).unwrap(), 3);
        assert_eq!(cost.compute(&p, RoundingStrategy::Floor).unwrap(), 2);
    }

    #[test]
    fn costs_compose_with_add() {
        let cost = Cost::fixed(10) + Cost::per("pages", 2, 1) + Cost::custom(|_| 0.5);
        let p = params(json!({"pages": 3}));
        assert_eq!(cost.compute(&p, RoundingStrategy::Ceil).unwrap(), 17);
    }

    #[test]
    fn missing_param_is_invalid_operation() {
        let cost = Cost::per("mb", 1, 1);
        let err = cost.compute(&OperationParams::new(), RoundingStrategy::Ceil).unwrap_err();
        assert!(matches!(err, CreditError::InvalidOperation(_)));
    }

    #[test]
    fn failed_validation_reports_its_message() {
        let op = Operation {
            name: "resize".into(),
            cost: Cost::fixed(1),
            validations: vec![Validation::new("size too large", |p| {
                p.get("size").and_then(Value::as_u64).is_some_and(|s| s <= 100)
            })],
        };

        assert_eq!(op.cost_for(&params(json!({"size": 50})), RoundingStrategy::Ceil).unwrap(), 1);
        let err = op
            .cost_for(&params(json!({"size": 500})), RoundingStrategy::Ceil)
            .unwrap_err();
        assert_eq!(err, CreditError::invalid_operation("resize: size too large"));
    }
}
