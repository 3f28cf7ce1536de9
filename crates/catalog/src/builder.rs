//! Explicit catalog builder.
//!
//! Each `plan`/`pack`/`operation` call hands a plain definition struct to a
//! closure by `&mut`; `build` validates everything at once.

use std::collections::{HashMap, HashSet};

use creditforge_core::{CreditError, CreditResult, EngineConfig, FulfillmentPeriod};

use crate::catalog::Catalog;
use crate::operation::{Cost, Operation, OperationParams, Validation};
use crate::pack::CreditPack;
use crate::plan::SubscriptionPlan;

/// Definition of a subscription plan under construction.
#[derive(Debug, Clone, Default)]
pub struct PlanDef {
    name: Option<String>,
    credits_per_period: i64,
    period: Option<String>,
    signup_bonus: i64,
    trial_credits: i64,
    rollover_enabled: bool,
    processor_plan_ids: Vec<String>,
}

impl PlanDef {
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// `credits` every `period` (e.g. `"1.month"`).
    pub fn gives(&mut self, credits: i64, period: impl Into<String>) -> &mut Self {
        self.credits_per_period = credits;
        self.period = Some(period.into());
        self
    }

    pub fn signup_bonus(&mut self, credits: i64) -> &mut Self {
        self.signup_bonus = credits;
        self
    }

    pub fn trial_includes(&mut self, credits: i64) -> &mut Self {
        self.trial_credits = credits;
        self
    }

    /// Unused credits carry over to the next period instead of expiring.
    pub fn rollover(&mut self) -> &mut Self {
        self.rollover_enabled = true;
        self
    }

    pub fn processor_plan_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.processor_plan_ids.push(id.into());
        self
    }

    fn finish(self, id: String, config: &EngineConfig) -> CreditResult<SubscriptionPlan> {
        if self.credits_per_period <= 0 {
            return Err(CreditError::invalid_argument(format!(
                "plan '{id}' must give a positive amount of credits"
            )));
        }
        if self.signup_bonus < 0 || self.trial_credits < 0 {
            return Err(CreditError::invalid_argument(format!(
                "plan '{id}' has a negative bonus or trial amount"
            )));
        }
        let period: FulfillmentPeriod = self
            .period
            .as_deref()
            .ok_or_else(|| CreditError::invalid_argument(format!("plan '{id}' has no period")))?
            .parse()?;
        period.ensure_at_least(config.minimum_fulfillment_period)?;

        Ok(SubscriptionPlan {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            credits_per_period: self.credits_per_period,
            period,
            signup_bonus: self.signup_bonus,
            trial_credits: self.trial_credits,
            rollover_enabled: self.rollover_enabled,
            processor_plan_ids: self.processor_plan_ids,
        })
    }
}

/// Definition of a credit pack under construction.
#[derive(Debug, Clone, Default)]
pub struct PackDef {
    name: Option<String>,
    credits: i64,
    bonus_credits: i64,
    price_cents: i64,
}

impl PackDef {
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn includes(&mut self, credits: i64) -> &mut Self {
        self.credits = credits;
        self
    }

    pub fn bonus(&mut self, credits: i64) -> &mut Self {
        self.bonus_credits = credits;
        self
    }

    pub fn costs_cents(&mut self, cents: i64) -> &mut Self {
        self.price_cents = cents;
        self
    }

    fn finish(self, id: String) -> CreditResult<CreditPack> {
        if self.credits <= 0 {
            return Err(CreditError::invalid_pack(format!(
                "pack '{id}' must include a positive amount of credits"
            )));
        }
        if self.bonus_credits < 0 {
            return Err(CreditError::invalid_pack(format!("pack '{id}' has a negative bonus")));
        }
        if self.price_cents <= 0 {
            return Err(CreditError::invalid_pack(format!("pack '{id}' must have a positive price")));
        }
        Ok(CreditPack {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            credits: self.credits,
            bonus_credits: self.bonus_credits,
            price_cents: self.price_cents,
        })
    }
}

/// Definition of an operation under construction.
#[derive(Debug, Clone, Default)]
pub struct OperationDef {
    cost: Option<Cost>,
    validations: Vec<Validation>,
}

impl OperationDef {
    pub fn costs(&mut self, cost: Cost) -> &mut Self {
        self.cost = Some(cost);
        self
    }

    pub fn validate<F>(&mut self, message: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&OperationParams) -> bool + Send + Sync + 'static,
    {
        self.validations.push(Validation::new(message, predicate));
        self
    }

    fn finish(self, name: String) -> CreditResult<Operation> {
        let cost = self.cost.ok_or_else(|| {
            CreditError::invalid_operation(format!("operation '{name}' has no cost"))
        })?;
        if let Cost::Fixed(c) = &cost {
            if *c < 0 {
                return Err(CreditError::invalid_operation(format!(
                    "operation '{name}' has a negative cost"
                )));
            }
        }
        Ok(Operation {
            name,
            cost,
            validations: self.validations,
        })
    }
}

/// Collects definitions; nothing is validated until [`CatalogBuilder::build`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    plans: Vec<(String, PlanDef)>,
    packs: Vec<(String, PackDef)>,
    operations: Vec<(String, OperationDef)>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, id: impl Into<String>, define: impl FnOnce(&mut PlanDef)) -> Self {
        let mut def = PlanDef::default();
        define(&mut def);
        self.plans.push((id.into(), def));
        self
    }

    pub fn pack(mut self, id: impl Into<String>, define: impl FnOnce(&mut PackDef)) -> Self {
        let mut def = PackDef::default();
        define(&mut def);
        self.packs.push((id.into(), def));
        self
    }

    pub fn operation(
        mut self,
        name: impl Into<String>,
        define: impl FnOnce(&mut OperationDef),
    ) -> Self {
        let mut def = OperationDef::default();
        define(&mut def);
        self.operations.push((name.into(), def));
        self
    }

    pub fn build(self, config: &EngineConfig) -> CreditResult<Catalog> {
        let mut plans = HashMap::new();
        let mut processor_ids = HashSet::new();
        for (id, def) in self.plans {
            let plan = def.finish(id.clone(), config)?;
            for pid in &plan.processor_plan_ids {
                if !processor_ids.insert(pid.clone()) {
                    return Err(CreditError::invalid_argument(format!(
                        "processor plan id '{pid}' is used by more than one plan"
                    )));
                }
            }
            if plans.insert(id.clone(), plan).is_some() {
                return Err(CreditError::invalid_argument(format!("duplicate plan '{id}'")));
            }
        }

        let mut packs = HashMap::new();
        for (id, def) in self.packs {
            let pack = def.finish(id.clone())?;
            if packs.insert(id.clone(), pack).is_some() {
                return Err(CreditError::invalid_pack(format!("duplicate pack '{id}'")));
            }
        }

        let mut operations = HashMap::new();
        for (name, def) in self.operations {
            let op = def.finish(name.clone())?;
            if operations.insert(name.clone(), op).is_some() {
                return Err(CreditError::invalid_operation(format!(
                    "duplicate operation '{name}'"
                )));
            }
        }

        Ok(Catalog {
            plans,
            packs,
            operations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn builds_plans_packs_and_operations() {
        let catalog = CatalogBuilder::new()
            .plan("pro", |p| {
                p.name("Pro")
                    .gives(1000, "1.month")
                    .signup_bonus(100)
                    .trial_includes(50)
                    .processor_plan_id("price_pro_monthly");
            })
            .pack("starter", |p| {
                p.includes(1000).bonus(100).costs_cents(4900);
            })
            .operation("send_email", |o| {
                o.costs(Cost::fixed(1));
            })
            .build(&config())
            .unwrap();

        let pro = catalog.plan_for_processor_id("price_pro_monthly").unwrap();
        assert_eq!(pro.id, "pro");
        assert_eq!(pro.credits_per_period, 1000);
        assert!(!pro.rollover_enabled);
        assert_eq!(catalog.require_pack("starter").unwrap().total_credits(), 1100);
        assert!(catalog.operation("send_email").is_some());
    }

    #[test]
    fn unknown_entries_map_to_typed_errors() {
        let catalog = CatalogBuilder::new().build(&config()).unwrap();
        assert!(matches!(catalog.require_plan("x"), Err(CreditError::InvalidOperation(_))));
        assert!(matches!(catalog.require_pack("x"), Err(CreditError::InvalidPack(_))));
        assert!(matches!(catalog.require_operation("x"), Err(CreditError::InvalidOperation(_))));
    }

    #[test]
    fn rejects_periods_below_the_minimum() {
        let config = EngineConfig::builder()
            .with_minimum_fulfillment_period(Duration::days(7))
            .build()
            .unwrap();
        let result = CatalogBuilder::new()
            .plan("fast", |p| {
                p.gives(10, "1.day");
            })
            .build(&config);
        assert!(matches!(result, Err(CreditError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_shared_processor_ids() {
        let result = CatalogBuilder::new()
            .plan("a", |p| {
                p.gives(10, "1.month").processor_plan_id("price_x");
            })
            .plan("b", |p| {
                p.gives(20, "1.month").processor_plan_id("price_x");
            })
            .build(&config());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_packs() {
        let result = CatalogBuilder::new()
            .pack("free", |p| {
                p.includes(100).costs_cents(0);
            })
            .build(&config());
        assert!(matches!(result, Err(CreditError::InvalidPack(_))));
    }

    #[test]
    fn operations_require_a_cost() {
        let result = CatalogBuilder::new().operation("noop", |_| {}).build(&config());
        assert!(matches!(result, Err(CreditError::InvalidOperation(_))));
    }
}
