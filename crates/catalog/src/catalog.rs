use std::collections::HashMap;

use creditforge_core::{CreditError, CreditResult};

use crate::operation::Operation;
use crate::pack::CreditPack;
use crate::plan::SubscriptionPlan;

/// Read-only catalog produced by [`crate::CatalogBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub(crate) plans: HashMap<String, SubscriptionPlan>,
    pub(crate) packs: HashMap<String, CreditPack>,
    pub(crate) operations: HashMap<String, Operation>,
}

impl Catalog {
    pub fn plan(&self, id: &str) -> Option<&SubscriptionPlan> {
        self.plans.get(id)
    }

    /// Resolve a plan by the payment processor's price id.
    pub fn plan_for_processor_id(&self, processor_plan_id: &str) -> Option<&SubscriptionPlan> {
        self.plans
            .values()
            .find(|p| p.matches_processor_id(processor_plan_id))
    }

    pub fn pack(&self, id: &str) -> Option<&CreditPack> {
        self.packs.get(id)
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn require_plan(&self, id: &str) -> CreditResult<&SubscriptionPlan> {
        self.plan(id)
            .ok_or_else(|| CreditError::invalid_operation(format!("unknown plan '{id}'")))
    }

    pub fn require_pack(&self, id: &str) -> CreditResult<&CreditPack> {
        self.pack(id)
            .ok_or_else(|| CreditError::invalid_pack(format!("unknown pack '{id}'")))
    }

    pub fn require_operation(&self, name: &str) -> CreditResult<&Operation> {
        self.operation(name)
            .ok_or_else(|| CreditError::invalid_operation(format!("unknown operation '{name}'")))
    }

    pub fn plans(&self) -> impl Iterator<Item = &SubscriptionPlan> {
        self.plans.values()
    }

    pub fn packs(&self) -> impl Iterator<Item = &CreditPack> {
        self.packs.values()
    }
}
