use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use creditforge_core::{CreditResult, FulfillmentPeriod};

/// A recurring plan that grants credits every period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub credits_per_period: i64,
    pub period: FulfillmentPeriod,
    /// One-time credits granted when the subscription first becomes active.
    pub signup_bonus: i64,
    /// Credits granted while trialing; they expire when the trial ends.
    pub trial_credits: i64,
    /// Unused period credits never expire when true.
    pub rollover_enabled: bool,
    /// Price ids the payment processor uses for this plan.
    pub processor_plan_ids: Vec<String>,
}

impl SubscriptionPlan {
    /// Expiration for credits granted at `granted_at`: none for rollover plans,
    /// otherwise one period later plus the grace buffer.
    pub fn credit_expiration(
        &self,
        granted_at: DateTime<Utc>,
        grace: Duration,
    ) -> CreditResult<Option<DateTime<Utc>>> {
        if self.rollover_enabled {
            return Ok(None);
        }
        Ok(Some(self.period.advance(granted_at)? + grace))
    }

    pub fn matches_processor_id(&self, processor_plan_id: &str) -> bool {
        self.processor_plan_ids.iter().any(|p| p == processor_plan_id)
    }
}
