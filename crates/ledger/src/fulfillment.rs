//! Fulfillment records: one credit-granting contract per billing source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditforge_core::{
    CreditError, CreditResult, Entity, FulfillmentId, FulfillmentPeriod, SourceRef, WalletId,
};

/// Stop reason recorded when a subscription moves to a plan without credits.
pub const STOP_DOWNGRADE_TO_NON_CREDIT_PLAN: &str = "downgrade_to_non_credit_plan";
/// Stop reason recorded when a subscription is canceled.
pub const STOP_SUBSCRIPTION_CANCELED: &str = "subscription_canceled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    Subscription,
    CreditPack,
    Manual,
}

/// Subscription contract state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFulfillmentMeta {
    /// Catalog id of the plan currently in force.
    pub plan: String,
    pub subscription_id: String,
    /// Plan to switch to on the next renewal (scheduled downgrade).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_plan_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_change_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<String>,
}

impl SubscriptionFulfillmentMeta {
    pub fn new(plan: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            subscription_id: subscription_id.into(),
            pending_plan_change: None,
            plan_change_at: None,
            stopped_reason: None,
        }
    }

    pub fn clear_pending_change(&mut self) {
        self.pending_plan_change = None;
        self.plan_change_at = None;
    }
}

/// Pack purchase state (tracks refunds so partial refunds add up exactly).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackFulfillmentMeta {
    pub pack: String,
    pub charge_id: String,
    pub credits_granted: i64,
    #[serde(default)]
    pub refunded_credits: i64,
    #[serde(default)]
    pub amount_refunded_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FulfillmentMeta {
    Subscription(SubscriptionFulfillmentMeta),
    CreditPack(PackFulfillmentMeta),
    Manual { note: Option<String> },
}

/// Lifecycle position of a fulfillment at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentState {
    /// Recurring, with no stop scheduled.
    ActiveRecurring,
    /// Recurring, with a stop scheduled in the future.
    Stopping,
    /// Stop time reached.
    Stopped,
    /// Non-recurring grant (pack purchase, manual).
    OneShot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub id: FulfillmentId,
    pub wallet_id: WalletId,
    pub source: SourceRef,
    pub fulfillment_type: FulfillmentType,
    pub credits_last_fulfillment: i64,
    pub period: Option<FulfillmentPeriod>,
    pub last_fulfilled_at: Option<DateTime<Utc>>,
    pub next_fulfillment_at: Option<DateTime<Utc>>,
    pub stops_at: Option<DateTime<Utc>>,
    pub metadata: FulfillmentMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fulfillment {
    /// A recurring subscription contract that was just fulfilled at `fulfilled_at`.
    pub fn subscription(
        wallet_id: WalletId,
        source: SourceRef,
        period: FulfillmentPeriod,
        credits: i64,
        fulfilled_at: DateTime<Utc>,
        next_fulfillment_at: DateTime<Utc>,
        metadata: SubscriptionFulfillmentMeta,
    ) -> CreditResult<Self> {
        let fulfillment = Self {
            id: FulfillmentId::new(),
            wallet_id,
            source,
            fulfillment_type: FulfillmentType::Subscription,
            credits_last_fulfillment: credits,
            period: Some(period),
            last_fulfilled_at: Some(fulfilled_at),
            next_fulfillment_at: Some(next_fulfillment_at),
            stops_at: None,
            metadata: FulfillmentMeta::Subscription(metadata),
            created_at: fulfilled_at,
            updated_at: fulfilled_at,
        };
        fulfillment.validate()?;
        Ok(fulfillment)
    }

    /// A non-recurring pack purchase that was fulfilled at `fulfilled_at`.
    pub fn credit_pack(
        wallet_id: WalletId,
        source: SourceRef,
        fulfilled_at: DateTime<Utc>,
        metadata: PackFulfillmentMeta,
    ) -> CreditResult<Self> {
        let fulfillment = Self {
            id: FulfillmentId::new(),
            wallet_id,
            source,
            fulfillment_type: FulfillmentType::CreditPack,
            credits_last_fulfillment: metadata.credits_granted,
            period: None,
            last_fulfilled_at: Some(fulfilled_at),
            next_fulfillment_at: None,
            stops_at: None,
            metadata: FulfillmentMeta::CreditPack(metadata),
            created_at: fulfilled_at,
            updated_at: fulfilled_at,
        };
        fulfillment.validate()?;
        Ok(fulfillment)
    }

    /// An administrative recurring grant of `credits`, first due at `starts_at`.
    pub fn manual(
        wallet_id: WalletId,
        source: SourceRef,
        period: FulfillmentPeriod,
        credits: i64,
        starts_at: DateTime<Utc>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> CreditResult<Self> {
        if credits <= 0 {
            return Err(CreditError::invalid_argument(format!(
                "recurring grant must be positive, got {credits}"
            )));
        }
        let fulfillment = Self {
            id: FulfillmentId::new(),
            wallet_id,
            source,
            fulfillment_type: FulfillmentType::Manual,
            credits_last_fulfillment: credits,
            period: Some(period),
            last_fulfilled_at: None,
            next_fulfillment_at: Some(starts_at),
            stops_at: None,
            metadata: FulfillmentMeta::Manual { note },
            created_at: now,
            updated_at: now,
        };
        fulfillment.validate()?;
        Ok(fulfillment)
    }

    pub fn is_recurring(&self) -> bool {
        self.period.is_some()
    }

    pub fn is_stopped(&self, now: DateTime<Utc>) -> bool {
        self.stops_at.is_some_and(|at| at <= now)
    }

    /// Scheduled, not stopped, not already fulfilled for this slot, and due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let Some(next) = self.next_fulfillment_at else {
            return false;
        };
        if self.is_stopped(now) {
            return false;
        }
        if self.last_fulfilled_at.is_some_and(|last| next <= last) {
            return false;
        }
        next <= now
    }

    pub fn state(&self, now: DateTime<Utc>) -> FulfillmentState {
        if !self.is_recurring() {
            FulfillmentState::OneShot
        } else if self.is_stopped(now) {
            FulfillmentState::Stopped
        } else if self.stops_at.is_some() {
            FulfillmentState::Stopping
        } else {
            FulfillmentState::ActiveRecurring
        }
    }

    /// Next slot after a fulfillment at `now`.
    ///
    /// Extends the current schedule while it is still ahead of `now`; once it
    /// has fallen behind, re-anchors on `now` so missed slots are skipped
    /// rather than granted back-to-back.
    pub fn calculate_next_fulfillment(
        &self,
        now: DateTime<Utc>,
    ) -> CreditResult<Option<DateTime<Utc>>> {
        let Some(period) = self.period else {
            return Ok(None);
        };
        let base = match self.next_fulfillment_at {
            Some(next) if next > now => next,
            _ => now,
        };
        period.advance(base).map(Some)
    }

    /// Record a grant of `credits` at `now` and move the schedule forward.
    pub fn mark_fulfilled(&mut self, credits: i64, now: DateTime<Utc>) -> CreditResult<()> {
        let next = self.calculate_next_fulfillment(now)?;
        self.last_fulfilled_at = Some(now);
        self.credits_last_fulfillment = credits;
        self.next_fulfillment_at = next;
        self.updated_at = now;
        self.validate()
    }

    /// Stop granting at `at`, keeping the record (and every granted credit).
    pub fn schedule_stop(&mut self, at: DateTime<Utc>, reason: &str, now: DateTime<Utc>) {
        self.stops_at = Some(at);
        if let FulfillmentMeta::Subscription(meta) = &mut self.metadata {
            meta.stopped_reason = Some(reason.to_string());
        }
        self.updated_at = now;
    }

    /// Clear any stop and resume the schedule at `next_fulfillment_at`.
    pub fn reactivate(&mut self, next_fulfillment_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.stops_at = None;
        if let FulfillmentMeta::Subscription(meta) = &mut self.metadata {
            meta.stopped_reason = None;
        }
        self.next_fulfillment_at = Some(next_fulfillment_at);
        self.updated_at = now;
    }

    pub fn subscription_meta(&self) -> Option<&SubscriptionFulfillmentMeta> {
        match &self.metadata {
            FulfillmentMeta::Subscription(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn subscription_meta_mut(&mut self) -> Option<&mut SubscriptionFulfillmentMeta> {
        match &mut self.metadata {
            FulfillmentMeta::Subscription(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn pack_meta(&self) -> Option<&PackFulfillmentMeta> {
        match &self.metadata {
            FulfillmentMeta::CreditPack(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn pack_meta_mut(&mut self) -> Option<&mut PackFulfillmentMeta> {
        match &mut self.metadata {
            FulfillmentMeta::CreditPack(meta) => Some(meta),
            _ => None,
        }
    }

    /// Schedule invariants.
    pub fn validate(&self) -> CreditResult<()> {
        match (self.is_recurring(), self.next_fulfillment_at) {
            (true, None) => {
                return Err(CreditError::invalid_argument(
                    "recurring fulfillment requires next_fulfillment_at",
                ));
            }
            (false, Some(_)) => {
                return Err(CreditError::invalid_argument(
                    "non-recurring fulfillment cannot have next_fulfillment_at",
                ));
            }
            _ => {}
        }
        if let (Some(next), Some(last)) = (self.next_fulfillment_at, self.last_fulfilled_at) {
            if next <= last {
                return Err(CreditError::invalid_argument(format!(
                    "next_fulfillment_at {next} must be after last_fulfilled_at {last}"
                )));
            }
        }
        if self.credits_last_fulfillment < 0 {
            return Err(CreditError::invalid_argument("credits_last_fulfillment is negative"));
        }
        Ok(())
    }
}

impl Entity for Fulfillment {
    type Id = FulfillmentId;

    fn id(&self) -> FulfillmentId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn weekly(fulfilled_at: DateTime<Utc>) -> Fulfillment {
        Fulfillment::subscription(
            WalletId::new(),
            SourceRef::subscription("sub_1"),
            "1.week".parse().unwrap(),
            100,
            fulfilled_at,
            fulfilled_at + Duration::weeks(1),
            SubscriptionFulfillmentMeta::new("basic", "sub_1"),
        )
        .unwrap()
    }

    #[test]
    fn due_only_once_the_slot_arrives() {
        let f = weekly(t(1));
        assert!(!f.is_due(t(7)));
        assert!(f.is_due(t(8)));
        assert!(f.is_due(t(20)));
    }

    #[test]
    fn stopped_records_are_never_due() {
        let mut f = weekly(t(1));
        f.schedule_stop(t(5), STOP_SUBSCRIPTION_CANCELED, t(2));
        assert_eq!(f.state(t(3)), FulfillmentState::Stopping);
        assert_eq!(f.state(t(5)), FulfillmentState::Stopped);
        assert!(!f.is_due(t(9)));
    }

    #[test]
    fn next_slot_extends_schedule_when_still_ahead() {
        let f = weekly(t(1));
        // Scheduled for Jan 8, evaluated on Jan 3: extend from the schedule.
        assert_eq!(f.calculate_next_fulfillment(t(3)).unwrap(), Some(t(15)));
    }

    #[test]
    fn next_slot_reanchors_on_now_after_an_outage() {
        let mut f = weekly(t(1));
        // Missed the Jan 8 and Jan 15 slots; processed once on Jan 20.
        f.mark_fulfilled(100, t(20)).unwrap();
        assert_eq!(f.next_fulfillment_at, Some(t(27)));
        assert!(!f.is_due(t(26)));
    }

    #[test]
    fn reactivation_clears_stop() {
        let mut f = weekly(t(1));
        f.schedule_stop(t(5), STOP_DOWNGRADE_TO_NON_CREDIT_PLAN, t(2));
        f.reactivate(t(12), t(10));
        assert_eq!(f.state(t(10)), FulfillmentState::ActiveRecurring);
        assert_eq!(f.subscription_meta().unwrap().stopped_reason, None);
        assert!(f.is_due(t(12)));
    }

    #[test]
    fn pack_fulfillments_are_one_shot() {
        let f = Fulfillment::credit_pack(
            WalletId::new(),
            SourceRef::charge("ch_1"),
            t(1),
            PackFulfillmentMeta {
                pack: "starter".into(),
                charge_id: "ch_1".into(),
                credits_granted: 1000,
                refunded_credits: 0,
                amount_refunded_cents: 0,
            },
        )
        .unwrap();
        assert_eq!(f.state(t(2)), FulfillmentState::OneShot);
        assert!(!f.is_due(t(30)));
        assert_eq!(f.calculate_next_fulfillment(t(2)).unwrap(), None);
    }

    #[test]
    fn manual_grants_are_due_from_their_start() {
        let f = Fulfillment::manual(
            WalletId::new(),
            SourceRef::manual("comp_1"),
            "1.week".parse().unwrap(),
            25,
            t(3),
            Some("beta tester".into()),
            t(1),
        )
        .unwrap();
        assert_eq!(f.fulfillment_type, FulfillmentType::Manual);
        assert_eq!(f.state(t(1)), FulfillmentState::ActiveRecurring);
        assert!(!f.is_due(t(2)));
        assert!(f.is_due(t(3)));

        let zero = Fulfillment::manual(
            WalletId::new(),
            SourceRef::manual("comp_2"),
            "1.week".parse().unwrap(),
            0,
            t(3),
            None,
            t(1),
        );
        assert!(zero.is_err());
    }

    #[test]
    fn schedule_invariants_are_checked() {
        let mut f = weekly(t(1));
        f.next_fulfillment_at = None;
        assert!(f.validate().is_err());

        let mut f = weekly(t(1));
        f.next_fulfillment_at = Some(t(1));
        assert!(f.validate().is_err());
    }

    #[test]
    fn metadata_is_tagged_when_serialized() {
        let f = weekly(t(1));
        let json = serde_json::to_value(&f.metadata).unwrap();
        assert_eq!(json["kind"], "subscription");
        assert_eq!(json["plan"], "basic");
    }
}
