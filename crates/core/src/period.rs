//! Fulfillment periods ("1.month", "2.weeks", "monthly", ...).

use core::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CreditError;

/// Calendar unit of a fulfillment period.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Day,
    Week,
    Month,
    Year,
}

impl PeriodUnit {
    fn as_str(self) -> &'static str {
        match self {
            PeriodUnit::Day => "day",
            PeriodUnit::Week => "week",
            PeriodUnit::Month => "month",
            PeriodUnit::Year => "year",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "day" | "days" => Some(Self::Day),
            "week" | "weeks" => Some(Self::Week),
            "month" | "months" => Some(Self::Month),
            "year" | "years" => Some(Self::Year),
            _ => None,
        }
    }
}

/// A recurring cadence, e.g. every 1 month.
///
/// Month/year arithmetic is calendar-aware: Jan 31 + 1 month = Feb 28/29.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FulfillmentPeriod {
    count: u32,
    unit: PeriodUnit,
}

impl FulfillmentPeriod {
    pub fn new(count: u32, unit: PeriodUnit) -> Result<Self, CreditError> {
        if count == 0 {
            return Err(CreditError::invalid_argument("period count must be positive"));
        }
        Ok(Self { count, unit })
    }

    pub fn days(count: u32) -> Result<Self, CreditError> {
        Self::new(count, PeriodUnit::Day)
    }

    pub fn months(count: u32) -> Result<Self, CreditError> {
        Self::new(count, PeriodUnit::Month)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> PeriodUnit {
        self.unit
    }

    /// `from + self`, or `InvalidArgument` when the result is out of range.
    pub fn advance(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, CreditError> {
        let next = match self.unit {
            PeriodUnit::Day => from.checked_add_signed(Duration::days(i64::from(self.count))),
            PeriodUnit::Week => from.checked_add_signed(Duration::weeks(i64::from(self.count))),
            PeriodUnit::Month => from.checked_add_months(Months::new(self.count)),
            PeriodUnit::Year => self
                .count
                .checked_mul(12)
                .and_then(|m| from.checked_add_months(Months::new(m))),
        };
        next.ok_or_else(|| CreditError::invalid_argument(format!("{self} overflows from {from}")))
    }

    /// Reject periods shorter than `minimum`.
    pub fn ensure_at_least(&self, minimum: Duration) -> Result<(), CreditError> {
        let reference = DateTime::<Utc>::UNIX_EPOCH;
        let span = self.advance(reference)? - reference;
        if span < minimum {
            return Err(CreditError::invalid_argument(format!(
                "fulfillment period {self} is shorter than the minimum of {}s",
                minimum.num_seconds()
            )));
        }
        Ok(())
    }
}

impl core::fmt::Display for FulfillmentPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let plural = if self.count == 1 { "" } else { "s" };
        write!(f, "{}.{}{}", self.count, self.unit.as_str(), plural)
    }
}

impl FromStr for FulfillmentPeriod {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let alias = match normalized.as_str() {
            "daily" => Some((1, PeriodUnit::Day)),
            "weekly" => Some((1, PeriodUnit::Week)),
            "monthly" => Some((1, PeriodUnit::Month)),
            "quarterly" => Some((3, PeriodUnit::Month)),
            "yearly" | "annually" => Some((1, PeriodUnit::Year)),
            _ => None,
        };
        if let Some((count, unit)) = alias {
            return Self::new(count, unit);
        }

        let (count, unit) = normalized
            .split_once(['.', ' '])
            .ok_or_else(|| CreditError::invalid_argument(format!("unsupported period: {s}")))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| CreditError::invalid_argument(format!("unsupported period: {s}")))?;
        let unit = PeriodUnit::parse(unit.trim())
            .ok_or_else(|| CreditError::invalid_argument(format!("unsupported period: {s}")))?;
        Self::new(count, unit)
    }
}

impl TryFrom<String> for FulfillmentPeriod {
    type Error = CreditError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FulfillmentPeriod> for String {
    fn from(value: FulfillmentPeriod) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_dotted_and_alias_forms() {
        assert_eq!("1.month".parse::<FulfillmentPeriod>().unwrap(), FulfillmentPeriod::months(1).unwrap());
        assert_eq!("2.weeks".parse::<FulfillmentPeriod>().unwrap().to_string(), "2.weeks");
        assert_eq!("quarterly".parse::<FulfillmentPeriod>().unwrap(), FulfillmentPeriod::months(3).unwrap());
        assert_eq!("7 days".parse::<FulfillmentPeriod>().unwrap(), FulfillmentPeriod::days(7).unwrap());
    }

    #[test]
    fn rejects_unsupported_periods() {
        assert!("0.days".parse::<FulfillmentPeriod>().is_err());
        assert!("1.fortnight".parse::<FulfillmentPeriod>().is_err());
        assert!("month".parse::<FulfillmentPeriod>().is_err());
    }

    #[test]
    fn month_arithmetic_clamps_to_month_end() {
        let jan31 = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let next = FulfillmentPeriod::months(1).unwrap().advance(jan31).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn minimum_period_is_enforced() {
        let daily = FulfillmentPeriod::days(1).unwrap();
        assert!(daily.ensure_at_least(Duration::days(1)).is_ok());
        assert!(daily.ensure_at_least(Duration::days(2)).is_err());
    }

    #[test]
    fn serializes_as_string() {
        let p = FulfillmentPeriod::months(1).unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"1.month\"");
        let back: FulfillmentPeriod = serde_json::from_str("\"1.year\"").unwrap();
        assert_eq!(back.unit(), PeriodUnit::Year);
    }
}
