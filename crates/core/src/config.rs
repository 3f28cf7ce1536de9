//! Engine configuration (constructed once at startup, shared by reference).

use chrono::Duration;

use crate::error::CreditError;
use crate::rounding::RoundingStrategy;

/// Process-wide engine settings.
///
/// Build with [`EngineConfig::builder`] or [`EngineConfig::from_env`] and share
/// as `Arc<EngineConfig>` with every component that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How fractional costs and refunds are rounded.
    pub rounding: RoundingStrategy,
    /// Buffer added to computed expirations so scheduling jitter never expires credits early.
    pub fulfillment_grace_period: Duration,
    /// Shortest fulfillment period a plan may declare.
    pub minimum_fulfillment_period: Duration,
    /// Whether deductions may take a wallet below zero.
    pub allow_negative_balance: bool,
    /// Balance at or below which a low-balance notification fires.
    pub low_balance_threshold: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rounding: RoundingStrategy::Ceil,
            fulfillment_grace_period: Duration::minutes(5),
            minimum_fulfillment_period: Duration::days(1),
            allow_negative_balance: false,
            low_balance_threshold: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load from `CREDITFORGE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, CreditError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CreditError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(v) = lookup("CREDITFORGE_ROUNDING") {
            builder = builder.with_rounding(v.parse()?);
        }
        if let Some(v) = lookup("CREDITFORGE_GRACE_PERIOD_SECS") {
            builder = builder.with_grace_period(parse_secs("CREDITFORGE_GRACE_PERIOD_SECS", &v)?);
        }
        if let Some(v) = lookup("CREDITFORGE_MIN_FULFILLMENT_PERIOD_SECS") {
            builder = builder.with_minimum_fulfillment_period(parse_secs(
                "CREDITFORGE_MIN_FULFILLMENT_PERIOD_SECS",
                &v,
            )?);
        }
        if let Some(v) = lookup("CREDITFORGE_ALLOW_NEGATIVE_BALANCE") {
            builder = builder.allow_negative_balance(parse_bool(
                "CREDITFORGE_ALLOW_NEGATIVE_BALANCE",
                &v,
            )?);
        }
        if let Some(v) = lookup("CREDITFORGE_LOW_BALANCE_THRESHOLD") {
            builder = builder.with_low_balance_threshold(parse_i64(
                "CREDITFORGE_LOW_BALANCE_THRESHOLD",
                &v,
            )?);
        }

        builder.build()
    }

    /// True when `balance` is at or below the configured threshold.
    pub fn is_low_balance(&self, balance: i64) -> bool {
        self.low_balance_threshold
            .is_some_and(|threshold| balance <= threshold)
    }
}

fn parse_i64(key: &str, raw: &str) -> Result<i64, CreditError> {
    raw.trim()
        .parse()
        .map_err(|_| CreditError::invalid_argument(format!("{key}: expected an integer, got {raw:?}")))
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, CreditError> {
    let secs = parse_i64(key, raw)?;
    Duration::try_seconds(secs)
        .ok_or_else(|| CreditError::invalid_argument(format!("{key}: {secs} seconds is out of range")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, CreditError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CreditError::invalid_argument(format!(
            "{key}: expected a boolean, got {raw:?}"
        ))),
    }
}

/// Builder for [`EngineConfig`]; `build` validates the combination.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn with_rounding(mut self, rounding: RoundingStrategy) -> Self {
        self.config.rounding = rounding;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.config.fulfillment_grace_period = grace;
        self
    }

    pub fn with_minimum_fulfillment_period(mut self, minimum: Duration) -> Self {
        self.config.minimum_fulfillment_period = minimum;
        self
    }

    pub fn allow_negative_balance(mut self, allow: bool) -> Self {
        self.config.allow_negative_balance = allow;
        self
    }

    pub fn with_low_balance_threshold(mut self, threshold: i64) -> Self {
        self.config.low_balance_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Result<EngineConfig, CreditError> {
        let config = self.config;
        if config.fulfillment_grace_period < Duration::zero() {
            return Err(CreditError::invalid_argument("grace period must not be negative"));
        }
        if config.minimum_fulfillment_period <= Duration::zero() {
            return Err(CreditError::invalid_argument(
                "minimum fulfillment period must be positive",
            ));
        }
        if config.low_balance_threshold.is_some_and(|t| t < 0) {
            return Err(CreditError::invalid_argument(
                "low balance threshold must not be negative",
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.rounding, RoundingStrategy::Ceil);
        assert_eq!(config.fulfillment_grace_period, Duration::minutes(5));
        assert_eq!(config.minimum_fulfillment_period, Duration::days(1));
        assert!(!config.allow_negative_balance);
        assert_eq!(config.low_balance_threshold, None);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CREDITFORGE_ROUNDING", "floor"),
            ("CREDITFORGE_GRACE_PERIOD_SECS", "60"),
            ("CREDITFORGE_ALLOW_NEGATIVE_BALANCE", "yes"),
            ("CREDITFORGE_LOW_BALANCE_THRESHOLD", "50"),
        ]);
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.rounding, RoundingStrategy::Floor);
        assert_eq!(config.fulfillment_grace_period, Duration::seconds(60));
        assert!(config.allow_negative_balance);
        assert_eq!(config.low_balance_threshold, Some(50));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_bool = EngineConfig::from_lookup(|k| {
            (k == "CREDITFORGE_ALLOW_NEGATIVE_BALANCE").then(|| "maybe".to_string())
        });
        assert!(matches!(bad_bool, Err(CreditError::InvalidArgument(_))));

        let negative_grace = EngineConfig::builder()
            .with_grace_period(Duration::seconds(-1))
            .build();
        assert!(negative_grace.is_err());

        let zero_minimum = EngineConfig::builder()
            .with_minimum_fulfillment_period(Duration::zero())
            .build();
        assert!(zero_minimum.is_err());
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        for key in ["CREDITFORGE_GRACE_PERIOD_SECS", "CREDITFORGE_MIN_FULFILLMENT_PERIOD_SECS"] {
            let result = EngineConfig::from_lookup(|k| (k == key).then(|| i64::MAX.to_string()));
            assert!(matches!(result, Err(CreditError::InvalidArgument(_))), "{key}");
        }
    }

    #[test]
    fn low_balance_is_inclusive() {
        let config = EngineConfig::builder()
            .with_low_balance_threshold(10)
            .build()
            .unwrap();
        assert!(config.is_low_balance(10));
        assert!(!config.is_low_balance(11));
    }
}
