use crate::{HumanDuration, ReconnectBackoff};
use serde::de::{Error, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::Formatter;
use std::time::Duration;
use thiserror::Error;

/// Governs whether and how a lost connection is re-established.
///
/// Immutable once constructed. The reconnect counter that is compared against
/// [`max_attempts`](ReconnectPolicy::max_attempts) is owned by whoever drives
/// the reconnects, not by this policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    enabled: bool,
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
}

/// Governs how many times a single publish is attempted before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishRetryPolicy {
    max_attempts: u32,
}

/// Represents an invalid combination of policy parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// Reconnecting is enabled, but no attempts are allowed.
    #[error("invalid reconnect policy: expected max_attempts >= 1 while enabled, found 0")]
    NoReconnectAttempts,

    /// The reconnect multiplier cannot produce a meaningful schedule.
    #[error("invalid reconnect policy: expected a finite, positive multiplier, found {0}")]
    InvalidMultiplier(f64),

    /// A publish must be attempted at least once.
    #[error("invalid publish retry policy: expected max_attempts >= 1, found 0")]
    NoPublishAttempts,
}

impl ReconnectPolicy {
    /// Creates a new, enabled reconnect policy.
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            enabled: true,
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    /// Creates a policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Re-creates this policy with the given `enabled` flag.
    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    /// Re-creates this policy with the given attempt ceiling.
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// Re-creates this policy with the given base delay.
    pub fn with_base_delay(self, base_delay: Duration) -> Self {
        Self { base_delay, ..self }
    }

    /// Re-creates this policy with the given multiplier.
    pub fn with_multiplier(self, multiplier: f64) -> Self {
        Self { multiplier, ..self }
    }

    /// Checks that this policy describes a usable schedule.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.enabled && self.max_attempts == 0 {
            return Err(PolicyError::NoReconnectAttempts);
        }

        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(PolicyError::InvalidMultiplier(self.multiplier));
        }

        Ok(())
    }
}

impl ReconnectPolicy {
    /// Reports whether reconnecting is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Reports how many consecutive reconnects may be scheduled before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Reports the delay before the first reconnect attempt.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Reports the growth factor between consecutive reconnect delays.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the [`ReconnectBackoff`] schedule described by this policy.
    pub fn backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff::from(self)
    }

    /// Shorthand for computing the delay before the given reconnect
    /// `attempt`, counted from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff().delay(attempt)
    }
}

impl ReconnectPolicy {
    fn default_enabled() -> bool {
        true
    }

    fn default_max_attempts() -> u32 {
        10
    }

    fn default_base_delay() -> Duration {
        Duration::from_secs(1)
    }

    fn default_multiplier() -> f64 {
        2.0
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_attempts: Self::default_max_attempts(),
            base_delay: Self::default_base_delay(),
            multiplier: Self::default_multiplier(),
        }
    }
}

impl PublishRetryPolicy {
    /// Creates a new policy with the given total attempt count (including the
    /// first attempt).
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Reports the total number of attempts per publish.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Checks that this policy allows at least one attempt.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::NoPublishAttempts);
        }

        Ok(())
    }

    fn default_max_attempts() -> u32 {
        3
    }
}

impl Default for PublishRetryPolicy {
    fn default() -> Self {
        Self::new(Self::default_max_attempts())
    }
}

const _: () = {
    impl<'de> Deserialize<'de> for ReconnectPolicy {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(ReconnectPolicyVisitor)
        }
    }

    struct ReconnectPolicyVisitor;

    impl<'de> Visitor<'de> for ReconnectPolicyVisitor {
        type Value = ReconnectPolicy;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("a map of reconnect policy or a boolean")
        }

        fn visit_bool<E>(self, enabled: bool) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(ReconnectPolicy::default().with_enabled(enabled))
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut enabled = None;
            let mut max_attempts = None;
            let mut base_delay = None;
            let mut multiplier = None;

            while let Some(key) = map.next_key()? {
                match key {
                    ReconnectPolicyField::Enabled => enabled = Some(map.next_value()?),
                    ReconnectPolicyField::MaxAttempts => max_attempts = Some(map.next_value()?),
                    ReconnectPolicyField::BaseDelay => {
                        base_delay = Some(map.next_value::<HumanDuration>()?.into())
                    }
                    ReconnectPolicyField::Multiplier => multiplier = Some(map.next_value()?),
                    ReconnectPolicyField::Ignore => {
                        map.next_value::<serde::de::IgnoredAny>()?;
                    }
                }
            }

            let policy = ReconnectPolicy {
                enabled: enabled.unwrap_or_else(ReconnectPolicy::default_enabled),
                max_attempts: max_attempts.unwrap_or_else(ReconnectPolicy::default_max_attempts),
                base_delay: base_delay.unwrap_or_else(ReconnectPolicy::default_base_delay),
                multiplier: multiplier.unwrap_or_else(ReconnectPolicy::default_multiplier),
            };

            policy.validate().map_err(Error::custom)?;

            Ok(policy)
        }
    }

    #[derive(Deserialize)]
    #[serde(field_identifier, rename_all = "snake_case")]
    enum ReconnectPolicyField {
        #[serde(alias = "enable")]
        Enabled,
        #[serde(alias = "attempts", alias = "max_retries")]
        MaxAttempts,
        #[serde(alias = "delay", alias = "initial_delay")]
        BaseDelay,
        #[serde(alias = "factor")]
        Multiplier,
        #[serde(other)]
        Ignore,
    }
};

const _: () = {
    impl<'de> Deserialize<'de> for PublishRetryPolicy {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(PublishRetryPolicyVisitor)
        }
    }

    struct PublishRetryPolicyVisitor;

    impl<'de> Visitor<'de> for PublishRetryPolicyVisitor {
        type Value = PublishRetryPolicy;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("a map of publish retry policy or an attempt count")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            let max_attempts = u32::try_from(value).map_err(Error::custom)?;
            let policy = PublishRetryPolicy::new(max_attempts);

            policy.validate().map_err(Error::custom)?;

            Ok(policy)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            let value = u64::try_from(value).map_err(Error::custom)?;

            self.visit_u64(value)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut max_attempts = None;

            while let Some(key) = map.next_key()? {
                match key {
                    PublishRetryPolicyField::MaxAttempts => max_attempts = Some(map.next_value()?),
                    PublishRetryPolicyField::Ignore => {
                        map.next_value::<serde::de::IgnoredAny>()?;
                    }
                }
            }

            let policy = PublishRetryPolicy::new(
                max_attempts.unwrap_or_else(PublishRetryPolicy::default_max_attempts),
            );

            policy.validate().map_err(Error::custom)?;

            Ok(policy)
        }
    }

    #[derive(Deserialize)]
    #[serde(field_identifier, rename_all = "snake_case")]
    enum PublishRetryPolicyField {
        #[serde(alias = "attempts", alias = "max_retries", alias = "retries")]
        MaxAttempts,
        #[serde(other)]
        Ignore,
    }
};
