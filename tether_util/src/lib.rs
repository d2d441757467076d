#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Implements the two delay schedules and the policies that parameterize them.
mod backoff {
    pub mod delay;
    pub mod policy;
}
pub use self::backoff::delay::{ReconnectBackoff, publish_retry_delay};
pub use self::backoff::policy::{PolicyError, PublishRetryPolicy, ReconnectPolicy};

/// Implements human-friendly deserialization of [`Duration`](std::time::Duration)s.
mod duration;
pub use self::duration::HumanDuration;
