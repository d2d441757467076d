#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Implements the [`LoggingConfig`] section.
mod config;
pub use self::config::LoggingConfig;
pub use self::config::flavor::FormatFlavor;
pub use self::config::verbosity::{ParseVerbosityError, Verbosity};

/// Builds and installs the formatted `tracing` layer.
mod fmt;
pub use self::fmt::{init, make_layer};

/// Partly re-exports the public API of `tracing_*` for convenience.
pub use tracing_core::Subscriber;
pub use tracing_subscriber::Registry;
pub use tracing_subscriber::layer::SubscriberExt;
pub use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
