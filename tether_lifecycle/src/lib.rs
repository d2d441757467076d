#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Implements the one-shot [`Gate`] barrier.
mod gate;
pub use self::gate::Gate;

/// Implements the [`ShutdownHook`].
mod hook;
pub use self::hook::ShutdownHook;
