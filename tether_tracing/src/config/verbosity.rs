use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing_core::LevelFilter;

/// A deserializable stand-in for the `tracing` crate’s [`LevelFilter`].
///
/// A level is “higher” when it is more verbose: [`Trace`](Verbosity::Trace)
/// is the highest, [`Off`](Verbosity::Off) the lowest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verbosity {
    /// Log nothing.
    Off,

    /// Log at level [`ERROR`](tracing_core::Level::ERROR) only.
    Error,

    /// Log at level [`WARN`](tracing_core::Level::WARN) and lower.
    Warn,

    /// Log at level [`INFO`](tracing_core::Level::INFO) and lower.
    #[default]
    Info,

    /// Log at level [`DEBUG`](tracing_core::Level::DEBUG) and lower.
    Debug,

    /// Log everything.
    Trace,
}

impl Verbosity {
    /// Reports the canonical lowercase name of this level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Translates this level into the `tracing` crate’s [`LevelFilter`].
    pub fn to_level_filter(&self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

impl From<Verbosity> for LevelFilter {
    fn from(value: Verbosity) -> Self {
        value.to_level_filter()
    }
}

impl From<&Verbosity> for LevelFilter {
    fn from(value: &Verbosity) -> Self {
        value.to_level_filter()
    }
}

impl Display for Verbosity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents an unrecognized verbosity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVerbosityError(String);

impl Display for ParseVerbosityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown verbosity '{}', expected one of: off, error, warn, info, debug, trace",
            self.0,
        )
    }
}

impl std::error::Error for ParseVerbosityError {}

impl FromStr for Verbosity {
    type Err = ParseVerbosityError;

    /// Matches case-insensitively, and accepts a few common aliases.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let matches = |candidates: &[&str]| {
            candidates
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(trimmed))
        };

        if matches(&["off", "no", "none"]) {
            Ok(Self::Off)
        } else if matches(&["error", "err"]) {
            Ok(Self::Error)
        } else if matches(&["warn", "warning"]) {
            Ok(Self::Warn)
        } else if matches(&["info"]) {
            Ok(Self::Info)
        } else if matches(&["debug"]) {
            Ok(Self::Debug)
        } else if matches(&["trace", "all"]) {
            Ok(Self::Trace)
        } else {
            Err(ParseVerbosityError(trimmed.to_string()))
        }
    }
}

const _: () = {
    impl<'de> Deserialize<'de> for Verbosity {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(VerbosityVisitor)
        }
    }

    struct VerbosityVisitor;

    impl<'de> Visitor<'de> for VerbosityVisitor {
        type Value = Verbosity;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("a verbosity level name")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: Error,
        {
            value.parse().map_err(E::custom)
        }

        // YAML reads a bare `off` or `no` as a boolean
        fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
        where
            E: Error,
        {
            match value {
                false => Ok(Verbosity::Off),
                true => Err(E::custom("expected a verbosity level name, not `true`")),
            }
        }
    }
};
