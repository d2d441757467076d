use crate::{FormatFlavor, Verbosity};
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt::Formatter;

pub mod flavor;
pub mod verbosity;

/// Configures the formatted console layer: how verbose it is, how each line
/// looks, and which targets get a verbosity of their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    verbosity: Verbosity,
    flavor: FormatFlavor,
    color: bool,
    show_timestamp: bool,
    show_target: bool,
    show_file: bool,
    show_line_number: bool,
    show_level: bool,
    show_thread_id: bool,
    targets: BTreeMap<String, Verbosity>,
}

impl LoggingConfig {
    /// Replaces the root verbosity.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Replaces the output flavor.
    pub fn with_flavor(mut self, flavor: FormatFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Enables or disables ANSI colors.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Overrides the verbosity of a single target (a module path prefix).
    pub fn with_target(mut self, target: impl Into<String>, verbosity: impl Into<Verbosity>) -> Self {
        self.targets.insert(target.into(), verbosity.into());
        self
    }

    /// Overrides the verbosity of several targets at once.
    pub fn with_targets<T, V>(mut self, targets: impl IntoIterator<Item = (T, V)>) -> Self
    where
        T: Into<String>,
        V: Into<Verbosity>,
    {
        self.targets.extend(
            targets
                .into_iter()
                .map(|(target, verbosity)| (target.into(), verbosity.into())),
        );
        self
    }
}

impl LoggingConfig {
    /// Reports the root verbosity, applied to every target without an
    /// override.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Reports the output flavor.
    pub fn flavor(&self) -> FormatFlavor {
        self.flavor
    }

    /// Reports whether the output is colored. JSON output never is.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Reports whether each line starts with a timestamp.
    pub fn show_timestamp(&self) -> bool {
        self.show_timestamp
    }

    /// Reports whether each line shows its target.
    pub fn show_target(&self) -> bool {
        self.show_target
    }

    /// Reports whether each line shows its source file.
    pub fn show_file(&self) -> bool {
        self.show_file
    }

    /// Reports whether each line shows its source line number.
    pub fn show_line_number(&self) -> bool {
        self.show_line_number
    }

    /// Reports whether each line shows its level.
    pub fn show_level(&self) -> bool {
        self.show_level
    }

    /// Reports whether each line shows the ID of the thread it was emitted on.
    pub fn show_thread_id(&self) -> bool {
        self.show_thread_id
    }

    /// Exposes the per-target verbosity overrides.
    pub fn targets(&self) -> &BTreeMap<String, Verbosity> {
        &self.targets
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            flavor: FormatFlavor::default(),
            color: Self::default_color(),
            show_timestamp: Self::default_show_timestamp(),
            show_target: Self::default_show_target(),
            show_file: Self::default_show_file(),
            show_line_number: Self::default_show_line_number(),
            show_level: Self::default_show_level(),
            show_thread_id: Self::default_show_thread_id(),
            targets: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    fn default_color() -> bool {
        true
    }

    fn default_show_timestamp() -> bool {
        true
    }

    fn default_show_target() -> bool {
        true
    }

    fn default_show_file() -> bool {
        false
    }

    fn default_show_line_number() -> bool {
        false
    }

    fn default_show_level() -> bool {
        true
    }

    fn default_show_thread_id() -> bool {
        false
    }
}

impl AsRef<LoggingConfig> for LoggingConfig {
    fn as_ref(&self) -> &LoggingConfig {
        self
    }
}

const _: () = {
    impl<'de> Deserialize<'de> for LoggingConfig {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_map(LoggingConfigVisitor)
        }
    }

    struct LoggingConfigVisitor;

    impl<'de> Visitor<'de> for LoggingConfigVisitor {
        type Value = LoggingConfig;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("a map of logging configuration")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut config = LoggingConfig::default();

            while let Some(key) = map.next_key()? {
                match key {
                    LoggingConfigField::Verbosity => config.verbosity = map.next_value()?,
                    LoggingConfigField::Flavor => config.flavor = map.next_value()?,
                    LoggingConfigField::Color => config.color = map.next_value()?,
                    LoggingConfigField::ShowTimestamp => config.show_timestamp = map.next_value()?,
                    LoggingConfigField::ShowTarget => config.show_target = map.next_value()?,
                    LoggingConfigField::ShowFile => config.show_file = map.next_value()?,
                    LoggingConfigField::ShowLineNumber => {
                        config.show_line_number = map.next_value()?
                    }
                    LoggingConfigField::ShowLevel => config.show_level = map.next_value()?,
                    LoggingConfigField::ShowThreadId => config.show_thread_id = map.next_value()?,
                    LoggingConfigField::Targets => {
                        let targets: BTreeMap<String, Verbosity> = map.next_value()?;
                        config.targets.extend(targets);
                    }
                    LoggingConfigField::Ignore => {
                        map.next_value::<IgnoredAny>()?;
                    }
                }
            }

            Ok(config)
        }
    }

    #[derive(Deserialize)]
    #[serde(field_identifier, rename_all = "snake_case")]
    enum LoggingConfigField {
        #[serde(alias = "level")]
        Verbosity,
        #[serde(alias = "flavour", alias = "format")]
        Flavor,
        #[serde(alias = "colour", alias = "with_color", alias = "show_color")]
        Color,
        #[serde(alias = "with_timestamp")]
        ShowTimestamp,
        #[serde(alias = "with_target")]
        ShowTarget,
        #[serde(alias = "with_file")]
        ShowFile,
        #[serde(alias = "show_line", alias = "with_line_number")]
        ShowLineNumber,
        #[serde(alias = "with_level")]
        ShowLevel,
        #[serde(alias = "with_thread_id", alias = "show_thread_ids")]
        ShowThreadId,
        #[serde(alias = "target_verbosity")]
        Targets,
        #[serde(other)]
        Ignore,
    }
};
