use serde::Deserialize;

/// Selects the [event formatter](tracing_subscriber::fmt::format::Format)
/// of the formatted layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFlavor {
    /// The default single-line [`Full`](tracing_subscriber::fmt::format::Full)
    /// formatting.
    #[default]
    #[serde(alias = "default")]
    Full,

    /// The shorter single-line
    /// [`Compact`](tracing_subscriber::fmt::format::Compact) formatting.
    Compact,

    /// The multi-line [`Pretty`](tracing_subscriber::fmt::format::Pretty)
    /// formatting.
    Pretty,

    /// The newline-delimited [`Json`](tracing_subscriber::fmt::format::Json)
    /// formatting.
    #[cfg(feature = "json")]
    Json,
}
