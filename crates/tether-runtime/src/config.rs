#![forbid(unsafe_code)]

//! Cleanup configuration.
//!
//! Defaults are compiled in; every field can be overridden from the
//! environment:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `TETHER_CLEANUP_RETENTION_MS` | how long an uncommitted record survives |
//! | `TETHER_CLEANUP_SCAN_MS` | delay between timer scans |
//! | `TETHER_CLEANUP_STRATEGY` | `auto`, `finalization` or `timer` |
//! | `TETHER_DISABLE_FINALIZATION` | truthy value makes the capability probe fail |
//!
//! Unparseable values are ignored and the default is kept.

use std::time::Duration;

/// Retention window for an uncommitted tracking record.
pub const DEFAULT_RETENTION: Duration = Duration::from_millis(10_000);

/// Delay between two timer scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(10_000);

/// Which cleanup strategy the registry should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StrategyPreference {
    /// Finalization when the probe succeeds, timer otherwise.
    #[default]
    Auto,
    /// Finalization if supported; falls back to the timer when the probe fails.
    Finalization,
    /// Always use the timer scan.
    Timer,
}

impl StrategyPreference {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "finalization" | "finalizer" | "reclaim" => Some(Self::Finalization),
            "timer" => Some(Self::Timer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    pub retention: Duration,
    pub scan_interval: Duration,
    pub strategy: StrategyPreference,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            strategy: StrategyPreference::Auto,
        }
    }
}

impl CleanupConfig {
    /// Read overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Read overrides through a custom lookup.
    #[must_use]
    pub fn from_env_with<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = get_env("TETHER_CLEANUP_RETENTION_MS").and_then(|v| parse_millis(&v)) {
            config.retention = ms;
        }
        if let Some(ms) = get_env("TETHER_CLEANUP_SCAN_MS").and_then(|v| parse_millis(&v)) {
            config.scan_interval = ms;
        }
        if let Some(strategy) =
            get_env("TETHER_CLEANUP_STRATEGY").and_then(|v| StrategyPreference::parse(&v))
        {
            config.strategy = strategy;
        }
        config
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = scan_interval;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyPreference) -> Self {
        self.strategy = strategy;
        self
    }
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

pub(crate) fn env_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1"
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("on")
}

/// Whether reclaim-on-drop finalization is available, using a custom
/// environment lookup.
pub fn finalization_supported_with<F>(get_env: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    !get_env("TETHER_DISABLE_FINALIZATION").is_some_and(|v| env_flag(&v))
}

/// Whether reclaim-on-drop finalization is available in this process.
#[must_use]
pub fn finalization_supported() -> bool {
    finalization_supported_with(|key| std::env::var(key).ok())
}
