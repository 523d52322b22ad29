//! Process-level settings read from the environment
//!
//! Everything here is read once and carried as plain data; nothing in the
//! engine re-reads environment variables at execution time.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

/// Behavior on `full_key` registration collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    /// Overwrite the existing record and log a warning.
    #[default]
    Warn,
    /// Fail the registration.
    Error,
    /// Keep the existing record; the new one is dropped.
    Ignore,
}

impl ConflictMode {
    fn parse(raw: &str) -> ConflictMode {
        match raw.to_ascii_lowercase().as_str() {
            "error" => ConflictMode::Error,
            "ignore" => ConflictMode::Ignore,
            _ => ConflictMode::Warn,
        }
    }
}

/// Input-style validation applied before each method invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputStyle {
    /// Reject a lone list argument bound to a non-collection parameter.
    #[default]
    StrictSingle,
    /// No validation.
    AllowList,
    /// The first bound argument must be a list.
    EnforceList,
}

impl InputStyle {
    fn parse(raw: &str) -> InputStyle {
        match raw.to_ascii_lowercase().as_str() {
            "allow_list" => InputStyle::AllowList,
            "enforce_list" => InputStyle::EnforceList,
            _ => InputStyle::StrictSingle,
        }
    }
}

/// Engine settings sourced from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `REGISTRY_CONFLICT`: warn | error | ignore.
    pub conflict_mode: ConflictMode,
    /// `REGISTRY_LAZY`: deferred engine binding enabled.
    pub lazy_enabled: bool,
    /// `COMPONENT_BASE`: package-like root for discovery.
    pub component_base: String,
    /// `HANDLE_RESOLVE_TTL`: method-handle cache TTL.
    pub handle_resolve_ttl: Duration,
    /// `INPUT_STYLE`: strict_single | allow_list | enforce_list.
    pub input_style: InputStyle,
    /// `STRICT_PARAMS`: disables implicit chain-slot injection.
    pub strict_params: bool,
    /// `DISABLE_PLUGINS`: comma-separated plugin names to skip.
    pub disabled_plugins: HashSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            conflict_mode: ConflictMode::Warn,
            lazy_enabled: true,
            component_base: "stratus".to_string(),
            handle_resolve_ttl: Duration::from_secs(5),
            input_style: InputStyle::StrictSingle,
            strict_params: false,
            disabled_plugins: HashSet::new(),
        }
    }
}

impl Settings {
    /// Read all settings from the environment, falling back to defaults on
    /// missing or malformed values.
    pub fn from_env() -> Settings {
        let defaults = Settings::default();
        Settings {
            conflict_mode: env::var("REGISTRY_CONFLICT")
                .map(|v| ConflictMode::parse(&v))
                .unwrap_or(defaults.conflict_mode),
            lazy_enabled: env::var("REGISTRY_LAZY")
                .map(|v| v != "0")
                .unwrap_or(defaults.lazy_enabled),
            component_base: env::var("COMPONENT_BASE").unwrap_or(defaults.component_base),
            handle_resolve_ttl: env::var("HANDLE_RESOLVE_TTL")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.handle_resolve_ttl),
            input_style: env::var("INPUT_STYLE")
                .map(|v| InputStyle::parse(&v))
                .unwrap_or(defaults.input_style),
            strict_params: env::var("STRICT_PARAMS")
                .map(|v| v == "1")
                .unwrap_or(defaults.strict_params),
            disabled_plugins: env::var("DISABLE_PLUGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.disabled_plugins),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_mode_parses_known_values() {
        assert_eq!(ConflictMode::parse("error"), ConflictMode::Error);
        assert_eq!(ConflictMode::parse("IGNORE"), ConflictMode::Ignore);
        assert_eq!(ConflictMode::parse("warn"), ConflictMode::Warn);
        assert_eq!(ConflictMode::parse("bogus"), ConflictMode::Warn);
    }

    #[test]
    fn input_style_parses_known_values() {
        assert_eq!(InputStyle::parse("allow_list"), InputStyle::AllowList);
        assert_eq!(InputStyle::parse("enforce_list"), InputStyle::EnforceList);
        assert_eq!(InputStyle::parse("strict_single"), InputStyle::StrictSingle);
        assert_eq!(InputStyle::parse("other"), InputStyle::StrictSingle);
    }

    #[test]
    fn defaults_are_spec_defaults() {
        let s = Settings::default();
        assert_eq!(s.conflict_mode, ConflictMode::Warn);
        assert!(s.lazy_enabled);
        assert_eq!(s.handle_resolve_ttl, Duration::from_secs(5));
        assert_eq!(s.input_style, InputStyle::StrictSingle);
        assert!(!s.strict_params);
        assert!(s.disabled_plugins.is_empty());
    }
}
