use std::{borrow::Cow, time::Duration};

use serde::Deserialize;

use crate::error::Error;

/// Tuning knobs for a [`Kernel`](crate::Kernel).
///
/// Constructible from TOML via [`KernelConfig::from_toml`], or built up
/// directly; [`KernelConfig::default`] matches the source's own defaults
/// wherever the source specifies one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Size of the user-allocatable timeout id range. Exhausting it raises
    /// `ConfigLimitExceeded` from `register()`.
    pub max_user_timeouts: usize,
    /// Optional soft cap on the number of live portals. `None` means
    /// unbounded, matching the original hash table, which simply grows.
    pub max_portals: Option<usize>,
    /// Prefix used by `create_unique` when minting `"<prefix> N>"` names.
    pub unnamed_portal_prefix: Cow<'static, str>,
    /// Minimum interval the timer is ever armed for; sub-threshold deltas
    /// are clamped up rather than treated as "disarm".
    pub min_timer_interval: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            max_user_timeouts: 64,
            max_portals: None,
            unnamed_portal_prefix: Cow::Borrowed("<unnamed portal"),
            min_timer_interval: Duration::from_micros(1),
        }
    }
}

impl KernelConfig {
    /// Parses a config from a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    /// Whether `current_len` live portals means no more can be created.
    pub(crate) fn portal_cap_reached(&self, current_len: usize) -> bool {
        matches!(self.max_portals, Some(cap) if current_len >= cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.max_user_timeouts, 64);
        assert_eq!(config.max_portals, None);
        assert_eq!(config.min_timer_interval, Duration::from_micros(1));
    }

    #[test]
    fn portal_cap_respects_none() {
        let config = KernelConfig::default();
        assert!(!config.portal_cap_reached(1_000_000));
    }

    #[test]
    fn portal_cap_triggers_at_limit() {
        let mut config = KernelConfig::default();
        config.max_portals = Some(2);
        assert!(!config.portal_cap_reached(1));
        assert!(config.portal_cap_reached(2));
    }

    #[test]
    fn from_toml_parses_partial_overrides() {
        let config = KernelConfig::from_toml("max_user_timeouts = 8\n").unwrap();
        assert_eq!(config.max_user_timeouts, 8);
        assert_eq!(config.max_portals, None);
    }

    #[test]
    fn from_toml_rejects_garbage() {
        let err = KernelConfig::from_toml("not valid toml &&&").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
