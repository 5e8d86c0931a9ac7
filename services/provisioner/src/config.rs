//! Provisioner configuration, read once at startup from `NODELAY_*` variables.

use std::time::Duration;

use anyhow::Result;
use nodelay_capacity::{DEFAULT_REVIEW_INTERVAL, DEFAULT_REVIEW_QUEUE_CAPACITY};
use thiserror::Error;

use crate::model::ResourceClass;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("invalid provider spec {0:?}, expected name:kind:class|class[:limit]")]
    InvalidProvider(String),
}

/// A development provider declared in `NODELAY_PROVIDERS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    pub kind: String,
    pub classes: Vec<ResourceClass>,
    /// Ceiling per class; `None` is unlimited.
    pub limit: Option<u32>,
}

impl ProviderSpec {
    /// Parse `name:kind:class|class[:limit]`. The class `_` is the unlabeled
    /// class.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::InvalidProvider(spec.to_string());

        let parts: Vec<&str> = spec.trim().split(':').collect();
        let (name, kind, classes, limit) = match parts.as_slice() {
            [name, kind, classes] => (*name, *kind, *classes, None),
            [name, kind, classes, limit] => {
                (*name, *kind, *classes, Some(limit.parse::<u32>().map_err(|_| bad())?))
            }
            _ => return Err(bad()),
        };
        if name.is_empty() || kind.is_empty() || classes.is_empty() {
            return Err(bad());
        }

        let classes = classes
            .split('|')
            .map(|c| match c {
                "_" => ResourceClass::Unlabeled,
                label => ResourceClass::label(label),
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            kind: kind.to_string(),
            classes,
            limit,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Whether work becoming ready triggers an immediate review.
    pub fast_provisioning_enabled: bool,
    pub review_interval: Duration,
    pub review_queue_capacity: usize,
    pub log_level: String,
    /// Restrict the no-delay strategy to providers of this kind.
    pub strategy_kind: Option<String>,
    pub providers: Vec<ProviderSpec>,
    /// Submit a synthetic work item at this interval.
    pub simulate_arrival: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|var| std::env::var(var).ok())?)
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fast_provisioning_enabled = !lookup("NODELAY_DISABLE_FAST_PROVISIONING")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let review_interval = match lookup("NODELAY_REVIEW_INTERVAL_SECS") {
            Some(v) => match v.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(invalid("NODELAY_REVIEW_INTERVAL_SECS", v)),
            },
            None => DEFAULT_REVIEW_INTERVAL,
        };

        let review_queue_capacity = match lookup("NODELAY_REVIEW_QUEUE_CAPACITY") {
            Some(v) => match v.parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => return Err(invalid("NODELAY_REVIEW_QUEUE_CAPACITY", v)),
            },
            None => DEFAULT_REVIEW_QUEUE_CAPACITY,
        };

        let log_level = lookup("NODELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let strategy_kind = lookup("NODELAY_STRATEGY_KIND").filter(|k| !k.is_empty());

        let providers = match lookup("NODELAY_PROVIDERS") {
            Some(v) => v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(ProviderSpec::parse)
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![ProviderSpec {
                name: "local".to_string(),
                kind: "kubernetes".to_string(),
                classes: vec![ResourceClass::Unlabeled],
                limit: Some(10),
            }],
        };

        let simulate_arrival = match lookup("NODELAY_SIMULATE_ARRIVAL_MS") {
            Some(v) => match v.parse::<u64>() {
                Ok(0) => None,
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => return Err(invalid("NODELAY_SIMULATE_ARRIVAL_MS", v)),
            },
            None => None,
        };

        Ok(Self {
            fast_provisioning_enabled,
            review_interval,
            review_queue_capacity,
            log_level,
            strategy_kind,
            providers,
            simulate_arrival,
        })
    }
}

fn invalid(var: &'static str, value: String) -> ConfigError {
    ConfigError::InvalidValue { var, value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(config.fast_provisioning_enabled);
        assert_eq!(config.review_interval, DEFAULT_REVIEW_INTERVAL);
        assert_eq!(config.review_queue_capacity, DEFAULT_REVIEW_QUEUE_CAPACITY);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.strategy_kind, None);
        assert_eq!(config.simulate_arrival, None);
    }

    #[test]
    fn test_disable_flag() {
        for value in ["true", "TRUE", "1"] {
            let config = config(&[("NODELAY_DISABLE_FAST_PROVISIONING", value)]).unwrap();
            assert!(!config.fast_provisioning_enabled);
        }
        let config = config(&[("NODELAY_DISABLE_FAST_PROVISIONING", "no")]).unwrap();
        assert!(config.fast_provisioning_enabled);
    }

    #[test]
    fn test_providers() {
        let config = config(&[(
            "NODELAY_PROVIDERS",
            "k8s-a:kubernetes:linux|_:5, docker:docker:linux",
        )])
        .unwrap();

        assert_eq!(
            config.providers,
            vec![
                ProviderSpec {
                    name: "k8s-a".to_string(),
                    kind: "kubernetes".to_string(),
                    classes: vec![ResourceClass::label("linux"), ResourceClass::Unlabeled],
                    limit: Some(5),
                },
                ProviderSpec {
                    name: "docker".to_string(),
                    kind: "docker".to_string(),
                    classes: vec![ResourceClass::label("linux")],
                    limit: None,
                },
            ]
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("NODELAY_REVIEW_INTERVAL_SECS", "0")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config(&[("NODELAY_PROVIDERS", "only-a-name")]),
            Err(ConfigError::InvalidProvider(_))
        ));
        assert!(matches!(
            config(&[("NODELAY_PROVIDERS", "a:kubernetes:linux:lots")]),
            Err(ConfigError::InvalidProvider(_))
        ));
    }
}
