//! Selection strategies
//!
//! Given the candidate records for a `(component, method)` pair, a
//! strategy deterministically picks one. Ties always break on engine name
//! so repeated selection over an unchanged registry is stable.

use std::sync::Arc;

use crate::error::RegistryError;
use crate::registry::record::MethodRecord;

/// Selection policy applied to a candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Priority, then non-deprecated, then version.
    Default,
    /// Version, then non-deprecated.
    PreferLatest,
    /// Drop deprecated candidates (unless all are), then version.
    PreferStable,
    /// Priority, then version.
    HighestPriority,
    /// Exact engine match; fails if absent.
    EngineOverride(String),
}

impl Strategy {
    /// Resolve a strategy by name. `engine_override` requires a preferred
    /// engine argument.
    pub fn parse(name: &str, preferred_engine: Option<&str>) -> Result<Strategy, RegistryError> {
        match name {
            "" | "default" => Ok(Strategy::Default),
            "prefer_latest" => Ok(Strategy::PreferLatest),
            "prefer_stable" => Ok(Strategy::PreferStable),
            "highest_priority" => Ok(Strategy::HighestPriority),
            "engine_override" => match preferred_engine {
                Some(engine) => Ok(Strategy::EngineOverride(engine.to_string())),
                None => Err(RegistryError::Strategy(
                    "engine_override requires a preferred engine".to_string(),
                )),
            },
            other => Err(RegistryError::Strategy(format!(
                "unknown strategy: {other}"
            ))),
        }
    }

    /// Pick the best candidate. An empty candidate list is a
    /// method-not-found error, reported against the first candidate's
    /// coordinates by the caller.
    pub fn select(
        &self,
        component: &str,
        method: &str,
        candidates: &[Arc<MethodRecord>],
    ) -> Result<Arc<MethodRecord>, RegistryError> {
        if candidates.is_empty() {
            return Err(RegistryError::MethodNotFound {
                component: component.to_string(),
                method: method.to_string(),
            });
        }

        let chosen = match self {
            Strategy::Default => candidates.iter().max_by_key(|c| {
                (
                    c.priority,
                    !c.deprecated,
                    c.parsed_version(),
                    std::cmp::Reverse(c.engine_type.clone()),
                )
            }),
            Strategy::PreferLatest => candidates.iter().max_by_key(|c| {
                (
                    c.parsed_version(),
                    !c.deprecated,
                    std::cmp::Reverse(c.engine_type.clone()),
                )
            }),
            Strategy::PreferStable => {
                let stable: Vec<&Arc<MethodRecord>> =
                    candidates.iter().filter(|c| !c.deprecated).collect();
                let pool: Vec<&Arc<MethodRecord>> = if stable.is_empty() {
                    candidates.iter().collect()
                } else {
                    stable
                };
                return pool
                    .into_iter()
                    .max_by_key(|c| (c.parsed_version(), std::cmp::Reverse(c.engine_type.clone())))
                    .cloned()
                    .ok_or_else(|| RegistryError::MethodNotFound {
                        component: component.to_string(),
                        method: method.to_string(),
                    });
            }
            Strategy::HighestPriority => candidates.iter().max_by_key(|c| {
                (
                    c.priority,
                    c.parsed_version(),
                    std::cmp::Reverse(c.engine_type.clone()),
                )
            }),
            Strategy::EngineOverride(engine) => {
                return candidates
                    .iter()
                    .find(|c| &c.engine_type == engine)
                    .cloned()
                    .ok_or_else(|| RegistryError::EngineNotFound {
                        component: component.to_string(),
                        method: method.to_string(),
                        engine: engine.clone(),
                    });
            }
        };

        chosen.cloned().ok_or_else(|| RegistryError::MethodNotFound {
            component: component.to_string(),
            method: method.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::record::{FnMethod, MethodRecord};
    use crate::value::Value;

    fn record(engine: &str, priority: i32, version: &str, deprecated: bool) -> Arc<MethodRecord> {
        let mut rec = MethodRecord::new(
            "comp",
            engine,
            "m",
            Arc::new(FnMethod::new(|_| Ok(Value::Null))),
        )
        .with_priority(priority)
        .with_version(version);
        if deprecated {
            rec = rec.deprecated();
        }
        Arc::new(rec)
    }

    fn candidates() -> Vec<Arc<MethodRecord>> {
        // v1: high priority, old version, deprecated.
        // v2: low priority, new version, stable.
        vec![
            record("v1", 5, "1.0.0", true),
            record("v2", 0, "2.0.0", false),
        ]
    }

    #[test]
    fn default_prefers_priority() {
        let sel = Strategy::Default.select("comp", "m", &candidates()).unwrap();
        assert_eq!(sel.engine_type, "v1");
    }

    #[test]
    fn prefer_latest_picks_highest_version() {
        let sel = Strategy::PreferLatest
            .select("comp", "m", &candidates())
            .unwrap();
        assert_eq!(sel.engine_type, "v2");
    }

    #[test]
    fn prefer_stable_filters_deprecated() {
        let sel = Strategy::PreferStable
            .select("comp", "m", &candidates())
            .unwrap();
        assert_eq!(sel.engine_type, "v2");
    }

    #[test]
    fn prefer_stable_falls_back_when_all_deprecated() {
        let cands = vec![record("a", 0, "1.0.0", true), record("b", 0, "2.0.0", true)];
        let sel = Strategy::PreferStable.select("comp", "m", &cands).unwrap();
        assert_eq!(sel.engine_type, "b");
    }

    #[test]
    fn highest_priority_ignores_deprecation() {
        let sel = Strategy::HighestPriority
            .select("comp", "m", &candidates())
            .unwrap();
        assert_eq!(sel.engine_type, "v1");
    }

    #[test]
    fn engine_override_finds_exact_engine() {
        let sel = Strategy::EngineOverride("v2".to_string())
            .select("comp", "m", &candidates())
            .unwrap();
        assert_eq!(sel.engine_type, "v2");
    }

    #[test]
    fn engine_override_fails_on_absent_engine() {
        let err = Strategy::EngineOverride("v9".to_string())
            .select("comp", "m", &candidates())
            .unwrap_err();
        assert!(matches!(err, RegistryError::EngineNotFound { .. }));
    }

    #[test]
    fn empty_candidates_is_method_not_found() {
        let err = Strategy::Default.select("comp", "m", &[]).unwrap_err();
        assert!(matches!(err, RegistryError::MethodNotFound { .. }));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert!(Strategy::parse("bogus", None).is_err());
        assert!(Strategy::parse("engine_override", None).is_err());
        assert_eq!(
            Strategy::parse("engine_override", Some("pandas")).unwrap(),
            Strategy::EngineOverride("pandas".to_string())
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let cands = candidates();
        let first = Strategy::Default.select("comp", "m", &cands).unwrap();
        for _ in 0..10 {
            let again = Strategy::Default.select("comp", "m", &cands).unwrap();
            assert_eq!(again.engine_type, first.engine_type);
        }
    }
}
