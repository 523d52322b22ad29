//! Bulk registration from module-like containers
//!
//! A [`MethodModule`] is an explicit named-callable container (the Rust
//! stand-in for scanning a loaded module). Scanning registers every
//! callable defined in the module, skipping underscore-prefixed names
//! unless asked, and optionally filtering by a substring pattern.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::registry::record::{Invocable, MethodRecord};
use crate::registry::Registry;

/// One named callable inside a module.
pub struct ModuleEntry {
    pub name: String,
    pub description: String,
    pub callable: Arc<dyn Invocable>,
    /// Module the callable was defined in; re-exports are skipped.
    pub defined_in: String,
}

/// Named container of callables, built explicitly by engine crates.
pub struct MethodModule {
    name: String,
    entries: Vec<ModuleEntry>,
}

impl MethodModule {
    pub fn new(name: impl Into<String>) -> MethodModule {
        MethodModule {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a callable defined in this module.
    pub fn function(mut self, name: impl Into<String>, callable: Arc<dyn Invocable>) -> Self {
        let defined_in = self.name.clone();
        self.entries.push(ModuleEntry {
            name: name.into(),
            description: String::new(),
            callable,
            defined_in,
        });
        self
    }

    /// Add a callable with a one-line description.
    pub fn function_with_description(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        callable: Arc<dyn Invocable>,
    ) -> Self {
        let defined_in = self.name.clone();
        self.entries.push(ModuleEntry {
            name: name.into(),
            description: description.into(),
            callable,
            defined_in,
        });
        self
    }

    /// Add a callable re-exported from another module; scan skips these.
    pub fn reexport(
        mut self,
        name: impl Into<String>,
        origin: impl Into<String>,
        callable: Arc<dyn Invocable>,
    ) -> Self {
        self.entries.push(ModuleEntry {
            name: name.into(),
            description: String::new(),
            callable,
            defined_in: origin.into(),
        });
        self
    }

    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }
}

/// Scan filters.
#[derive(Default, Clone)]
pub struct ScanOptions {
    pub tags: Vec<String>,
    pub include_private: bool,
    /// Substring match on the callable name.
    pub pattern: Option<String>,
}

/// Register every eligible callable in `module` under
/// `(component, engine)`. Returns the number of registrations.
pub fn scan(
    registry: &Registry,
    module: &MethodModule,
    component: &str,
    engine: &str,
    opts: &ScanOptions,
) -> usize {
    let mut count = 0;
    for entry in module.entries() {
        if entry.name.starts_with('_') && !opts.include_private {
            continue;
        }
        if let Some(pattern) = &opts.pattern {
            if !entry.name.contains(pattern.as_str()) {
                continue;
            }
        }
        // Re-exported callables belong to their defining module.
        if entry.defined_in != module.name() {
            continue;
        }

        let record = MethodRecord::new(component, engine, entry.name.clone(), entry.callable.clone())
            .with_description(entry.description.clone())
            .with_tags(opts.tags.iter().cloned())
            .with_module_path(module.name());

        match registry.register(record) {
            Ok(true) => {
                count += 1;
                debug!(module = module.name(), name = %entry.name, "scanned and registered");
            }
            Ok(false) => {}
            Err(err) => {
                warn!(module = module.name(), name = %entry.name, error = %err,
                    "failed to register scanned callable");
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookBus;
    use crate::registry::record::FnMethod;
    use crate::settings::Settings;
    use crate::value::Value;

    fn noop() -> Arc<dyn Invocable> {
        Arc::new(FnMethod::new(|_| Ok(Value::Null)))
    }

    fn registry() -> Registry {
        Registry::new(Settings::default(), Arc::new(HookBus::new()))
    }

    fn module() -> MethodModule {
        MethodModule::new("engines::pandas")
            .function_with_description("load", "Load raw rows", noop())
            .function("aggregate", noop())
            .function("_helper", noop())
            .reexport("borrowed", "engines::polars", noop())
    }

    #[test]
    fn scan_registers_public_local_callables() {
        let reg = registry();
        let n = scan(&reg, &module(), "data_engine", "pandas", &ScanOptions::default());
        assert_eq!(n, 2);
        assert!(reg.lookup("data_engine::pandas::load").is_some());
        assert!(reg.lookup("data_engine::pandas::aggregate").is_some());
        assert!(reg.lookup("data_engine::pandas::_helper").is_none());
        assert!(reg.lookup("data_engine::pandas::borrowed").is_none());
    }

    #[test]
    fn include_private_picks_up_underscore_names() {
        let reg = registry();
        let opts = ScanOptions {
            include_private: true,
            ..ScanOptions::default()
        };
        let n = scan(&reg, &module(), "data_engine", "pandas", &opts);
        assert_eq!(n, 3);
    }

    #[test]
    fn pattern_filters_by_substring() {
        let reg = registry();
        let opts = ScanOptions {
            pattern: Some("agg".to_string()),
            ..ScanOptions::default()
        };
        let n = scan(&reg, &module(), "data_engine", "pandas", &opts);
        assert_eq!(n, 1);
        assert!(reg.lookup("data_engine::pandas::aggregate").is_some());
    }

    #[test]
    fn scan_applies_tags_and_module_path() {
        let reg = registry();
        let opts = ScanOptions {
            tags: vec!["tabular".to_string()],
            ..ScanOptions::default()
        };
        scan(&reg, &module(), "data_engine", "pandas", &opts);
        let rec = reg.lookup("data_engine::pandas::load").unwrap();
        assert!(rec.tags.contains("tabular"));
        assert_eq!(rec.module_path, "engines::pandas");
        assert_eq!(rec.description, "Load raw rows");
    }
}
