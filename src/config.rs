//! Pipeline configuration (YAML shape)
//!
//! Mirrors the on-disk `pipeline:` document. Parsing is purely structural;
//! reference marking and step normalization happen in [`crate::step`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StratusError};

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub pipeline: PipelineConfig,
}

impl ConfigFile {
    /// Load and parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<ConfigFile> {
        let text = std::fs::read_to_string(path.as_ref())?;
        ConfigFile::from_yaml(&text)
    }

    /// Parse a YAML configuration document from a string.
    pub fn from_yaml(text: &str) -> Result<ConfigFile> {
        let config: ConfigFile = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.pipeline.steps {
            if step.name.is_empty() {
                return Err(StratusError::Config("step with empty name".into()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(StratusError::Config(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if step.method.names().is_empty() {
                return Err(StratusError::Config(format!(
                    "step '{}' declares no method",
                    step.name
                )));
            }
        }
        Ok(())
    }
}

/// `pipeline:` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub options: PipelineOptions,
}

/// One raw step entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub component: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    pub method: MethodList,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Seconds after which a matching cached signature is treated as stale.
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    /// Per-step timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub retry_delay: Option<u64>,
}

fn default_engine() -> String {
    "auto".to_string()
}

/// `method:` accepts a single name or an ordered chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MethodList {
    One(String),
    Many(Vec<String>),
}

impl MethodList {
    pub fn names(&self) -> Vec<String> {
        match self {
            MethodList::One(name) => vec![name.clone()],
            MethodList::Many(names) => names.clone(),
        }
    }
}

/// `outputs:` section of a step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub parameters: Vec<OutputConfig>,
}

/// One declared output: either a bare name or the full form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputConfig {
    Name(String),
    Full {
        name: String,
        /// Remaps a key of a map-returning method onto this output.
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        kind: OutputKindConfig,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKindConfig {
    #[default]
    Dataset,
    Parameter,
}

/// `orchestration:` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub task_runner: TaskRunner,
    pub max_workers: usize,
    pub soft_fail: bool,
    pub retry_count: u32,
    pub retry_delay: u64,
    /// Flow deadline in seconds.
    pub timeout: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        OrchestrationConfig {
            task_runner: TaskRunner::Concurrent,
            max_workers: 4,
            soft_fail: false,
            retry_count: 0,
            retry_delay: 5,
            timeout: 1800,
        }
    }
}

impl OrchestrationConfig {
    /// Effective worker-pool size; sequential mode collapses to one.
    pub fn effective_workers(&self) -> usize {
        match self.task_runner {
            TaskRunner::Sequential => 1,
            TaskRunner::Concurrent => self.max_workers.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunner {
    Concurrent,
    Sequential,
}

/// `options:` section (engine policies outside orchestration).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub cache: CacheOptions,
    /// Strict mode fails on undeclared dependency targets; lax mode warns.
    pub strict_dependencies: bool,
    /// Strict mode errors instead of suffix-guessing output keys.
    pub strict_outputs: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            cache: CacheOptions::default(),
            strict_dependencies: true,
            strict_outputs: false,
        }
    }
}

/// `options.cache:` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub persist: bool,
    pub root: PathBuf,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            persist: true,
            root: PathBuf::from(".pipeline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
pipeline:
  name: demo
  steps:
    - name: load
      component: datahub
      method: fetch
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg = ConfigFile::from_yaml(MINIMAL).unwrap();
        let step = &cfg.pipeline.steps[0];
        assert_eq!(step.engine, "auto");
        assert_eq!(step.method.names(), vec!["fetch".to_string()]);
        assert_eq!(cfg.pipeline.orchestration.max_workers, 4);
        assert!(!cfg.pipeline.orchestration.soft_fail);
        assert_eq!(cfg.pipeline.orchestration.retry_count, 0);
        assert_eq!(cfg.pipeline.orchestration.retry_delay, 5);
        assert_eq!(cfg.pipeline.orchestration.timeout, 1800);
    }

    #[test]
    fn method_chain_and_outputs_parse() {
        let yaml = r#"
pipeline:
  name: demo
  steps:
    - name: crunch
      component: data_engine
      engine: pandas
      method: [clean, aggregate]
      parameters:
        window: 30
      outputs:
        parameters:
          - name: summary
            from: summary_df
          - name: threshold
            kind: parameter
          - raw
      depends_on: [load]
      cache_ttl: 60
"#;
        let cfg = ConfigFile::from_yaml(yaml).unwrap();
        let step = &cfg.pipeline.steps[0];
        assert_eq!(step.method.names(), vec!["clean", "aggregate"]);
        assert_eq!(step.outputs.parameters.len(), 3);
        assert_eq!(step.depends_on, vec!["load"]);
        assert_eq!(step.cache_ttl, Some(60));
        match &step.outputs.parameters[1] {
            OutputConfig::Full { kind, .. } => assert_eq!(*kind, OutputKindConfig::Parameter),
            other => panic!("unexpected output form: {other:?}"),
        }
    }

    #[test]
    fn sequential_runner_collapses_workers() {
        let yaml = r#"
pipeline:
  name: demo
  steps: []
  orchestration:
    task_runner: sequential
    max_workers: 8
"#;
        let cfg = ConfigFile::from_yaml(yaml).unwrap();
        assert_eq!(cfg.pipeline.orchestration.effective_workers(), 1);
    }

    #[test]
    fn duplicate_step_names_rejected() {
        let yaml = r#"
pipeline:
  name: demo
  steps:
    - name: a
      component: c
      method: m
    - name: a
      component: c
      method: m
"#;
        assert!(ConfigFile::from_yaml(yaml).is_err());
    }
}
