use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod validator;

use crate::adapters::relational::RelationshipSpec;
use crate::cli::Cli;
use crate::domain::{ContractDocument, SchemaNode, StubDefinition};

/// Prefix of environment overrides, e.g. `DECOY__ENGINE__MAX_REF_DEPTH=4`
pub const ENV_PREFIX: &str = "DECOY";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Contract document (JSON, YAML or TOML), relative to the config root
    #[serde(default)]
    pub contract_path: Option<PathBuf>,

    // Loaded from `config/` files rather than the layered sources, which
    // lowercase every key on the way through.
    #[serde(skip)]
    pub stubs: Vec<StubDefinition>,
    #[serde(skip)]
    pub scenarios: Vec<ScenarioConfig>,
    #[serde(skip)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(skip)]
    pub contract: Option<ContractDocument>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Scenario active at startup and after a full reset
    #[serde(default = "default_scenario")]
    pub default_scenario: String,
    #[serde(default = "default_max_ref_depth")]
    pub max_ref_depth: usize,
    #[serde(default = "default_cas_max_retries")]
    pub cas_max_retries: u32,
    #[serde(default = "default_request_log_capacity")]
    pub request_log_capacity: usize,
    /// Check every synthesized response against the loaded contract
    #[serde(default)]
    pub validate_responses: bool,
    /// Near misses listed in a 404 diagnostic
    #[serde(default = "default_near_miss_limit")]
    pub near_miss_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_scenario: default_scenario(),
            max_ref_depth: default_max_ref_depth(),
            cas_max_retries: default_cas_max_retries(),
            request_log_capacity: default_request_log_capacity(),
            validate_responses: false,
            near_miss_limit: default_near_miss_limit(),
        }
    }
}

fn default_scenario() -> String {
    crate::domain::stub::DEFAULT_SCENARIO.to_string()
}

fn default_max_ref_depth() -> usize {
    crate::adapters::data_generator::DEFAULT_MAX_REF_DEPTH
}

fn default_cas_max_retries() -> u32 {
    crate::adapters::request_matcher::DEFAULT_CAS_MAX_RETRIES
}

fn default_request_log_capacity() -> usize {
    crate::adapters::request_log::DEFAULT_LOG_CAPACITY
}

fn default_near_miss_limit() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A named scenario and the working memory it starts (and resets) with
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub initial_state: Map<String, Value>,
}

/// A named set of related entities for `seed`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetConfig {
    pub name: String,
    pub entities: BTreeMap<String, EntityConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityConfig {
    pub schema: SchemaNode,
    #[serde(default)]
    pub count: usize,
}

impl DatasetConfig {
    pub fn schemas(&self) -> BTreeMap<String, SchemaNode> {
        self.entities
            .iter()
            .map(|(name, entity)| (name.clone(), entity.schema.clone()))
            .collect()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.entities
            .iter()
            .map(|(name, entity)| (name.clone(), entity.count))
            .collect()
    }
}

/// A config file holding either one item or a list of them
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Create settings from CLI arguments (config file next to its `config/` directory)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let root = cli
            .config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Self::load(File::from(cli.config.clone()).required(false), &root)
    }

    /// Load `<root>/decoy.{toml,yaml,json}` plus `<root>/config/*`
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let root = root.as_ref();
        Self::load(File::from(root.join("decoy")).required(false), root)
    }

    fn load<S>(file: S, root: &Path) -> Result<Self, anyhow::Error>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let s = Config::builder()
            .set_default("engine.default_scenario", default_scenario())?
            .set_default("engine.max_ref_depth", default_max_ref_depth() as u64)?
            .set_default("engine.cas_max_retries", default_cas_max_retries() as u64)?
            .set_default("engine.request_log_capacity", default_request_log_capacity() as u64)?
            .set_default("engine.validate_responses", false)?
            .set_default("engine.near_miss_limit", default_near_miss_limit() as u64)?
            .set_default("logging.level", default_log_level())?
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;

        settings.load_external_configs(root)?;

        // Validate configuration
        validator::ConfigValidator::validate(&settings).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })?;

        Ok(settings)
    }

    fn load_external_configs(&mut self, root: &Path) -> Result<(), anyhow::Error> {
        let config_dir = root.join("config");
        self.stubs.extend(load_dir::<StubDefinition>(&config_dir.join("stubs"))?);
        self.scenarios.extend(load_dir::<ScenarioConfig>(&config_dir.join("scenarios"))?);
        self.datasets.extend(load_dir::<DatasetConfig>(&config_dir.join("datasets"))?);

        if let Some(contract_path) = &self.contract_path {
            let path = if contract_path.is_absolute() {
                contract_path.clone()
            } else {
                root.join(contract_path)
            };
            self.contract = Some(load_document(&path)?);
            tracing::info!(path = %path.display(), "Loaded contract document");
        }

        tracing::debug!(
            stubs = self.stubs.len(),
            scenarios = self.scenarios.len(),
            datasets = self.datasets.len(),
            "Loaded external configs"
        );
        Ok(())
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioConfig> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }
}

/// Every `json`/`yaml`/`yml`/`toml` file in `dir`, each holding one item or a list
fn load_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, anyhow::Error> {
    let mut items = Vec::new();
    let pattern = format!("{}/*", dir.display());
    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(path) => {
                if has_config_extension(&path) {
                    let parsed: OneOrMany<T> = load_document(&path)?;
                    items.extend(Vec::from(parsed));
                }
            }
            Err(e) => tracing::warn!("Failed to read glob entry: {}", e),
        }
    }
    Ok(items)
}

fn has_config_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "yaml" | "yml" | "toml")
    )
}

/// Parse a file by extension
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, anyhow::Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("JSON parse error in {}: {}", path.display(), e))?,
        Some("toml") => toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("TOML parse error in {}: {}", path.display(), e))?,
        Some("yaml" | "yml") => serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("YAML parse error in {}: {}", path.display(), e))?,
        _ => anyhow::bail!("Unknown config file format: {}", path.display()),
    };
    Ok(parsed)
}
