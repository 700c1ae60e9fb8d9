//! Configuration system (layered: code > env > TOML file > defaults).

use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{ForemanError, Result};
use crate::output::{OutputBounder, DEFAULT_OUTPUT_CHAR_LIMIT};
use crate::tools::{ApprovalPolicy, RiskPolicy};

pub const DEFAULT_MAX_ITERATIONS: usize = 25;
pub const DEFAULT_WARNING_RATIO: f64 = 0.9;
pub const DEFAULT_SKILL_CACHE_TTL_SECS: u64 = 300;

const ENV_MAX_ITERATIONS: &str = "FOREMAN_MAX_ITERATIONS";
const ENV_OUTPUT_CHAR_LIMIT: &str = "FOREMAN_OUTPUT_CHAR_LIMIT";
const ENV_APPROVAL_POLICY: &str = "FOREMAN_APPROVAL_POLICY";
const ENV_ALLOWED_DIRS: &str = "FOREMAN_ALLOWED_DIRS";

/// Resolved scheduler configuration.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    /// Hard cap on plan/act/observe turns per run.
    #[builder(default = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,
    /// Character ceiling for one text result.
    #[builder(default = DEFAULT_OUTPUT_CHAR_LIMIT)]
    pub output_char_limit: usize,
    /// Fraction of `max_iterations` after which the limit warning is shown.
    #[builder(default = DEFAULT_WARNING_RATIO)]
    pub warning_ratio: f64,
    #[builder(default)]
    pub approval_policy: ApprovalPolicy,
    /// Risky calls whose paths all sit inside one of these run unasked.
    #[builder(default)]
    pub allowed_directories: Vec<PathBuf>,
    /// Regexes; a risky call with a string argument fully matching one runs
    /// unasked.
    #[builder(default)]
    pub auto_approve_patterns: Vec<String>,
    #[builder(default = DEFAULT_SKILL_CACHE_TTL_SECS)]
    pub skill_cache_ttl_secs: u64,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_char_limit: DEFAULT_OUTPUT_CHAR_LIMIT,
            warning_ratio: DEFAULT_WARNING_RATIO,
            approval_policy: ApprovalPolicy::default(),
            allowed_directories: Vec::new(),
            auto_approve_patterns: Vec::new(),
            skill_cache_ttl_secs: DEFAULT_SKILL_CACHE_TTL_SECS,
        }
    }
}

/// One configuration layer. Unset fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub max_iterations: Option<usize>,
    pub output_char_limit: Option<usize>,
    pub warning_ratio: Option<f64>,
    pub approval_policy: Option<ApprovalPolicy>,
    pub allowed_directories: Option<Vec<PathBuf>>,
    pub auto_approve_patterns: Option<Vec<String>>,
    pub skill_cache_ttl_secs: Option<u64>,
}

impl ConfigLayer {
    /// Read the `FOREMAN_*` environment variables, after loading `.env`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the env layer from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            max_iterations: value(ENV_MAX_ITERATIONS)
                .map(|v| parse_positive(ENV_MAX_ITERATIONS, &v))
                .transpose()?,
            output_char_limit: value(ENV_OUTPUT_CHAR_LIMIT)
                .map(|v| parse_positive(ENV_OUTPUT_CHAR_LIMIT, &v))
                .transpose()?,
            approval_policy: value(ENV_APPROVAL_POLICY)
                .map(|v| {
                    v.trim().parse::<ApprovalPolicy>().map_err(|_| {
                        ForemanError::Configuration(format!(
                            "{ENV_APPROVAL_POLICY}: expected ask, always or never, got '{v}'"
                        ))
                    })
                })
                .transpose()?,
            allowed_directories: value(ENV_ALLOWED_DIRS).map(|v| {
                v.split(':')
                    .map(str::trim)
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from)
                    .collect()
            }),
            ..Self::default()
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| ForemanError::Configuration(format!("invalid config file: {e}")))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ForemanError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Fill unset fields of `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            max_iterations: self.max_iterations.or(lower.max_iterations),
            output_char_limit: self.output_char_limit.or(lower.output_char_limit),
            warning_ratio: self.warning_ratio.or(lower.warning_ratio),
            approval_policy: self.approval_policy.or(lower.approval_policy),
            allowed_directories: self.allowed_directories.or(lower.allowed_directories),
            auto_approve_patterns: self.auto_approve_patterns.or(lower.auto_approve_patterns),
            skill_cache_ttl_secs: self.skill_cache_ttl_secs.or(lower.skill_cache_ttl_secs),
        }
    }

    fn apply(self, base: ForemanConfig) -> ForemanConfig {
        ForemanConfig {
            max_iterations: self.max_iterations.unwrap_or(base.max_iterations),
            output_char_limit: self.output_char_limit.unwrap_or(base.output_char_limit),
            warning_ratio: self.warning_ratio.unwrap_or(base.warning_ratio),
            approval_policy: self.approval_policy.unwrap_or(base.approval_policy),
            allowed_directories: self.allowed_directories.unwrap_or(base.allowed_directories),
            auto_approve_patterns: self
                .auto_approve_patterns
                .unwrap_or(base.auto_approve_patterns),
            skill_cache_ttl_secs: self.skill_cache_ttl_secs.unwrap_or(base.skill_cache_ttl_secs),
        }
    }
}

impl ForemanConfig {
    /// Resolve `explicit` over the environment over the config file.
    ///
    /// `file` must exist when given; otherwise the platform config file is
    /// used if present.
    pub fn load(explicit: ConfigLayer, file: Option<&Path>) -> Result<Self> {
        let env = ConfigLayer::from_env()?;
        let file = match file {
            Some(path) => ConfigLayer::from_toml_file(path)?,
            None => match default_config_path().filter(|path| path.is_file()) {
                Some(path) => ConfigLayer::from_toml_file(&path)?,
                None => ConfigLayer::default(),
            },
        };
        Self::resolve(explicit.or(env).or(file))
    }

    /// Defaults overridden by environment variables and the platform file.
    pub fn from_env() -> Result<Self> {
        Self::load(ConfigLayer::default(), None)
    }

    /// Apply a merged layer over the defaults and validate.
    pub fn resolve(layer: ConfigLayer) -> Result<Self> {
        let config = layer.apply(Self::default());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ForemanError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.output_char_limit == 0 {
            return Err(ForemanError::Configuration(
                "output_char_limit must be at least 1".to_string(),
            ));
        }
        if !(self.warning_ratio > 0.0 && self.warning_ratio <= 1.0) {
            return Err(ForemanError::Configuration(format!(
                "warning_ratio must be in (0, 1], got {}",
                self.warning_ratio
            )));
        }
        self.risk_policy().map(|_| ())
    }

    pub fn risk_policy(&self) -> Result<RiskPolicy> {
        RiskPolicy::new(
            self.approval_policy,
            self.allowed_directories.clone(),
            &self.auto_approve_patterns,
        )
    }

    pub fn output_bounder(&self) -> OutputBounder {
        OutputBounder::new(self.output_char_limit)
    }

    pub fn skill_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.skill_cache_ttl_secs)
    }
}

/// `<platform config dir>/foreman/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "foreman")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ForemanError::Configuration(format!(
            "{key}: expected a positive integer, got '{value}'"
        ))),
    }
}
