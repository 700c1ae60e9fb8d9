//! Risk policy: decides whether a risky call runs, asks, or is declined.

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::action::Action;
use super::arguments::ActionArguments;
use crate::error::{ForemanError, Result};

/// Approval policy for risky actions in a run.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ApprovalPolicy {
    /// Risky actions are declined without asking.
    Never,
    /// Ask the human unless the call is pre-approved.
    #[default]
    Ask,
    /// Risky actions run without asking.
    Always,
}

/// Outcome of checking one call against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Proceed,
    Ask,
    Decline,
}

#[derive(Debug, Clone, Default)]
pub struct RiskPolicy {
    approval: ApprovalPolicy,
    allowed_directories: Vec<PathBuf>,
    auto_approve: Vec<Regex>,
}

impl RiskPolicy {
    /// Build a policy. Patterns must match a whole argument value.
    pub fn new(
        approval: ApprovalPolicy,
        allowed_directories: Vec<PathBuf>,
        auto_approve_patterns: &[String],
    ) -> Result<Self> {
        let auto_approve = auto_approve_patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    ForemanError::Configuration(format!(
                        "invalid auto-approve pattern '{pattern}': {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            approval,
            allowed_directories: allowed_directories
                .iter()
                .map(|dir| normalize(dir))
                .collect(),
            auto_approve,
        })
    }

    pub fn approval(&self) -> ApprovalPolicy {
        self.approval
    }

    pub fn decide(&self, action: &dyn Action, args: &ActionArguments) -> RiskDecision {
        if action.risk().is_none() {
            return RiskDecision::Proceed;
        }
        match self.approval {
            ApprovalPolicy::Always => RiskDecision::Proceed,
            ApprovalPolicy::Never => RiskDecision::Decline,
            ApprovalPolicy::Ask => {
                if self.paths_allowed(action, args) || self.matches_pattern(args) {
                    RiskDecision::Proceed
                } else {
                    RiskDecision::Ask
                }
            }
        }
    }

    /// True when at least one path argument exists and all of them sit inside
    /// an allow-listed directory.
    fn paths_allowed(&self, action: &dyn Action, args: &ActionArguments) -> bool {
        if self.allowed_directories.is_empty() {
            return false;
        }
        let keys = action.parameters().path_properties();
        let paths = args.path_values(&keys);
        !paths.is_empty()
            && paths.iter().all(|raw| {
                let path = Path::new(raw);
                path.is_absolute() && {
                    let path = normalize(path);
                    self.allowed_directories
                        .iter()
                        .any(|dir| path.starts_with(dir))
                }
            })
    }

    fn matches_pattern(&self, args: &ActionArguments) -> bool {
        !self.auto_approve.is_empty()
            && args
                .string_values()
                .any(|(_, value)| self.auto_approve.iter().any(|re| re.is_match(value)))
    }
}

/// Lexical normalization: drops `.` and resolves `..` without touching disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
