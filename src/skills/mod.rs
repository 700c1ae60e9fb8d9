//! Read-through skill cache injected into the scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// A loaded skill, handed to the planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Skill {
    /// Skill name used for lookup.
    pub name: String,
    /// Short description used in prompts.
    pub description: String,
    pub content: String,
}

/// Where skills come from.
#[async_trait]
pub trait SkillSource: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Skill>>;
}

/// Skills stored as `*.md` files in one directory.
///
/// The file stem is the name and the first non-empty line (without leading
/// `#`) is the description.
#[derive(Debug, Clone)]
pub struct DirectorySkillSource {
    root: PathBuf,
}

impl DirectorySkillSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SkillSource for DirectorySkillSource {
    async fn load_all(&self) -> Result<Vec<Skill>> {
        let mut skills = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(skills),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let content = tokio::fs::read_to_string(&path).await?;
            let description = content
                .lines()
                .map(|line| line.trim_start_matches('#').trim())
                .find(|line| !line.is_empty())
                .unwrap_or_default()
                .to_string();
            skills.push(Skill {
                name: name.to_string(),
                description,
                content,
            });
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(skills)
    }
}

struct Snapshot {
    skills: Arc<[Skill]>,
    loaded_at: Instant,
}

/// Skill set loaded on demand and reloaded once older than its TTL.
#[derive(Clone)]
pub struct SkillCache {
    source: Arc<dyn SkillSource>,
    ttl: Duration,
    snapshot: Arc<Mutex<Option<Snapshot>>>,
}

impl SkillCache {
    pub fn new(source: Arc<dyn SkillSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    /// Current skills, loading them if missing or stale.
    ///
    /// A failed load is logged; the previous snapshot (or nothing) is served
    /// and the next call tries again.
    pub async fn get(&self) -> Arc<[Skill]> {
        let mut snapshot = self.snapshot.lock().await;
        if let Some(current) = snapshot.as_ref() {
            if current.loaded_at.elapsed() < self.ttl {
                return Arc::clone(&current.skills);
            }
        }
        match self.source.load_all().await {
            Ok(skills) => {
                tracing::debug!(count = skills.len(), "skills loaded");
                let skills: Arc<[Skill]> = skills.into();
                *snapshot = Some(Snapshot {
                    skills: Arc::clone(&skills),
                    loaded_at: Instant::now(),
                });
                skills
            }
            Err(err) => {
                tracing::warn!(error = %err, "skill load failed; serving previous set");
                snapshot
                    .as_ref()
                    .map(|current| Arc::clone(&current.skills))
                    .unwrap_or_else(|| Arc::from(Vec::new()))
            }
        }
    }

    /// Drop the snapshot and load again.
    pub async fn refresh(&self) -> Result<Arc<[Skill]>> {
        let skills: Arc<[Skill]> = self.source.load_all().await?.into();
        *self.snapshot.lock().await = Some(Snapshot {
            skills: Arc::clone(&skills),
            loaded_at: Instant::now(),
        });
        Ok(skills)
    }

    /// Forget the snapshot; the next `get` reloads.
    pub async fn invalidate(&self) {
        *self.snapshot.lock().await = None;
    }

    pub async fn get_skill(&self, name: &str) -> Option<Skill> {
        self.get()
            .await
            .iter()
            .find(|skill| skill.name == name)
            .cloned()
    }
}

impl std::fmt::Debug for SkillCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillCache").field("ttl", &self.ttl).finish()
    }
}
