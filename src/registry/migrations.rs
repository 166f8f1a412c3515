//! Monitor payload migrations
//!
//! Rules `(type, from, to, transform, is_breaking)` compose into a
//! directed graph per monitor type. `migrate` finds a path between two
//! versions and folds the transforms over a JSON payload. Unknown types
//! and unreachable versions fail closed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use semver::Version;

use crate::utils::{EngineError, EngineResult};

type Transform = Box<dyn Fn(serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync>;

pub struct MigrationRule {
    pub monitor_type: String,
    pub from: Version,
    pub to: Version,
    pub is_breaking: bool,
    pub transform: Transform,
}

impl std::fmt::Debug for MigrationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRule")
            .field("monitor_type", &self.monitor_type)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("is_breaking", &self.is_breaking)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct MigrationRegistry {
    rules: RwLock<HashMap<String, Vec<Arc<MigrationRule>>>>,
}

impl MigrationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, rule: MigrationRule) {
        self.rules
            .write()
            .entry(rule.monitor_type.clone())
            .or_default()
            .push(Arc::new(rule));
    }

    /// BFS over the version graph; `None` when no path exists
    #[must_use]
    pub fn find_path(
        &self,
        monitor_type: &str,
        from: &Version,
        to: &Version,
    ) -> Option<Vec<Arc<MigrationRule>>> {
        if from == to {
            return Some(Vec::new());
        }
        let rules = self.rules.read();
        let edges = rules.get(monitor_type)?;

        let mut queue: VecDeque<(Version, Vec<Arc<MigrationRule>>)> = VecDeque::new();
        let mut seen: HashSet<Version> = HashSet::new();
        queue.push_back((from.clone(), Vec::new()));
        seen.insert(from.clone());

        while let Some((version, path)) = queue.pop_front() {
            for edge in edges.iter().filter(|r| r.from == version) {
                if seen.contains(&edge.to) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(Arc::clone(edge));
                if edge.to == *to {
                    return Some(next_path);
                }
                seen.insert(edge.to.clone());
                queue.push_back((edge.to.clone(), next_path));
            }
        }
        None
    }

    /// Migrate a payload from one version to another
    pub fn migrate(
        &self,
        monitor_type: &str,
        from: &Version,
        to: &Version,
        data: serde_json::Value,
    ) -> EngineResult<serde_json::Value> {
        let path = self.find_path(monitor_type, from, to).ok_or_else(|| {
            EngineError::validation(
                format!("no migration path for '{monitor_type}' {from} -> {to}"),
                vec![],
            )
        })?;

        let mut value = data;
        for rule in &path {
            if rule.is_breaking {
                tracing::warn!(
                    "Applying breaking migration for '{monitor_type}' {} -> {}",
                    rule.from,
                    rule.to
                );
            }
            value = (rule.transform)(value).map_err(|e| {
                EngineError::internal(format!(
                    "migration '{monitor_type}' {} -> {} failed: {e}",
                    rule.from, rule.to
                ))
            })?;
        }
        Ok(value)
    }
}
