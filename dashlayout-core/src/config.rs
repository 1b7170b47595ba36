//! Compiler settings.
//!
//! Loaded from YAML, then overridden by `DASHLAYOUT_*` environment variables.
//! Every key is optional.

use crate::compiler::reverse::DecompileOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Require list-valued columns for `ListedIn` and scalar ones for `FilteredBy`.
    pub check_column_kinds: bool,
    /// Require the owner of a `BreakdownOf` link to summarise its source table.
    pub check_breakdown_lineage: bool,
    pub reverse: DecompileOptions,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            check_column_kinds: true,
            check_breakdown_lineage: true,
            reverse: DecompileOptions::default(),
        }
    }
}

impl CompilerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Read `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_yaml_str(&text)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; unparseable values keep the current setting.
    pub fn with_overrides_from(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str, current: bool| -> bool {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(current)
        };
        Self {
            check_column_kinds: flag("DASHLAYOUT_CHECK_COLUMN_KINDS", self.check_column_kinds),
            check_breakdown_lineage: flag(
                "DASHLAYOUT_CHECK_BREAKDOWN_LINEAGE",
                self.check_breakdown_lineage,
            ),
            reverse: DecompileOptions {
                reconstruct_links: flag(
                    "DASHLAYOUT_RECONSTRUCT_LINKS",
                    self.reverse.reconstruct_links,
                ),
                flatten_chains: flag("DASHLAYOUT_FLATTEN_CHAINS", self.reverse.flatten_chains),
                schema_hints: flag("DASHLAYOUT_SCHEMA_HINTS", self.reverse.schema_hints),
            },
        }
    }
}
