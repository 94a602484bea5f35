use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const BUILTIN_CATALOG: &str = include_str!("../config/catalog.toml");

fn default_credit_units() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCourse {
    pub name: String,
    #[serde(default = "default_credit_units")]
    pub credit_units: u32,
}

/// Department → ordered course list, plus the list served for unknown departments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseCatalog {
    pub fallback: Vec<CatalogCourse>,
    #[serde(default)]
    pub departments: BTreeMap<String, Vec<CatalogCourse>>,
}

impl CourseCatalog {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let catalog: Self = toml::from_str(source).context("invalid course catalog")?;
        if catalog.fallback.is_empty() {
            bail!("course catalog must define at least one fallback course");
        }
        Ok(catalog)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read course catalog '{}'", path.display()))?;
        let catalog = Self::from_toml_str(&source)
            .with_context(|| format!("in course catalog '{}'", path.display()))?;
        tracing::info!(
            "Loaded course catalog '{}' with {} departments",
            path.display(),
            catalog.departments.len()
        );
        Ok(catalog)
    }

    /// The catalog shipped in `config/catalog.toml`.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn courses_for(&self, department: &str) -> Option<&[CatalogCourse]> {
        self.departments.get(department).map(Vec::as_slice)
    }
}
