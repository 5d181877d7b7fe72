//! Material descriptors and their content-derived fingerprints.
//!
//! A fingerprint is the SHA-256 of a material's type and identifying
//! attributes. Display names and checkout folders are not identifying: the
//! same repository declared under two folder names is one material.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable, content-derived identity of a material configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash identifying attributes into a fingerprint.
    pub fn from_attributes(material_type: &str, attributes: &[(&str, &str)]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("type={material_type}").as_bytes());
        for (key, value) in attributes {
            hasher.update(format!("<|>{key}={value}").as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for Fingerprint {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Version-control system behind an scm material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScmKind {
    Git,
    Hg,
    Svn,
    P4,
    Tfs,
}

impl ScmKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScmKind::Git => "git",
            ScmKind::Hg => "hg",
            ScmKind::Svn => "svn",
            ScmKind::P4 => "p4",
            ScmKind::Tfs => "tfs",
        }
    }
}

/// A version-control repository consumed by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmMaterialConfig {
    pub kind: ScmKind,
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Checkout folder; not part of the fingerprint.
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ScmMaterialConfig {
    pub fn git(url: impl Into<String>) -> Self {
        Self {
            kind: ScmKind::Git,
            url: url.into(),
            branch: None,
            folder: None,
            name: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A dependency on a stage of an upstream pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyMaterialConfig {
    pub pipeline_name: String,
    pub stage_name: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl DependencyMaterialConfig {
    pub fn new(pipeline_name: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            stage_name: stage_name.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A package from a package repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMaterialConfig {
    pub repository_id: String,
    pub package_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// An scm provided by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluggableScmMaterialConfig {
    pub plugin_id: String,
    pub scm_id: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Immutable material descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterialConfig {
    Scm(ScmMaterialConfig),
    Dependency(DependencyMaterialConfig),
    Package(PackageMaterialConfig),
    PluggableScm(PluggableScmMaterialConfig),
}

impl MaterialConfig {
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            MaterialConfig::Scm(scm) => Fingerprint::from_attributes(
                scm.kind.name(),
                &[
                    ("url", scm.url.as_str()),
                    ("branch", scm.branch.as_deref().unwrap_or("")),
                ],
            ),
            MaterialConfig::Dependency(dep) => Fingerprint::from_attributes(
                "dependency",
                &[
                    ("pipelineName", dep.pipeline_name.as_str()),
                    ("stageName", dep.stage_name.as_str()),
                ],
            ),
            MaterialConfig::Package(pkg) => Fingerprint::from_attributes(
                "package",
                &[
                    ("repositoryId", pkg.repository_id.as_str()),
                    ("packageId", pkg.package_id.as_str()),
                ],
            ),
            MaterialConfig::PluggableScm(scm) => Fingerprint::from_attributes(
                "pluggable_scm",
                &[
                    ("pluginId", scm.plugin_id.as_str()),
                    ("scmId", scm.scm_id.as_str()),
                ],
            ),
        }
    }

    /// Human-readable name used in diagnostics and CLI output.
    pub fn display_name(&self) -> String {
        match self {
            MaterialConfig::Scm(scm) => scm.name.clone().unwrap_or_else(|| scm.url.clone()),
            MaterialConfig::Dependency(dep) => dep
                .name
                .clone()
                .unwrap_or_else(|| format!("{} [{}]", dep.pipeline_name, dep.stage_name)),
            MaterialConfig::Package(pkg) => pkg
                .name
                .clone()
                .unwrap_or_else(|| format!("{}:{}", pkg.repository_id, pkg.package_id)),
            MaterialConfig::PluggableScm(scm) => scm
                .name
                .clone()
                .unwrap_or_else(|| format!("{}:{}", scm.plugin_id, scm.scm_id)),
        }
    }

    pub fn as_dependency(&self) -> Option<&DependencyMaterialConfig> {
        match self {
            MaterialConfig::Dependency(dep) => Some(dep),
            _ => None,
        }
    }

    pub fn is_dependency(&self) -> bool {
        self.as_dependency().is_some()
    }
}

impl From<ScmMaterialConfig> for MaterialConfig {
    fn from(scm: ScmMaterialConfig) -> Self {
        MaterialConfig::Scm(scm)
    }
}

impl From<DependencyMaterialConfig> for MaterialConfig {
    fn from(dep: DependencyMaterialConfig) -> Self {
        MaterialConfig::Dependency(dep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_folder_and_name() {
        let plain: MaterialConfig = ScmMaterialConfig::git("https://example.com/repo.git").into();
        let renamed: MaterialConfig = ScmMaterialConfig::git("https://example.com/repo.git")
            .with_folder("folder2")
            .with_name("renamed")
            .into();
        assert_eq!(plain.fingerprint(), renamed.fingerprint());
    }

    #[test]
    fn test_fingerprint_depends_on_branch() {
        let main: MaterialConfig = ScmMaterialConfig::git("repo").with_branch("main").into();
        let dev: MaterialConfig = ScmMaterialConfig::git("repo").with_branch("dev").into();
        assert_ne!(main.fingerprint(), dev.fingerprint());
    }

    #[test]
    fn test_dependency_fingerprint_ignores_material_name() {
        let a: MaterialConfig = DependencyMaterialConfig::new("up", "s")
            .with_name("up-for-mid")
            .into();
        let b: MaterialConfig = DependencyMaterialConfig::new("up", "s")
            .with_name("up-for-down")
            .into();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.display_name(), b.display_name());
    }

    #[test]
    fn test_scm_and_package_with_same_ids_differ() {
        let pkg = MaterialConfig::Package(PackageMaterialConfig {
            repository_id: "r".to_string(),
            package_id: "p".to_string(),
            name: None,
        });
        let pluggable = MaterialConfig::PluggableScm(PluggableScmMaterialConfig {
            plugin_id: "r".to_string(),
            scm_id: "p".to_string(),
            folder: None,
            name: None,
        });
        assert_ne!(pkg.fingerprint(), pluggable.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex() {
        let fp = MaterialConfig::from(ScmMaterialConfig::git("repo")).fingerprint();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_serde_material_config_tagged() {
        let json = r#"{"type":"scm","kind":"git","url":"repo"}"#;
        let material: MaterialConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(material, ScmMaterialConfig::git("repo").into());
    }
}
