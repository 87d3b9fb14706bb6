//! Stack definitions and the on-disk stack catalog.
//!
//! A catalog is a directory with one sub-directory per stack:
//!
//! ```text
//! stacks/
//!   fastapi_postgres/
//!     stack.yaml
//!     app/
//!     native/gcp/recipe.yaml
//!     terraform/gcp/main.tf
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use deploy_iac::ProvisionerKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// Stack definition file inside each stack directory.
pub const STACK_FILE: &str = "stack.yaml";

/// Contents of `stack.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default target (`gcp`, `aws`, `onprem`)
    pub target: String,
    pub default_provisioner: ProvisionerKind,
    /// Provisioners the stack ships definitions for
    #[serde(default)]
    pub provisioners: Vec<ProvisionerKind>,
    /// Per-target base configuration
    #[serde(default)]
    pub config: BTreeMap<String, BTreeMap<String, Value>>,
}

impl StackConfig {
    /// Check internal consistency.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Configuration("stack name is empty".to_string()));
        }
        if self.target.trim().is_empty() {
            return Err(CoreError::Configuration(format!(
                "stack {} declares no default target",
                self.name
            )));
        }
        if !self.provisioners.is_empty() && !self.provisioners.contains(&self.default_provisioner) {
            return Err(CoreError::Configuration(format!(
                "default provisioner {} is not listed in provisioners of stack {}",
                self.default_provisioner, self.name
            )));
        }
        Ok(())
    }

    /// Provisioners the stack supports; the default alone when none are listed.
    pub fn supported_provisioners(&self) -> Vec<ProvisionerKind> {
        if self.provisioners.is_empty() {
            vec![self.default_provisioner]
        } else {
            self.provisioners.clone()
        }
    }
}

/// A loaded stack bound to its directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    pub root: PathBuf,
    pub config: StackConfig,
}

impl Stack {
    /// Load `stack.yaml` from `root`.
    pub fn load(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let path = root.join(STACK_FILE);
        if !path.is_file() {
            return Err(CoreError::NotFound(path.display().to_string()));
        }

        let config: StackConfig = serde_yaml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        debug!("Loaded stack {} from {}", config.name, root.display());
        Ok(Self { root, config })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn supports(&self, kind: ProvisionerKind) -> bool {
        self.config.supported_provisioners().contains(&kind)
    }

    /// Backend directory `<stack>/<provisioner>/<target>`.
    pub fn provisioner_dir(&self, kind: ProvisionerKind, target: &str) -> PathBuf {
        self.root.join(kind.as_str()).join(target)
    }

    /// Base configuration declared for `target`, empty when absent.
    pub fn target_config(&self, target: &str) -> BTreeMap<String, Value> {
        self.config.config.get(target).cloned().unwrap_or_default()
    }

    /// Application source directory.
    pub fn app_dir(&self) -> PathBuf {
        self.root.join("app")
    }
}

/// One row of a catalog listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackSummary {
    pub name: String,
    pub description: Option<String>,
    pub target: String,
    pub default_provisioner: ProvisionerKind,
    pub provisioners: Vec<ProvisionerKind>,
}

impl From<&Stack> for StackSummary {
    fn from(stack: &Stack) -> Self {
        Self {
            name: stack.config.name.clone(),
            description: stack.config.description.clone(),
            target: stack.config.target.clone(),
            default_provisioner: stack.config.default_provisioner,
            provisioners: stack.config.supported_provisioners(),
        }
    }
}

/// Directory of stacks.
#[derive(Debug, Clone)]
pub struct StackCatalog {
    root: PathBuf,
}

impl StackCatalog {
    /// Default catalog location, relative to the working directory.
    pub const DEFAULT_DIR: &'static str = "stacks";

    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a stack by directory name.
    pub fn get(&self, name: &str) -> CoreResult<Stack> {
        let plain = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if name.is_empty() || !plain || name.contains("..") {
            return Err(CoreError::Configuration(format!("invalid stack name '{}'", name)));
        }
        let dir = self.root.join(name);
        if !dir.join(STACK_FILE).is_file() {
            return Err(CoreError::StackNotFound(name.to_string()));
        }
        let stack = Stack::load(&dir)?;
        if stack.name() != name {
            warn!(
                "Stack directory {} declares name {}",
                dir.display(),
                stack.name()
            );
        }
        Ok(stack)
    }

    /// Every loadable stack, sorted by name. Broken stacks are skipped.
    pub fn list(&self) -> CoreResult<Vec<StackSummary>> {
        if !self.root.is_dir() {
            return Err(CoreError::NotFound(format!(
                "stacks directory {}",
                self.root.display()
            )));
        }

        let mut stacks = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.join(STACK_FILE).is_file() {
                continue;
            }
            match Stack::load(&path) {
                Ok(stack) => stacks.push(StackSummary::from(&stack)),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK_YAML: &str = r#"
name: fastapi_postgres
description: FastAPI with PostgreSQL
target: gcp
default_provisioner: native
provisioners: [native, terraform]
config:
  gcp:
    region: us-central1
    app_name: fastapi-app
    db_tier: db-f1-micro
"#;

    fn write_stack(root: &Path, dir: &str, yaml: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(STACK_FILE), yaml).unwrap();
    }

    #[test]
    fn test_load_stack() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(dir.path(), "fastapi_postgres", STACK_YAML);

        let catalog = StackCatalog::new(dir.path());
        let stack = catalog.get("fastapi_postgres").unwrap();

        assert_eq!(stack.name(), "fastapi_postgres");
        assert!(stack.supports(ProvisionerKind::Terraform));
        assert!(!stack.supports(ProvisionerKind::Pulumi));
        assert_eq!(stack.target_config("gcp")["region"], "us-central1");
        assert!(stack.target_config("aws").is_empty());
        assert_eq!(
            stack.provisioner_dir(ProvisionerKind::Native, "gcp"),
            dir.path().join("fastapi_postgres").join("native").join("gcp")
        );
    }

    #[test]
    fn test_missing_stack() {
        let dir = tempfile::tempdir().unwrap();
        let err = StackCatalog::new(dir.path()).get("nope").unwrap_err();
        assert!(matches!(err, CoreError::StackNotFound(name) if name == "nope"));
    }

    #[test]
    fn test_stack_name_cannot_leave_catalog() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(dir.path(), "outside", STACK_YAML);
        let catalog = StackCatalog::new(dir.path().join("catalog"));
        fs::create_dir_all(catalog.root()).unwrap();

        for name in ["../outside", "..", "a/b", "a\\b", "/etc", ""] {
            assert!(
                matches!(catalog.get(name), Err(CoreError::Configuration(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn test_default_provisioner_must_be_listed() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(
            dir.path(),
            "bad",
            "name: bad\ntarget: gcp\ndefault_provisioner: pulumi\nprovisioners: [terraform]\n",
        );
        let err = StackCatalog::new(dir.path()).get("bad").unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_unknown_provisioner_is_yaml_error() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(
            dir.path(),
            "odd",
            "name: odd\ntarget: gcp\ndefault_provisioner: ansible\n",
        );
        assert!(matches!(
            StackCatalog::new(dir.path()).get("odd"),
            Err(CoreError::Yaml(_))
        ));
    }

    #[test]
    fn test_list_sorted_and_skips_broken() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(dir.path(), "zeta", "name: zeta\ntarget: aws\ndefault_provisioner: terraform\n");
        write_stack(dir.path(), "fastapi_postgres", STACK_YAML);
        write_stack(dir.path(), "broken", "name: [");
        fs::create_dir_all(dir.path().join("not-a-stack")).unwrap();

        let stacks = StackCatalog::new(dir.path()).list().unwrap();
        let names: Vec<&str> = stacks.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["fastapi_postgres", "zeta"]);
        assert_eq!(stacks[1].provisioners, vec![ProvisionerKind::Terraform]);
    }

    #[test]
    fn test_list_missing_root() {
        let catalog = StackCatalog::new("/definitely/not/here");
        assert!(matches!(catalog.list(), Err(CoreError::NotFound(_))));
    }
}
