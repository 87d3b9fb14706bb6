//! Construction of provisioners for a stack and target.

use std::sync::Arc;

use deploy_cloud::gcp::{GcloudCli, GcpServices};
use deploy_cloud::Poller;
use deploy_iac::{
    NativeProvisioner, Provisioner, ProvisionerConfig, ProvisionerKind, PulumiProvisioner,
    RecipeRegistry, TerraformProvisioner, Variables,
};
use deploy_runner::CommandRunner;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::stack::Stack;
use crate::target::{Target, TargetKind};

/// Builds the provisioner matching a stack, target and backend kind.
#[derive(Clone)]
pub struct ProvisionerFactory {
    runner: Arc<dyn CommandRunner>,
    gcp: GcpServices,
    poller: Poller,
    recipes: Arc<RecipeRegistry>,
    timeout_seconds: u64,
}

impl ProvisionerFactory {
    /// Factory using the `gcloud` CLI for native recipes and the built-in
    /// recipe registry.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let gcp = GcpServices::uniform(Arc::new(GcloudCli::new(runner.clone())));
        Self {
            runner,
            gcp,
            poller: Poller::default(),
            recipes: Arc::new(RecipeRegistry::with_builtin()),
            timeout_seconds: 0,
        }
    }

    pub fn gcp_services(mut self, services: GcpServices) -> Self {
        self.gcp = services;
        self
    }

    pub fn poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    pub fn recipes(mut self, recipes: Arc<RecipeRegistry>) -> Self {
        self.recipes = recipes;
        self
    }

    /// Kill backend processes that run longer than `seconds` (0 = no limit).
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Provisioner configuration for `kind`.
    ///
    /// Pulumi additionally receives the target identity as provider
    /// configuration (`gcp:project`, `aws:region`). The plain variable is
    /// kept so `${project_id}` references still resolve.
    pub fn config_for(&self, stack: &Stack, target: &Target, kind: ProvisionerKind) -> ProvisionerConfig {
        let variables: Variables = target.config().clone();
        let mut config = ProvisionerConfig::new(stack.provisioner_dir(kind, target.name()))
            .provider(target.name())
            .stack_name(stack.name());

        if kind == ProvisionerKind::Pulumi {
            let identity = match target.kind() {
                TargetKind::Gcp => Some(("project_id", "gcp:project")),
                TargetKind::Aws => Some(("region", "aws:region")),
                TargetKind::OnPrem => None,
            };
            if let Some((key, provider_key)) = identity {
                if let Some(value) = variables.get(key).cloned() {
                    config = config.provider_variable(provider_key, value);
                }
            }
        }

        config.variables(variables)
    }

    /// Build the provisioner for `kind`, bound to its backend directory.
    pub fn create(&self, stack: &Stack, target: &Target, kind: ProvisionerKind) -> CoreResult<Box<dyn Provisioner>> {
        let config = self.config_for(stack, target, kind);
        if !config.working_dir.is_dir() {
            return Err(CoreError::NotFound(format!(
                "{} definitions for {} at {}",
                kind,
                target.name(),
                config.working_dir.display()
            )));
        }
        debug!("Creating {} provisioner in {}", kind, config.working_dir.display());

        let provisioner: Box<dyn Provisioner> = match kind {
            ProvisionerKind::Terraform => Box::new(
                TerraformProvisioner::new(config, self.runner.clone()).timeout(self.timeout_seconds),
            ),
            ProvisionerKind::Pulumi => Box::new(PulumiProvisioner::with_cli(config, self.runner.clone())),
            ProvisionerKind::Native => {
                if target.kind() != TargetKind::Gcp {
                    return Err(CoreError::Configuration(format!(
                        "native recipes support only the gcp target, not {}",
                        target.name()
                    )));
                }
                Box::new(NativeProvisioner::new(
                    config,
                    self.recipes.clone(),
                    self.gcp.clone(),
                    self.poller.clone(),
                ))
            }
        };
        Ok(provisioner)
    }
}

impl std::fmt::Debug for ProvisionerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerFactory")
            .field("poller", &self.poller)
            .field("recipes", &self.recipes)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackConfig;
    use deploy_cloud::Session;
    use deploy_runner::MockRunner;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn stack(root: &std::path::Path) -> Stack {
        Stack {
            root: root.to_path_buf(),
            config: StackConfig {
                name: "web".into(),
                description: None,
                target: "gcp".into(),
                default_provisioner: ProvisionerKind::Terraform,
                provisioners: vec![ProvisionerKind::Terraform, ProvisionerKind::Pulumi],
                config: BTreeMap::new(),
            },
        }
    }

    fn gcp_target() -> Target {
        let mut config = BTreeMap::new();
        config.insert("project_id".to_string(), json!("acme"));
        config.insert("region".to_string(), json!("us-central1"));
        Target::resolve(TargetKind::Gcp, config, &Session::empty()).unwrap()
    }

    #[test]
    fn test_pulumi_copies_identity_to_provider_config() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ProvisionerFactory::new(Arc::new(MockRunner::new()));

        let config = factory.config_for(&stack(dir.path()), &gcp_target(), ProvisionerKind::Pulumi);
        assert_eq!(config.provider_variables["gcp:project"], "acme");
        assert_eq!(config.variables["project_id"], "acme");
        assert_eq!(config.variables["region"], "us-central1");
        assert_eq!(config.working_dir, dir.path().join("pulumi").join("gcp"));

        let config = factory.config_for(&stack(dir.path()), &gcp_target(), ProvisionerKind::Terraform);
        assert!(config.provider_variables.is_empty());
        assert_eq!(config.variables["project_id"], "acme");
        assert_eq!(config.stack_name, "web");
    }

    #[test]
    fn test_pulumi_resolves_references_to_identity() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ProvisionerFactory::new(Arc::new(MockRunner::new()));
        let mut config = BTreeMap::new();
        config.insert("project_id".to_string(), json!("acme"));
        config.insert("bucket_name".to_string(), json!("${project_id}-src"));
        let target = Target::resolve(TargetKind::Gcp, config, &Session::empty()).unwrap();

        for kind in [ProvisionerKind::Terraform, ProvisionerKind::Pulumi] {
            let resolved = factory
                .config_for(&stack(dir.path()), &target, kind)
                .resolve()
                .unwrap();
            assert_eq!(resolved.variables["bucket_name"], "acme-src", "{kind}");
        }
    }

    #[test]
    fn test_missing_backend_dir_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ProvisionerFactory::new(Arc::new(MockRunner::new()));

        let err = factory
            .create(&stack(dir.path()), &gcp_target(), ProvisionerKind::Terraform)
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::NotFound(_)));

        std::fs::create_dir_all(dir.path().join("terraform").join("gcp")).unwrap();
        let provisioner = factory
            .create(&stack(dir.path()), &gcp_target(), ProvisionerKind::Terraform)
            .unwrap();
        assert_eq!(provisioner.kind(), ProvisionerKind::Terraform);
    }

    #[test]
    fn test_native_requires_gcp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("native").join("onprem")).unwrap();
        let target = Target::resolve(TargetKind::OnPrem, BTreeMap::new(), &Session::empty()).unwrap();

        let err = ProvisionerFactory::new(Arc::new(MockRunner::new()))
            .create(&stack(dir.path()), &target, ProvisionerKind::Native)
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::Configuration(_)));
    }
}
