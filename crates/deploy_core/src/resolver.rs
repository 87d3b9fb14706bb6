//! Target and provisioner resolution for one invocation.

use std::sync::Arc;

use deploy_cloud::Session;
use deploy_iac::{Provisioner, ProvisionerKind};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::factory::ProvisionerFactory;
use crate::stack::{Stack, StackCatalog};
use crate::target::{Target, TargetKind};

/// Caller-supplied selection and overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployParameters {
    pub stack: String,
    pub target: Option<String>,
    pub provisioner: Option<String>,
    pub project_id: Option<String>,
    pub region: Option<String>,
}

impl DeployParameters {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..Default::default()
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn provisioner(mut self, provisioner: impl Into<String>) -> Self {
        self.provisioner = Some(provisioner.into());
        self
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Outcome of resolution: everything needed to run a lifecycle operation.
pub struct Resolution {
    pub stack: Stack,
    pub target: Target,
    pub provisioner: Box<dyn Provisioner>,
}

impl Resolution {
    pub fn provisioner_kind(&self) -> ProvisionerKind {
        self.provisioner.kind()
    }
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("stack", &self.stack.name())
            .field("target", &self.target)
            .field("provisioner", &self.provisioner.kind())
            .finish()
    }
}

/// Picks and builds the target and provisioner for a stack.
#[derive(Debug, Clone)]
pub struct Resolver {
    catalog: StackCatalog,
    session: Arc<Session>,
    factory: ProvisionerFactory,
}

impl Resolver {
    pub fn new(catalog: StackCatalog, session: Arc<Session>, factory: ProvisionerFactory) -> Self {
        Self {
            catalog,
            session,
            factory,
        }
    }

    pub fn catalog(&self) -> &StackCatalog {
        &self.catalog
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Resolve the effective target and provisioner.
    ///
    /// Explicit values win over stack defaults. Overrides are merged into
    /// the stack's base configuration for the target; unset overrides leave
    /// the base untouched.
    pub fn resolve(&self, params: &DeployParameters) -> CoreResult<Resolution> {
        let stack = self.catalog.get(&params.stack)?;

        let target_name = params
            .target
            .clone()
            .unwrap_or_else(|| stack.config.target.clone());
        let target_kind: TargetKind = target_name.parse()?;

        let provisioner_kind = match &params.provisioner {
            Some(name) => name.parse::<ProvisionerKind>()?,
            None => stack.config.default_provisioner,
        };
        if !stack.supports(provisioner_kind) {
            return Err(CoreError::Configuration(format!(
                "stack {} has no {} definitions (available: {})",
                stack.name(),
                provisioner_kind,
                stack
                    .config
                    .supported_provisioners()
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        // Base config is keyed by the target's canonical name.
        let mut config = stack.target_config(target_kind.as_str());
        if let Some(region) = &params.region {
            config.insert("region".to_string(), Value::String(region.clone()));
            if target_kind == TargetKind::Gcp {
                config.insert("zone".to_string(), Value::String(format!("{}-a", region)));
            }
        }
        if let Some(project_id) = &params.project_id {
            config.insert("project_id".to_string(), Value::String(project_id.clone()));
        }

        let target = Target::resolve(target_kind, config, &self.session)?;
        debug!("Resolved target {:?}", target);

        let provisioner = self.factory.create(&stack, &target, provisioner_kind)?;
        info!(
            "Resolved stack {} -> {} with {}",
            stack.name(),
            target.name(),
            provisioner_kind
        );

        Ok(Resolution {
            stack,
            target,
            provisioner,
        })
    }
}
