//! Native-recipe strategy: Rust recipes calling cloud APIs directly.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use deploy_cloud::gcp::GcpServices;
use deploy_cloud::Poller;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{ProvisionerConfig, Variables};
use crate::error::{IacError, IacResult};
use crate::outputs::Outputs;
use crate::provisioner::{require_entrypoint, ProgressSink, Provisioner, ProvisionerKind};
use crate::recipe::{Recipe, RecipeContext, RecipeRegistry};

/// Marker file identifying a native backend directory.
pub const RECIPE_MARKER: &str = "recipe.yaml";

/// Variables side file written by `init` and read back by the recipe.
pub const VARIABLES_FILE: &str = "variables.json";

/// Contents of `recipe.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeManifest {
    /// Recipe to run; defaults to the stack name
    #[serde(default)]
    pub recipe: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Runs a registered recipe against GCP services.
pub struct NativeProvisioner {
    config: ProvisionerConfig,
    registry: Arc<RecipeRegistry>,
    services: GcpServices,
    poller: Poller,
}

impl NativeProvisioner {
    pub fn new(
        config: ProvisionerConfig,
        registry: Arc<RecipeRegistry>,
        services: GcpServices,
        poller: Poller,
    ) -> Self {
        Self {
            config,
            registry,
            services,
            poller,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    fn manifest(&self) -> IacResult<RecipeManifest> {
        let path = self.config.working_dir.join(RECIPE_MARKER);
        let text = std::fs::read_to_string(&path)?;
        if text.trim().is_empty() {
            return Ok(RecipeManifest::default());
        }
        Ok(serde_yaml::from_str(&text)?)
    }

    fn recipe(&self) -> IacResult<Arc<dyn Recipe>> {
        let name = self
            .manifest()?
            .recipe
            .unwrap_or_else(|| self.config.stack_name.clone());
        self.registry.get_required(&name)
    }

    fn read_variables(&self) -> IacResult<Variables> {
        let path = self.config.working_dir.join(VARIABLES_FILE);
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn context(&self, sink: Option<ProgressSink>) -> IacResult<RecipeContext> {
        self.init().await?;
        let mut variables = self.read_variables()?;
        for (key, value) in &self.config.provider_variables {
            variables.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(RecipeContext::new(
            &self.config.working_dir,
            variables,
            self.services.clone(),
            self.poller.clone(),
        )
        .with_sink(sink))
    }
}

#[async_trait]
impl Provisioner for NativeProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Native
    }

    fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    async fn validate(&self) -> IacResult<()> {
        require_entrypoint(&self.config.working_dir, RECIPE_MARKER)
    }

    async fn init(&self) -> IacResult<()> {
        let resolved = self.config.resolve()?;
        let path = self.config.working_dir.join(VARIABLES_FILE);
        let contents = serde_json::to_string_pretty(&resolved.variables)?;
        std::fs::write(&path, contents).map_err(|e| {
            IacError::operation("native init", format!("{}: {}", path.display(), e))
        })?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    async fn apply(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<Outputs> {
        let sink = if streaming { sink } else { None };
        let result = async {
            let recipe = self.recipe()?;
            let ctx = self.context(sink).await?;
            info!("Deploying recipe {}", recipe.name());
            recipe.deploy(&ctx).await
        }
        .await;
        result.map_err(|e| e.into_operation("native apply"))
    }

    async fn destroy(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<()> {
        let sink = if streaming { sink } else { None };
        let result = async {
            let recipe = self.recipe()?;
            let ctx = self.context(sink).await?;
            info!("Destroying recipe {}", recipe.name());
            recipe.destroy(&ctx).await
        }
        .await;
        result.map_err(|e| e.into_operation("native destroy"))
    }

    async fn plan(&self) -> IacResult<String> {
        let result = async {
            let recipe = self.recipe()?;
            let ctx = self.context(None).await?;
            recipe.plan(&ctx)
        }
        .await;
        result.map_err(|e| e.into_operation("native plan"))
    }
}
