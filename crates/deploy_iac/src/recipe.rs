//! Native recipes and their registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use deploy_cloud::gcp::GcpServices;
use deploy_cloud::Poller;
use deploy_events::{format_event, LifecycleEvent};
use tracing::debug;

use crate::config::Variables;
use crate::error::{IacError, IacResult};
use crate::outputs::{value_to_string, Outputs};
use crate::provisioner::ProgressSink;

/// Everything a recipe invocation can see.
#[derive(Clone)]
pub struct RecipeContext {
    /// Native backend directory of the stack
    pub working_dir: PathBuf,
    pub variables: Variables,
    pub gcp: GcpServices,
    pub poller: Poller,
    /// Present only when the caller asked for streamed progress
    pub sink: Option<ProgressSink>,
}

impl RecipeContext {
    pub fn new(working_dir: impl Into<PathBuf>, variables: Variables, gcp: GcpServices, poller: Poller) -> Self {
        Self {
            working_dir: working_dir.into(),
            variables,
            gcp,
            poller,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Option<ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// A required variable rendered as a string.
    pub fn var(&self, key: &str) -> IacResult<String> {
        self.variables
            .get(key)
            .map(value_to_string)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| IacError::Configuration(format!("missing required variable '{}'", key)))
    }

    pub fn var_or(&self, key: &str, default: &str) -> String {
        self.variables
            .get(key)
            .map(value_to_string)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// Report a lifecycle event to the progress sink, if any.
    pub fn progress(&self, event: &LifecycleEvent) {
        if let Some(sink) = &self.sink {
            sink(&format_event(event));
        }
    }
}

impl std::fmt::Debug for RecipeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeContext")
            .field("working_dir", &self.working_dir)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("streaming", &self.sink.is_some())
            .finish()
    }
}

/// A hand-written multi-resource deployment.
#[async_trait]
pub trait Recipe: Send + Sync {
    /// Registry key, matching the stack name.
    fn name(&self) -> &str;

    /// Create or reuse every resource and return the recipe outputs.
    async fn deploy(&self, ctx: &RecipeContext) -> IacResult<Outputs>;

    /// Remove every resource; absent resources count as removed.
    async fn destroy(&self, ctx: &RecipeContext) -> IacResult<()>;

    /// Describe what `deploy` would create.
    fn plan(&self, ctx: &RecipeContext) -> IacResult<String>;
}

/// Recipes by name.
#[derive(Default)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Arc<dyn Recipe>>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every recipe shipped with DeployBot.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::recipes::FastapiPostgres::new()));
        registry
    }

    /// Register a recipe under its `name()`, replacing any previous one.
    pub fn register(&mut self, recipe: Arc<dyn Recipe>) {
        let name = recipe.name().to_string();
        debug!("Registering recipe: {}", name);
        self.recipes.insert(name, recipe);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Recipe>> {
        self.recipes.get(name).cloned()
    }

    pub fn get_required(&self, name: &str) -> IacResult<Arc<dyn Recipe>> {
        self.get(name)
            .ok_or_else(|| IacError::RecipeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.recipes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

impl std::fmt::Debug for RecipeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeRegistry")
            .field("recipes", &self.names())
            .finish()
    }
}
