//! Provisioner configuration and variable resolution.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IacError, IacResult};
use crate::outputs::value_to_string;

/// Flat variable mapping handed to a backend.
pub type Variables = BTreeMap<String, Value>;

/// Logical stack name used by automation backends unless overridden.
pub const DEFAULT_LOGICAL_STACK: &str = "dev";

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("valid reference pattern")
    })
}

/// Everything a provisioner needs to drive its backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Backend directory (`<stack>/<provisioner>/<target>`)
    pub working_dir: PathBuf,
    /// Target name (`gcp`, `aws`, `onprem`)
    pub provider: String,
    /// Name of the deployable stack
    pub stack_name: String,
    pub variables: Variables,
    /// Provider identity settings pushed ahead of `variables` (`gcp:project`)
    pub provider_variables: Variables,
    /// Logical stack for automation backends
    pub logical_stack: String,
}

impl ProvisionerConfig {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            provider: String::new(),
            stack_name: String::new(),
            variables: Variables::new(),
            provider_variables: Variables::new(),
            logical_stack: DEFAULT_LOGICAL_STACK.to_string(),
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn stack_name(mut self, name: impl Into<String>) -> Self {
        self.stack_name = name.into();
        self
    }

    pub fn variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn provider_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.provider_variables.insert(key.into(), value.into());
        self
    }

    pub fn logical_stack(mut self, name: impl Into<String>) -> Self {
        self.logical_stack = name.into();
        self
    }

    /// Look up a variable rendered as a string.
    pub fn variable_str(&self, key: &str) -> Option<String> {
        self.variables.get(key).map(value_to_string)
    }

    /// Return a copy whose variables contain no `${name}` references.
    ///
    /// References resolve against `variables` first, then
    /// `provider_variables`. Unknown and cyclic references are
    /// configuration errors.
    pub fn resolve(&self) -> IacResult<Self> {
        let mut resolved = self.clone();
        let mut cache: BTreeMap<String, String> = BTreeMap::new();

        for key in self.variables.keys() {
            if let Some(Value::String(_)) = self.variables.get(key) {
                let mut visiting = HashSet::new();
                let value = self.expand(key, &mut visiting, &mut cache)?;
                resolved.variables.insert(key.clone(), Value::String(value));
            }
        }
        for (key, value) in &self.provider_variables {
            if let Value::String(text) = value {
                let mut visiting = HashSet::new();
                let expanded = self.expand_text(key, text, &mut visiting, &mut cache)?;
                resolved
                    .provider_variables
                    .insert(key.clone(), Value::String(expanded));
            }
        }
        Ok(resolved)
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables
            .get(name)
            .or_else(|| self.provider_variables.get(name))
    }

    fn expand(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        cache: &mut BTreeMap<String, String>,
    ) -> IacResult<String> {
        if let Some(done) = cache.get(name) {
            return Ok(done.clone());
        }
        let value = self.lookup(name).ok_or_else(|| {
            IacError::Configuration(format!("unknown variable reference ${{{}}}", name))
        })?;
        let expanded = match value {
            Value::String(text) => self.expand_text(name, text, visiting, cache)?,
            other => value_to_string(other),
        };
        cache.insert(name.to_string(), expanded.clone());
        Ok(expanded)
    }

    fn expand_text(
        &self,
        owner: &str,
        text: &str,
        visiting: &mut HashSet<String>,
        cache: &mut BTreeMap<String, String>,
    ) -> IacResult<String> {
        if !visiting.insert(owner.to_string()) {
            return Err(IacError::Configuration(format!(
                "cyclic variable reference through {}",
                owner
            )));
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for captures in reference_pattern().captures_iter(text) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            out.push_str(&self.expand(name.as_str(), visiting, cache)?);
            last = whole.end();
        }
        out.push_str(&text[last..]);

        visiting.remove(owner);
        Ok(out)
    }
}
