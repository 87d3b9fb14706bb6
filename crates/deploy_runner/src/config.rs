//! Command and run configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Description of one external program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute (`terraform`, `pulumi`, `gcloud`)
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the caller's when unset
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment
    pub env: HashMap<String, String>,
    /// Values masked as `***` when the command is displayed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            secrets: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Append an argument that is masked in [`display`](Self::display).
    pub fn secret_arg(self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        self.redact(arg.clone()).arg(arg)
    }

    /// Mask `value` wherever it occurs inside an argument.
    pub fn redact(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
        self
    }

    /// Render the invocation as a shell-like string for logs.
    ///
    /// Redacted values are replaced with `***`.
    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            let arg = self
                .secrets
                .iter()
                .fold(arg.clone(), |shown, secret| shown.replace(secret.as_str(), "***"));
            if arg.contains(' ') || arg.contains('=') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push(' ');
                cmd.push_str(&arg);
            }
        }
        cmd
    }
}

/// Run configuration with timeout and streaming switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Whether to hand each output line to the log handler as it arrives
    pub stream_logs: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 0,
            stream_logs: false,
        }
    }
}

impl RunConfig {
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn stream(mut self) -> Self {
        self.stream_logs = true;
        self
    }

    pub fn stream_logs(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_config_builder() {
        let config = CommandConfig::new("terraform")
            .arg("apply")
            .args(["-auto-approve", "-input=false"])
            .working_dir("/tmp/stack")
            .env("TF_IN_AUTOMATION", "1");

        assert_eq!(config.args, vec!["apply", "-auto-approve", "-input=false"]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp/stack")));
        assert_eq!(config.env.get("TF_IN_AUTOMATION"), Some(&"1".to_string()));
        assert_eq!(
            config.display(),
            "terraform apply -auto-approve '-input=false'"
        );
    }

    #[test]
    fn test_display_masks_secrets() {
        let config = CommandConfig::new("gcloud")
            .args(["sql", "users", "create", "app", "--password"])
            .secret_arg("s3cret")
            .arg("--set-env-vars")
            .arg("DB_USER=app,DB_PASSWORD=s3cret")
            .redact("");

        let shown = config.display();
        assert!(!shown.contains("s3cret"));
        assert_eq!(
            shown,
            "gcloud sql users create app --password *** --set-env-vars 'DB_USER=app,DB_PASSWORD=***'"
        );
        assert_eq!(config.args[5], "s3cret");
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.timeout_seconds, 0);
        assert!(!config.stream_logs);

        let config = RunConfig::default().timeout(30).stream();
        assert_eq!(config.timeout_seconds, 30);
        assert!(config.stream_logs);
    }
}
