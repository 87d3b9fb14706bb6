//! Normalization of backend output mappings.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{IacError, IacResult};

/// Flat output mapping returned by every provisioner.
pub type Outputs = BTreeMap<String, String>;

/// Marker substituted for outputs the backend flags as sensitive.
pub const REDACTED: &str = "[SENSITIVE]";

/// Marker Pulumi prints in place of secret output values.
const PULUMI_SECRET: &str = "[secret]";

/// Render a JSON value as an output string. Strings are kept verbatim,
/// everything else is rendered as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalize `terraform output -json`.
///
/// Each entry is `{"value": ..., "sensitive": bool, "type": ...}`.
pub fn normalize_terraform_outputs(raw: &str) -> IacResult<Outputs> {
    let parsed: Value = serde_json::from_str(raw.trim())?;
    let Value::Object(entries) = parsed else {
        return Err(IacError::operation(
            "terraform output",
            "expected a JSON object of outputs",
        ));
    };

    Ok(entries
        .into_iter()
        .map(|(key, entry)| {
            let sensitive = entry
                .get("sensitive")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let value = if sensitive {
                REDACTED.to_string()
            } else {
                entry.get("value").map(value_to_string).unwrap_or_default()
            };
            (key, value)
        })
        .collect())
}

/// Normalize `pulumi stack output --json`, a flat object whose secret
/// values are printed as `[secret]`.
pub fn normalize_pulumi_outputs(raw: &str) -> IacResult<Outputs> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Outputs::new());
    }
    let parsed: Value = serde_json::from_str(trimmed)?;
    let Value::Object(entries) = parsed else {
        return Err(IacError::operation(
            "pulumi stack output",
            "expected a JSON object of outputs",
        ));
    };

    Ok(entries
        .into_iter()
        .map(|(key, value)| {
            let rendered = value_to_string(&value);
            if rendered == PULUMI_SECRET {
                (key, REDACTED.to_string())
            } else {
                (key, rendered)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terraform_sensitive_outputs_are_redacted() {
        let raw = r#"{
            "app_url": {"value": "https://x", "sensitive": false, "type": "string"},
            "db_password": {"value": "p", "sensitive": true, "type": "string"}
        }"#;

        let outputs = normalize_terraform_outputs(raw).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["app_url"], "https://x");
        assert_eq!(outputs["db_password"], REDACTED);
    }

    #[test]
    fn test_terraform_non_string_values_render_as_json() {
        let raw = r#"{
            "ports": {"value": [80, 443], "sensitive": false},
            "replicas": {"value": 3}
        }"#;

        let outputs = normalize_terraform_outputs(raw).unwrap();
        assert_eq!(outputs["ports"], "[80,443]");
        assert_eq!(outputs["replicas"], "3");
    }

    #[test]
    fn test_terraform_empty_object() {
        assert!(normalize_terraform_outputs("{}").unwrap().is_empty());
    }

    #[test]
    fn test_terraform_rejects_non_object() {
        assert!(normalize_terraform_outputs("[]").is_err());
        assert!(normalize_terraform_outputs("not json").is_err());
    }

    #[test]
    fn test_pulumi_secret_is_redacted() {
        let raw = r#"{"url": "https://svc", "password": "[secret]", "count": 2}"#;
        let outputs = normalize_pulumi_outputs(raw).unwrap();

        assert_eq!(outputs["url"], "https://svc");
        assert_eq!(outputs["password"], REDACTED);
        assert_eq!(outputs["count"], "2");
    }

    #[test]
    fn test_pulumi_empty_output() {
        assert!(normalize_pulumi_outputs("  \n").unwrap().is_empty());
    }
}
