//! Normalized lifecycle events and their one-line rendering.

use serde::{Deserialize, Serialize};

/// Kind of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ResourceCreating,
    ResourceCreated,
    ResourceUpdating,
    ResourceUpdated,
    ResourceDestroying,
    ResourceDestroyed,
    Diagnostic,
    StackLevel,
    Output,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ResourceCreating => "resource-creating",
            EventKind::ResourceCreated => "resource-created",
            EventKind::ResourceUpdating => "resource-updating",
            EventKind::ResourceUpdated => "resource-updated",
            EventKind::ResourceDestroying => "resource-destroying",
            EventKind::ResourceDestroyed => "resource-destroyed",
            EventKind::Diagnostic => "diagnostic",
            EventKind::StackLevel => "stack-level",
            EventKind::Output => "output",
            EventKind::Unknown => "unknown",
        }
    }

    /// Whether the event describes a single resource transition.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            EventKind::ResourceCreating
                | EventKind::ResourceCreated
                | EventKind::ResourceUpdating
                | EventKind::ResourceUpdated
                | EventKind::ResourceDestroying
                | EventKind::ResourceDestroyed
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized progress record derived from one line of backend output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    /// Resource type (`aws_instance`, `gcp:storage:Bucket`)
    pub resource_type: Option<String>,
    /// Resource name, output key, or stack name depending on the kind
    pub resource_name: Option<String>,
    /// Backend operation marker (`+`, `~`, `Updating`, `Apply`)
    pub operation: Option<String>,
    /// Backend status word, or the severity of a diagnostic
    pub status: Option<String>,
    pub duration: Option<String>,
    pub message: Option<String>,
    /// The line exactly as it was received
    pub raw_line: String,
}

impl LifecycleEvent {
    /// Create an event carrying only its kind and raw line.
    pub fn new(kind: EventKind, raw_line: impl Into<String>) -> Self {
        Self {
            kind,
            resource_type: None,
            resource_name: None,
            operation: None,
            status: None,
            duration: None,
            message: None,
            raw_line: raw_line.into(),
        }
    }

    /// Fallback event for a line no pattern recognised.
    pub fn unknown(raw_line: impl Into<String>) -> Self {
        let raw_line = raw_line.into();
        let message = raw_line.trim().to_string();
        Self::new(EventKind::Unknown, raw_line).with_message(message)
    }

    /// Build a resource transition event without a backend line, for
    /// progress reported by native recipes.
    pub fn resource(
        kind: EventKind,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        let resource_type = resource_type.into();
        let resource_name = resource_name.into();
        let raw_line = format!("{}.{}: {}", resource_type, resource_name, kind);
        Self::new(kind, raw_line)
            .with_resource_type(resource_type)
            .with_resource_name(resource_name)
    }

    /// Build a stack-level event carrying a free-text message.
    pub fn stack(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(EventKind::StackLevel, message.clone()).with_message(message)
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn subject(&self) -> &str {
        self.resource_name
            .as_deref()
            .or(self.resource_type.as_deref())
            .unwrap_or("resource")
    }

    fn duration_suffix(&self) -> String {
        self.duration
            .as_ref()
            .map(|d| format!(" ({})", d))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_event(self))
    }
}

/// Render an event as a short, iconographic one-line summary.
///
/// Unknown events render as their raw line, unchanged.
pub fn format_event(event: &LifecycleEvent) -> String {
    match event.kind {
        EventKind::ResourceCreating => format!("🔨 Creating {}...", event.subject()),
        EventKind::ResourceCreated => {
            format!("✅ Created {}{}", event.subject(), event.duration_suffix())
        }
        EventKind::ResourceUpdating => format!("🔧 Updating {}...", event.subject()),
        EventKind::ResourceUpdated => {
            format!("✅ Updated {}{}", event.subject(), event.duration_suffix())
        }
        EventKind::ResourceDestroying => format!("🗑️ Destroying {}...", event.subject()),
        EventKind::ResourceDestroyed => {
            format!("✅ Destroyed {}{}", event.subject(), event.duration_suffix())
        }
        EventKind::Diagnostic => {
            let message = event.message.as_deref().unwrap_or(event.raw_line.trim());
            match event.status.as_deref() {
                Some("error") => format!("❌ Error: {}", message),
                Some("warning") => format!("⚠️ Warning: {}", message),
                _ => format!("ℹ️ Info: {}", message),
            }
        }
        EventKind::Output => format!(
            "📋 {}: {}",
            event.resource_name.as_deref().unwrap_or("output"),
            event.message.as_deref().unwrap_or_default()
        ),
        EventKind::StackLevel => match (&event.operation, &event.resource_name) {
            (Some(operation), Some(stack)) => format!("🔄 {} {}", operation, stack),
            _ if event.message.is_none() && event.duration.is_some() => {
                format!("⏱️ Duration: {}", event.duration.as_deref().unwrap_or_default())
            }
            _ => format!(
                "📊 {}",
                event.message.as_deref().unwrap_or(event.raw_line.trim())
            ),
        },
        EventKind::Unknown => event.raw_line.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_renders_raw_line() {
        let event = LifecycleEvent::unknown("  some odd line ");
        assert_eq!(format_event(&event), "  some odd line ");
        assert_eq!(event.message.as_deref(), Some("some odd line"));
    }

    #[test]
    fn test_created_includes_duration() {
        let event = LifecycleEvent::resource(EventKind::ResourceCreated, "aws_instance", "web")
            .with_duration("12s");
        assert_eq!(format_event(&event), "✅ Created web (12s)");
    }

    #[test]
    fn test_diagnostic_severity_icons() {
        let error = LifecycleEvent::new(EventKind::Diagnostic, "error: boom")
            .with_status("error")
            .with_message("boom");
        let warning = LifecycleEvent::new(EventKind::Diagnostic, "warning: hm")
            .with_status("warning")
            .with_message("hm");

        assert_eq!(format_event(&error), "❌ Error: boom");
        assert_eq!(format_event(&warning), "⚠️ Warning: hm");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::ResourceDestroyed).unwrap();
        assert_eq!(json, "\"resource_destroyed\"");
        assert_eq!(EventKind::ResourceDestroyed.to_string(), "resource-destroyed");
    }
}
