//! Line-oriented parser for Terraform and Pulumi progress output.
//!
//! Pattern classes are tried in a fixed order: resource operations,
//! diagnostics, key-value outputs, then stack-level lines. The first class
//! with a matching pattern wins, and within a class the first matching
//! pattern wins. Lines that match nothing become [`EventKind::Unknown`].

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::event::{EventKind, LifecycleEvent};

/// Output keys that belong to stack summaries rather than program outputs.
const RESERVED_OUTPUT_KEYS: &[&str] = &["Resources", "Duration", "Plan", "Changes to Outputs"];

/// Stateless lifecycle event parser.
///
/// Holds only compiled patterns, so a single instance can be shared across
/// threads and streams.
#[derive(Debug)]
pub struct LifecycleParser {
    terraform_resource: Vec<(EventKind, Regex)>,
    terraform_still: Regex,
    pulumi_resource: Regex,
    pulumi_update_tick: Regex,
    diagnostic_scoped: Regex,
    diagnostic: Regex,
    resource_in_message: Regex,
    output_assignment: Regex,
    output_key_value: Regex,
    stack_header: Regex,
    stack_resources: Regex,
    stack_duration: Regex,
    stack_complete: Regex,
    stack_plan: Regex,
    stack_initialized: Regex,
    stack_count: Regex,
    stack_no_changes: Regex,
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("lifecycle patterns are static and valid")
}

impl Default for LifecycleParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleParser {
    pub fn new() -> Self {
        let address = r"(?P<addr>[^\s:]+\.[^\s:]+)";
        Self {
            terraform_resource: vec![
                (
                    EventKind::ResourceCreated,
                    compile(&format!(r"^{address}: Creation complete after (?P<duration>\S+)")),
                ),
                (
                    EventKind::ResourceUpdated,
                    compile(&format!(r"^{address}: Modifications complete after (?P<duration>\S+)")),
                ),
                (
                    EventKind::ResourceDestroyed,
                    compile(&format!(r"^{address}: Destruction complete after (?P<duration>\S+)")),
                ),
                (EventKind::ResourceCreating, compile(&format!(r"^{address}: Creating\.\.\."))),
                (EventKind::ResourceUpdating, compile(&format!(r"^{address}: Modifying\.\.\."))),
                (EventKind::ResourceDestroying, compile(&format!(r"^{address}: Destroying\.\.\."))),
            ],
            terraform_still: compile(&format!(
                r"^{address}: Still (?P<verb>creating|modifying|destroying)\.\.\. \[(?P<duration>\S+) elapsed\]"
            )),
            pulumi_resource: compile(
                r"^(?P<op>\+-|-\+|[+\-~])\s+(?P<type>[^\s:]+:[^\s:]+:\S+)\s+(?P<name>\S+)(?:\s+(?P<status>[^(]+?))?(?:\s+\((?P<duration>[^)]+)\))?\s*$",
            ),
            pulumi_update_tick: compile(r"^@\s+(?P<op>\S+?)\.*$"),
            diagnostic_scoped: compile(
                r"^(?:│\s*)?(?P<level>(?i:error|warning|info)):\s+(?P<type>[^\s:]+:[^\s:]+:\S+)\s+(?P<message>.+)$",
            ),
            diagnostic: compile(r"^(?:│\s*)?(?P<level>(?i:error|warning|info)):\s+(?P<message>.+)$"),
            resource_in_message: compile(r"resource '(?P<name>[^']+)'"),
            output_assignment: compile(r"^(?P<key>[A-Za-z_][\w-]*)\s+=\s+(?P<value>.+)$"),
            output_key_value: compile(r"^(?P<key>[A-Za-z_][\w .\-]*?):\s+(?P<value>.+)$"),
            stack_header: compile(
                r"^(?P<op>Updating|Creating|Destroying|Previewing|Refreshing)\s+\((?P<stack>[^)]+)\):?$",
            ),
            stack_resources: compile(r"^Resources:(?:\s+(?P<summary>.+))?$"),
            stack_duration: compile(r"^Duration:\s+(?P<duration>\S+)$"),
            stack_complete: compile(r"^(?P<op>Apply|Destroy) complete! Resources: (?P<summary>.+)$"),
            stack_plan: compile(r"^Plan: (?P<summary>.+)$"),
            stack_initialized: compile(r"^(?:Terraform|OpenTofu) has been successfully initialized!"),
            stack_count: compile(
                r"^(?:[+\-~]\s*)?(?P<count>\d+)\s+(?P<what>created|updated|deleted|replaced|unchanged|to create|to update|to delete|to replace)$",
            ),
            stack_no_changes: compile(r"^No changes\."),
        }
    }

    /// Parse a single line.
    ///
    /// Returns `None` only for empty or whitespace-only lines; every other
    /// line yields exactly one event.
    pub fn parse_line(&self, line: &str) -> Option<LifecycleEvent> {
        let text = line.trim();
        if text.is_empty() {
            return None;
        }

        let event = self
            .parse_resource(text, line)
            .or_else(|| self.parse_diagnostic(text, line))
            .or_else(|| self.parse_output(text, line))
            .or_else(|| self.parse_stack(text, line))
            .unwrap_or_else(|| LifecycleEvent::unknown(line));

        Some(event)
    }

    /// Parse a whole block of output, one event per non-empty line.
    pub fn parse_output_text(&self, output: &str) -> Vec<LifecycleEvent> {
        output.lines().filter_map(|line| self.parse_line(line)).collect()
    }

    fn parse_resource(&self, text: &str, raw: &str) -> Option<LifecycleEvent> {
        for (kind, pattern) in &self.terraform_resource {
            if let Some(caps) = pattern.captures(text) {
                let mut event = terraform_event(*kind, &caps, raw);
                if let Some(duration) = caps.name("duration") {
                    event = event.with_duration(duration.as_str());
                }
                return Some(event);
            }
        }

        if let Some(caps) = self.terraform_still.captures(text) {
            let kind = match &caps["verb"] {
                "creating" => EventKind::ResourceCreating,
                "modifying" => EventKind::ResourceUpdating,
                _ => EventKind::ResourceDestroying,
            };
            return Some(terraform_event(kind, &caps, raw).with_duration(&caps["duration"]));
        }

        if let Some(caps) = self.pulumi_resource.captures(text) {
            let op = &caps["op"];
            let status = caps.name("status").map(|s| s.as_str().trim().to_string());
            let settled = status
                .as_deref()
                .map(|s| s.ends_with("ed") && !s.contains("failed"))
                .unwrap_or(false);
            let kind = match (op, settled) {
                ("+", true) => EventKind::ResourceCreated,
                ("+", false) => EventKind::ResourceCreating,
                ("-", true) => EventKind::ResourceDestroyed,
                ("-", false) => EventKind::ResourceDestroying,
                (_, true) => EventKind::ResourceUpdated,
                (_, false) => EventKind::ResourceUpdating,
            };
            let mut event = LifecycleEvent::new(kind, raw)
                .with_operation(op)
                .with_resource_type(&caps["type"])
                .with_resource_name(&caps["name"]);
            if let Some(status) = status {
                event = event.with_status(status);
            }
            if let Some(duration) = caps.name("duration") {
                event = event.with_duration(duration.as_str());
            }
            return Some(event);
        }

        self.pulumi_update_tick.captures(text).map(|caps| {
            LifecycleEvent::new(EventKind::StackLevel, raw)
                .with_operation("@")
                .with_message(&caps["op"])
        })
    }

    fn parse_diagnostic(&self, text: &str, raw: &str) -> Option<LifecycleEvent> {
        if let Some(caps) = self.diagnostic_scoped.captures(text) {
            let message = &caps["message"];
            let mut event = LifecycleEvent::new(EventKind::Diagnostic, raw)
                .with_status(caps["level"].to_lowercase())
                .with_resource_type(&caps["type"])
                .with_message(message);
            if let Some(found) = self.resource_in_message.captures(message) {
                event = event.with_resource_name(&found["name"]);
            }
            return Some(event);
        }

        self.diagnostic.captures(text).map(|caps| {
            LifecycleEvent::new(EventKind::Diagnostic, raw)
                .with_status(caps["level"].to_lowercase())
                .with_message(&caps["message"])
        })
    }

    fn parse_output(&self, text: &str, raw: &str) -> Option<LifecycleEvent> {
        let caps = self
            .output_assignment
            .captures(text)
            .or_else(|| self.output_key_value.captures(text))?;

        let key = caps["key"].trim();
        if RESERVED_OUTPUT_KEYS.contains(&key) {
            return None;
        }

        Some(
            LifecycleEvent::new(EventKind::Output, raw)
                .with_resource_name(key)
                .with_message(caps["value"].trim()),
        )
    }

    fn parse_stack(&self, text: &str, raw: &str) -> Option<LifecycleEvent> {
        if let Some(caps) = self.stack_header.captures(text) {
            return Some(
                LifecycleEvent::new(EventKind::StackLevel, raw)
                    .with_operation(&caps["op"])
                    .with_resource_name(&caps["stack"]),
            );
        }

        if self.stack_resources.is_match(text) {
            return Some(
                LifecycleEvent::new(EventKind::StackLevel, raw)
                    .with_operation("Resources")
                    .with_message(text),
            );
        }

        if let Some(caps) = self.stack_duration.captures(text) {
            return Some(
                LifecycleEvent::new(EventKind::StackLevel, raw).with_duration(&caps["duration"]),
            );
        }

        if let Some(caps) = self.stack_complete.captures(text) {
            return Some(
                LifecycleEvent::new(EventKind::StackLevel, raw)
                    .with_operation(&caps["op"])
                    .with_message(text),
            );
        }

        if self.stack_plan.is_match(text) {
            return Some(
                LifecycleEvent::new(EventKind::StackLevel, raw)
                    .with_operation("Plan")
                    .with_message(text),
            );
        }

        if self.stack_initialized.is_match(text) {
            return Some(
                LifecycleEvent::new(EventKind::StackLevel, raw)
                    .with_operation("init")
                    .with_message(text),
            );
        }

        if let Some(caps) = self.stack_count.captures(text) {
            return Some(
                LifecycleEvent::new(EventKind::StackLevel, raw)
                    .with_message(format!("{} {}", &caps["count"], &caps["what"])),
            );
        }

        self.stack_no_changes
            .is_match(text)
            .then(|| LifecycleEvent::new(EventKind::StackLevel, raw).with_message(text))
    }
}

/// Build a Terraform resource event from an address capture.
fn terraform_event(kind: EventKind, caps: &Captures<'_>, raw: &str) -> LifecycleEvent {
    let address = &caps["addr"];
    let (resource_type, resource_name) = split_address(address);
    LifecycleEvent::new(kind, raw)
        .with_resource_type(resource_type)
        .with_resource_name(resource_name)
}

/// Split a Terraform address into its resource type and name.
///
/// `module.app.aws_instance.web[0]` becomes `("aws_instance", "web[0]")`.
/// Dots inside index brackets are not separators.
fn split_address(address: &str) -> (&str, &str) {
    let mut depth = 0usize;
    let mut dots = Vec::new();
    for (index, ch) in address.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => dots.push(index),
            _ => {}
        }
    }

    match dots.as_slice() {
        [] => (address, address),
        [only] => (&address[..*only], &address[only + 1..]),
        [.., before, last] => (&address[before + 1..*last], &address[last + 1..]),
    }
}

fn shared() -> &'static LifecycleParser {
    static PARSER: OnceLock<LifecycleParser> = OnceLock::new();
    PARSER.get_or_init(LifecycleParser::new)
}

/// Parse a single line with the shared parser.
pub fn parse_line(line: &str) -> Option<LifecycleEvent> {
    shared().parse_line(line)
}

/// Parse a block of output with the shared parser.
pub fn parse_output(output: &str) -> Vec<LifecycleEvent> {
    shared().parse_output_text(output)
}
