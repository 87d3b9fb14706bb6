//! Integration tests replaying captured backend output through the parser.

use deploy_events::{format_event, parse_output, EventKind, LifecycleParser};

const TERRAFORM_APPLY: &str = r#"
Terraform used the selected providers to generate the following execution plan.
Plan: 2 to add, 0 to change, 0 to destroy.
google_storage_bucket.assets: Creating...
google_sql_database_instance.main: Creating...
google_storage_bucket.assets: Creation complete after 2s [id=assets]
google_sql_database_instance.main: Still creating... [10s elapsed]
google_sql_database_instance.main: Creation complete after 8m12s [id=main]

Apply complete! Resources: 2 added, 0 changed, 0 destroyed.

Outputs:

app_url = "https://app.example.run.app"
"#;

const PULUMI_UP: &str = r#"
Updating (dev):
@ updating....
+  pulumi:pulumi:Stack web-dev creating (0s)
+  pulumi:providers:gcp default_8_36_0 creating (0s)
+  gcp:storage:Bucket assets created (2s)
error: pulumi:providers:gcp resource 'default_8_36_0' has a problem
Outputs:
    bucketUrl: "gs://assets"
Resources:
    + 3 created
Duration: 23s
"#;

#[test]
fn test_terraform_apply_replay_is_one_event_per_line() {
    let non_empty = TERRAFORM_APPLY.lines().filter(|l| !l.trim().is_empty()).count();
    let events = parse_output(TERRAFORM_APPLY);
    assert_eq!(events.len(), non_empty);

    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds[1], EventKind::StackLevel);
    assert_eq!(kinds[2], EventKind::ResourceCreating);
    assert_eq!(kinds[4], EventKind::ResourceCreated);
    assert_eq!(kinds[5], EventKind::ResourceCreating);
    assert_eq!(kinds[6], EventKind::ResourceCreated);
    assert_eq!(kinds[7], EventKind::StackLevel);
    assert_eq!(*kinds.last().unwrap(), EventKind::Output);
}

#[test]
fn test_pulumi_up_replay_is_one_event_per_line() {
    let non_empty = PULUMI_UP.lines().filter(|l| !l.trim().is_empty()).count();
    let events = parse_output(PULUMI_UP);
    assert_eq!(events.len(), non_empty);

    assert_eq!(events[0].kind, EventKind::StackLevel);
    assert_eq!(events[2].resource_type.as_deref(), Some("pulumi:pulumi:Stack"));
    assert_eq!(events[4].kind, EventKind::ResourceCreated);
    assert_eq!(events[5].kind, EventKind::Diagnostic);
    assert_eq!(events[5].status.as_deref(), Some("error"));

    let output = events
        .iter()
        .find(|e| e.kind == EventKind::Output)
        .expect("bucketUrl output");
    assert_eq!(output.resource_name.as_deref(), Some("bucketUrl"));

    let duration = events.last().unwrap();
    assert_eq!(duration.duration.as_deref(), Some("23s"));
}

#[test]
fn test_unknown_lines_are_preserved_verbatim() {
    let parser = LifecycleParser::new();
    for line in [
        "Terraform will perform the following actions:",
        "  # google_storage_bucket.assets will be created",
        "Do you want to perform these actions?",
    ] {
        let event = parser.parse_line(line).unwrap();
        assert_eq!(event.kind, EventKind::Unknown, "line: {line}");
        assert_eq!(event.raw_line, line);
        assert_eq!(format_event(&event), line);
    }
}

#[test]
fn test_parser_is_shareable_across_threads() {
    let parser = std::sync::Arc::new(LifecycleParser::new());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let parser = parser.clone();
            std::thread::spawn(move || {
                let line = format!("aws_instance.web{i}: Creation complete after {i}s");
                parser.parse_line(&line).unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let event = handle.join().unwrap();
        assert_eq!(event.resource_name, Some(format!("web{i}")));
        assert_eq!(event.duration, Some(format!("{i}s")));
    }
}
