//! # deploy_events
//!
//! Lifecycle event parsing for DeployBot.
//!
//! Provisioning backends report progress as free-form text. This crate turns
//! each line of that text into a [`LifecycleEvent`] and renders events as
//! short one-line summaries for progress displays.
//!
//! ## Guarantees
//!
//! - Every non-empty line yields exactly one event; unrecognised lines become
//!   [`EventKind::Unknown`] carrying the raw line.
//! - The parser holds no mutable state and may be shared across streams.
//!
//! ## Example
//!
//! ```rust
//! use deploy_events::{format_event, parse_line, EventKind};
//!
//! let event = parse_line("aws_instance.web: Creation complete after 12s").unwrap();
//! assert_eq!(event.kind, EventKind::ResourceCreated);
//! assert_eq!(format_event(&event), "✅ Created web (12s)");
//! ```

pub mod event;
pub mod parser;

pub use event::{format_event, EventKind, LifecycleEvent};
pub use parser::{parse_line, parse_output, LifecycleParser};
