//! Webhook relay for GitHub and GitLab repository events.
//!
//! This library verifies inbound webhook deliveries, normalizes the two
//! provider schemas into a canonical event, filters and routes events
//! through a configurable rule set, and runs the configured actions as
//! subprocesses under per-rungroup mutual exclusion.

pub mod actions;
pub mod config;
pub mod debounce;
pub mod filter;
pub mod hooks;
pub mod pipeline;
pub mod report;
pub mod rungroup;
pub mod server;
pub mod shorten;
pub mod webhooks;
