//! Webhook ingestion for GitHub and GitLab.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256 for GitHub,
//!   static token comparison for GitLab)
//! - Normalization of the two provider schemas into a canonical [`Event`]

pub mod events;
pub mod gitlab;
pub mod parser;
pub mod signature;

pub use events::{Event, HookKind, Provider};
pub use gitlab::parse_gitlab;
pub use parser::{parse_github, ParseError};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_gitlab_token,
    verify_signature,
};
