//! # Link Harness Core
//!
//! I/O-free logic for Link Harness: link and document models, the
//! append-only changelog, complete-URL and lookup-identifier extraction,
//! and the per-link edit rules.
//!
//! This crate contains no tokio, zip, filesystem, or network dependencies.
//! Everything here is deterministic and unit-testable in isolation; the
//! `link-harness` crate applies the results to real packages.

pub mod changelog;
pub mod identifier;
pub mod models;
pub mod rules;
