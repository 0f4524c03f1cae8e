//! # Link Harness
//!
//! Batch repair, annotation and retargeting of hyperlinks inside
//! word-processing packages (`.docx`), driven by metadata from an external
//! lookup service.
//!
//! Every document is edited inside a single session: the package is opened
//! once, all structural edits are made on that one in-memory handle, the
//! integrity guard validates the package after each editing stage, and the
//! result is either saved and re-verified or rolled back from a backup.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌─────────────────────┐
//! │    batch     │──▶│      session       │──▶│ extract → prune →   │
//! │ worker pool  │   │ open once, save,   │   │ resolve → mutate →  │
//! │ + aggregate  │   │ verify, recover    │   │ replace → optimize  │
//! └──────────────┘   └─────────┬──────────┘   └──────────┬──────────┘
//!                              │                         │
//!                              ▼                         ▼
//!                        ┌──────────┐             ┌────────────┐
//!                        │  retry   │             │  validate  │
//!                        └──────────┘             └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lnk scan ./policies                 # list hyperlinks and identifiers
//! lnk validate ./policies             # run the integrity guard only
//! lnk process ./policies --report-dir ./reports
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`xml`] | Owned XML element tree |
//! | [`package`] | Zip package handle: parts, relationships, atomic save |
//! | [`validate`] | Integrity guard and ignorable-error allowlist |
//! | [`extract`] | Hyperlink extraction, re-location, document metadata |
//! | [`prune`] | Invisible hyperlink removal |
//! | [`resolver`] | Lookup service client and per-link resolution |
//! | [`mutation`] | Retarget and display-text rewrite with rollback |
//! | [`replace`] | Text replacement and optimization passes |
//! | [`session`] | Session coordinator state machine |
//! | [`backup`] | File-level backups for recovery |
//! | [`batch`] | Bounded worker pool and aggregate statistics |
//! | [`retry`] | Retry policies with backoff and jitter |
//! | [`progress`] | Session and batch progress sinks |
//! | [`discover`] | Input path expansion |
//! | [`commands`] | `lnk` subcommand implementations |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error taxonomy |
//!
//! Link models, identifier extraction, edit rules and the changelog live in
//! the I/O-free `link-harness-core` crate.

pub mod backup;
pub mod batch;
pub mod commands;
pub mod config;
pub mod discover;
pub mod error;
pub mod extract;
pub mod mutation;
pub mod package;
pub mod progress;
pub mod prune;
pub mod replace;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod validate;
pub mod xml;
