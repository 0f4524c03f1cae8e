//! Session coordinator: one document, one open handle, one transaction.
//!
//! A session takes a file from `Opened` to `Closed`:
//!
//! ```text
//! Opened → Validated → Snapshotted → MetadataExtracted → LinksExtracted
//!        → Pruned → Resolved → Mutated → Replaced → Optimized
//!        → Saved → Verified → Closed
//! ```
//!
//! Any stage may move the session to `Failed`. The integrity guard runs
//! after every stage that edits the package and once more, through a fresh
//! read-only handle, after the write handle has been released by the save.
//! Backup and save go through the file I/O retry policy; opening and
//! verification through the package policy.
//!
//! Failures never escape [`SessionCoordinator::process`]: they become a
//! `Failed` (or, after a successful restore from backup, `Recovered`)
//! [`Document`] carrying the error message. Restoring ignores cancellation
//! and is bounded by its own timeouts instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use link_harness_core::changelog::{ChangeEntry, ChangeType};
use link_harness_core::models::{Document, DocumentStatus};
use link_harness_core::rules::RuleOptions;

use crate::backup::BackupStore;
use crate::config::{Config, Replacement};
use crate::error::SessionError;
use crate::extract::{collect_lookup_ids, extract_hyperlinks, extract_metadata, reconcile};
use crate::mutation::MutationEngine;
use crate::package::{persist_bytes, OpenMode, Package};
use crate::progress::SessionProgress;
use crate::prune::prune_invisible;
use crate::replace::{optimize, TextReplacer};
use crate::resolver::{apply_resolution, LookupClient, MetadataResolver};
use crate::retry::{self, RetryPolicies};
use crate::validate::{Allowlist, Checkpoint, IntegrityGuard};

/// Stages of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    Validated,
    Snapshotted,
    MetadataExtracted,
    LinksExtracted,
    Pruned,
    Resolved,
    Mutated,
    Replaced,
    Optimized,
    Saved,
    Verified,
    Closed,
    Failed,
}

impl SessionState {
    /// Status string sent to the session's progress sink.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Opened => "opened",
            SessionState::Validated => "validated",
            SessionState::Snapshotted => "snapshotted",
            SessionState::MetadataExtracted => "metadata extracted",
            SessionState::LinksExtracted => "links extracted",
            SessionState::Pruned => "pruned",
            SessionState::Resolved => "resolved",
            SessionState::Mutated => "mutated",
            SessionState::Replaced => "replaced",
            SessionState::Optimized => "optimized",
            SessionState::Saved => "saved",
            SessionState::Verified => "verified",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

/// Everything a session needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub rules: RuleOptions,
    pub prune_invisible: bool,
    pub policies: RetryPolicies,
    pub lookup_budget: Duration,
    pub restore_timeout: Duration,
    pub restore_retry_timeout: Duration,
    pub allowlist: Allowlist,
    pub replacements: Vec<Replacement>,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rules: config.links.rule_options(),
            prune_invisible: config.links.prune_invisible,
            policies: config.retry.clone(),
            lookup_budget: config.lookup.budget(),
            restore_timeout: Duration::from_secs(config.backup.restore_timeout_secs),
            restore_retry_timeout: Duration::from_secs(config.backup.restore_retry_timeout_secs),
            allowlist: config.validation.allowlist(),
            replacements: config.replacements.clone(),
        }
    }
}

/// Serializes sessions that open the same path.
///
/// Entries nobody holds or waits on are dropped on the next call.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub async fn lock(&self, path: &Path) -> tokio::sync::OwnedMutexGuard<()> {
        let key = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct SessionCoordinator {
    guard: IntegrityGuard,
    resolver: MetadataResolver,
    engine: MutationEngine,
    replacer: TextReplacer,
    backups: Option<Arc<dyn BackupStore>>,
    options: SessionOptions,
    locks: PathLocks,
}

impl SessionCoordinator {
    /// Fails when a replacement pattern cannot be compiled.
    pub fn new(
        options: SessionOptions,
        client: Arc<dyn LookupClient>,
        backups: Option<Arc<dyn BackupStore>>,
    ) -> anyhow::Result<Self> {
        let replacer = TextReplacer::new(&options.replacements)?;
        Ok(Self {
            guard: IntegrityGuard::new(options.allowlist.clone()),
            resolver: MetadataResolver::new(client, options.policies.network.clone(), options.lookup_budget),
            engine: MutationEngine::new(options.rules.clone()),
            replacer,
            backups,
            options,
            locks: PathLocks::default(),
        })
    }

    /// Process one file. The returned document's status reports the outcome.
    pub async fn process(
        &self,
        path: &Path,
        progress: &dyn SessionProgress,
        cancel: &CancellationToken,
    ) -> Document {
        let mut doc = Document::new(path);
        doc.set_status(DocumentStatus::Processing);

        let span = tracing::info_span!("session", file = %path.display());
        async {
            let _lock = self.locks.lock(path).await;
            let started = Instant::now();
            match self.run(&mut doc, progress, cancel).await {
                Ok(()) => {
                    doc.set_status(DocumentStatus::Completed);
                    tracing::info!(
                        links = doc.hyperlinks.len(),
                        changes = doc.change_log.entries.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        summary = %doc.change_log.summary,
                        "document completed"
                    );
                }
                Err(err) => self.fail(&mut doc, err, progress).await,
            }
        }
        .instrument(span)
        .await;
        doc
    }

    async fn run(
        &self,
        doc: &mut Document,
        progress: &dyn SessionProgress,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let path = doc.path.clone();
        let policies = &self.options.policies;
        let enter = |state: SessionState| {
            tracing::debug!(state = state.as_str(), "session stage");
            progress.status(&path, state.as_str());
        };

        if let Some(store) = &self.backups {
            let store = store.as_ref();
            let file = path.as_path();
            let backup = retry::run(&policies.file_io, "backup", cancel, move |_| store.create_backup(file)).await?;
            doc.backup_path = Some(backup);
        }

        let file = path.as_path();
        let mut package = retry::run(&policies.package, "open", cancel, move |_| async move {
            Package::open(file, OpenMode::ReadWrite)
        })
        .await?;
        enter(SessionState::Opened);

        self.guard.check(&package, Checkpoint::AfterOpen)?;
        enter(SessionState::Validated);

        let snapshot = package.snapshot();
        enter(SessionState::Snapshotted);

        doc.metadata = extract_metadata(&package)?;
        enter(SessionState::MetadataExtracted);

        doc.hyperlinks = extract_hyperlinks(&package);
        doc.lookup_ids = collect_lookup_ids(&doc.hyperlinks);
        tracing::debug!(links = doc.hyperlinks.len(), ids = doc.lookup_ids.len(), "links extracted");
        enter(SessionState::LinksExtracted);
        check_cancelled(cancel)?;

        if self.options.prune_invisible {
            let outcome = prune_invisible(&mut package, &doc.hyperlinks)?;
            if !outcome.removed.is_empty() {
                doc.change_log.extend(outcome.entries);
                doc.hyperlinks = reconcile(&doc.hyperlinks, extract_hyperlinks(&package));
                self.guard.check(&package, Checkpoint::AfterPrune)?;
            }
        }
        enter(SessionState::Pruned);

        let table = self.resolver.fetch(&doc.lookup_ids, cancel).await?;
        let (entries, summary) = apply_resolution(&mut doc.hyperlinks, &table, &self.options.rules);
        doc.change_log.extend(entries);
        tracing::debug!(
            active = summary.active,
            expired = summary.expired,
            not_found = summary.not_found,
            "identifiers resolved"
        );
        enter(SessionState::Resolved);
        check_cancelled(cancel)?;

        let planned = self.engine.plan(&mut doc.hyperlinks, &table);
        doc.change_log.extend(planned);
        let applied = self.engine.apply(&mut package, &mut doc.hyperlinks)?;
        if applied.retargeted + applied.rewritten > 0 {
            doc.hyperlinks = reconcile(&doc.hyperlinks, extract_hyperlinks(&package));
            let changed = snapshot.changed_since(&package.snapshot());
            tracing::debug!(
                retargeted = applied.retargeted,
                rewritten = applied.rewritten,
                relationships_changed = changed.len(),
                "links mutated"
            );
        }
        self.guard.check(&package, Checkpoint::AfterMutation)?;
        enter(SessionState::Mutated);
        check_cancelled(cancel)?;

        let replaced = self.replacer.apply(&mut package, &mut doc.hyperlinks)?;
        if !replaced.is_empty() {
            doc.change_log.extend(replaced);
            self.guard.check(&package, Checkpoint::AfterReplacement)?;
        }
        enter(SessionState::Replaced);

        let optimized = optimize(&mut package)?;
        if let Some(entry) = optimized.entry() {
            doc.change_log.record(entry);
            self.guard.check(&package, Checkpoint::AfterOptimization)?;
        }
        enter(SessionState::Optimized);

        self.guard.check(&package, Checkpoint::BeforeSave)?;
        check_cancelled(cancel)?;
        let (target, bytes) = package.into_bytes()?;
        let (target, bytes) = (target.as_path(), bytes.as_slice());
        retry::run(&policies.file_io, "save", cancel, move |_| async move {
            persist_bytes(target, bytes)
        })
        .await?;
        enter(SessionState::Saved);

        let guard = &self.guard;
        retry::run(&policies.package, "verify", cancel, move |_| async move {
            guard.verify_file(target)
        })
        .await?;
        enter(SessionState::Verified);

        enter(SessionState::Closed);
        Ok(())
    }

    async fn fail(&self, doc: &mut Document, err: SessionError, progress: &dyn SessionProgress) {
        tracing::warn!(error = %err, "session failed");
        progress.status(&doc.path, SessionState::Failed.as_str());
        doc.change_log
            .record(ChangeEntry::new(ChangeType::Error, "").details(err.to_string()));

        let Some(backup) = doc.backup_path.clone() else {
            doc.error_message = Some(format!("{}; no backup available", err));
            doc.set_status(DocumentStatus::Failed);
            return;
        };
        if self.restore(&doc.path, &backup).await {
            doc.error_message = Some(format!("{}; restored from backup", err));
            doc.set_status(DocumentStatus::Recovered);
        } else {
            doc.error_message = Some(format!("{}; restore from {} failed", err, backup.display()));
            doc.set_status(DocumentStatus::Failed);
        }
    }

    /// Two bounded attempts. Cancellation is not observed here.
    async fn restore(&self, original: &Path, backup: &Path) -> bool {
        let Some(store) = &self.backups else {
            return false;
        };
        let limits = [self.options.restore_timeout, self.options.restore_retry_timeout];
        for (attempt, limit) in limits.into_iter().enumerate() {
            let outcome = match tokio::time::timeout(limit, store.restore(original, backup)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout(format!("restore after {:?}", limit))),
            };
            match outcome {
                Ok(true) => return true,
                Ok(false) => tracing::warn!(attempt = attempt + 1, "backup could not be restored"),
                Err(e) => tracing::warn!(attempt = attempt + 1, error = %e, "restore attempt failed"),
            }
        }
        false
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), SessionError> {
    if cancel.is_cancelled() {
        Err(SessionError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::FsBackupStore;
    use crate::package::fixtures::docx;
    use crate::progress::tests::RecordingProgress;
    use crate::resolver::StaticLookupClient;
    use crate::retry::RetryPolicy;
    use link_harness_core::models::DocumentRecord;
    use tempfile::TempDir;

    const BASE: &str = "https://thesource.example.com/content/";

    fn options() -> SessionOptions {
        SessionOptions {
            rules: RuleOptions {
                retarget_base: BASE.to_string(),
                ..Default::default()
            },
            prune_invisible: true,
            policies: RetryPolicies {
                file_io: RetryPolicy::none(),
                package: RetryPolicy::none(),
                network: RetryPolicy::none(),
            },
            lookup_budget: Duration::from_secs(5),
            restore_timeout: Duration::from_secs(30),
            restore_retry_timeout: Duration::from_secs(15),
            allowlist: Allowlist::default(),
            replacements: Vec::new(),
        }
    }

    fn policy_record() -> DocumentRecord {
        DocumentRecord {
            document_id: "DOC99".to_string(),
            content_id: "CMS-ABC-000042".to_string(),
            title: "Policy X".to_string(),
            status: "Active".to_string(),
        }
    }

    fn coordinator(
        client: Arc<StaticLookupClient>,
        backups: Option<Arc<dyn BackupStore>>,
    ) -> SessionCoordinator {
        SessionCoordinator::new(options(), client, backups).unwrap()
    }

    fn write_fixture(dir: &TempDir, name: &str, links: &[(&str, &str, &str)]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, docx(links, "Body text")).unwrap();
        path
    }

    #[tokio::test]
    async fn invisible_link_is_removed_but_its_identifier_resolved() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "a.docx", &[("rId2", "https://host/path#docid=CMS-ABC-000042", "")]);
        let client = Arc::new(StaticLookupClient::new(vec![policy_record()]));
        let progress = RecordingProgress::default();

        let doc = coordinator(client.clone(), None)
            .process(&path, &progress, &CancellationToken::new())
            .await;

        assert_eq!(doc.status, DocumentStatus::Completed, "{:?}", doc.error_message);
        assert!(doc.hyperlinks.is_empty());
        assert_eq!(doc.change_log.count(ChangeType::HyperlinkRemoved), 1);
        assert_eq!(client.requests(), vec![vec!["CMS-ABC-000042".to_string()]]);

        let reopened = Package::open(&path, OpenMode::ReadOnly).unwrap();
        assert!(extract_hyperlinks(&reopened).is_empty());
        assert!(reopened.relationship("rId2").is_none());
    }

    #[tokio::test]
    async fn stages_are_reported_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "a.docx", &[("rId2", "https://h/x?docid=CMS-ABC-000042", "Policy X")]);
        let client = Arc::new(StaticLookupClient::new(vec![policy_record()]));
        let progress = RecordingProgress::default();

        coordinator(client, None)
            .process(&path, &progress, &CancellationToken::new())
            .await;

        let statuses = progress.statuses.lock().unwrap().clone();
        assert_eq!(
            statuses,
            vec![
                "opened",
                "validated",
                "snapshotted",
                "metadata extracted",
                "links extracted",
                "pruned",
                "resolved",
                "mutated",
                "replaced",
                "optimized",
                "saved",
                "verified",
                "closed",
            ]
        );
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "a.docx", &[("rId2", "https://h/x?docid=CMS-ABC-000042", "Policy X")]);
        let client = Arc::new(StaticLookupClient::new(vec![policy_record()]));
        let session = coordinator(client, None);
        let cancel = CancellationToken::new();

        let first = session.process(&path, &RecordingProgress::default(), &cancel).await;
        assert_eq!(first.status, DocumentStatus::Completed, "{:?}", first.error_message);
        assert_eq!(first.metadata.title.as_deref(), Some("Fixture"));
        let link = &first.hyperlinks[0];
        assert_eq!(link.url, format!("{}!/view?docid=DOC99", BASE));
        assert_eq!(link.display_text, "Policy X (000042)");
        assert_eq!(first.change_log.count(ChangeType::HyperlinkUpdated), 1);
        assert_eq!(first.change_log.count(ChangeType::ContentIdUpdated), 1);

        let second = session.process(&path, &RecordingProgress::default(), &cancel).await;
        assert_eq!(second.status, DocumentStatus::Completed);
        assert_eq!(second.change_log.count(ChangeType::HyperlinkUpdated), 0);
        assert_eq!(second.change_log.count(ChangeType::ContentIdUpdated), 0);
        assert!(second.hyperlinks.iter().all(|l| !l.requires_update));
        assert_eq!(second.hyperlinks[0].lookup_id.as_deref(), Some("DOC99"));
    }

    #[tokio::test]
    async fn unreadable_file_fails_without_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        let client = Arc::new(StaticLookupClient::default());
        let progress = RecordingProgress::default();

        let doc = coordinator(client, None)
            .process(&path, &progress, &CancellationToken::new())
            .await;

        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.error_message.unwrap().ends_with("no backup available"));
        assert_eq!(doc.change_log.count(ChangeType::Error), 1);
        assert_eq!(*progress.statuses.lock().unwrap(), vec!["failed".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_session_is_recovered_from_backup() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "a.docx", &[("rId2", "https://h/x?docid=CMS-ABC-000042", "Policy X")]);
        let before = std::fs::read(&path).unwrap();
        let client = Arc::new(StaticLookupClient::new(vec![policy_record()]));
        let backups: Arc<dyn BackupStore> = Arc::new(FsBackupStore::new(Some(dir.path().join("bak"))));
        let cancel = CancellationToken::new();

        struct CancelOnResolve(CancellationToken);
        impl SessionProgress for CancelOnResolve {
            fn status(&self, _path: &Path, message: &str) {
                if message == "resolved" {
                    self.0.cancel();
                }
            }
        }

        let doc = coordinator(client, Some(backups))
            .process(&path, &CancelOnResolve(cancel.clone()), &cancel)
            .await;

        assert_eq!(doc.status, DocumentStatus::Recovered, "{:?}", doc.error_message);
        assert!(doc.backup_path.as_ref().unwrap().exists());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn path_locks_serialize_same_file() {
        let locks = PathLocks::default();
        let guard = locks.lock(Path::new("same.docx")).await;
        let second = tokio::time::timeout(Duration::from_millis(20), locks.lock(Path::new("same.docx"))).await;
        assert!(second.is_err());
        drop(guard);
        let other = tokio::time::timeout(Duration::from_millis(20), locks.lock(Path::new("other.docx"))).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn released_path_locks_are_forgotten() {
        let locks = PathLocks::default();
        for name in ["a.docx", "b.docx", "c.docx"] {
            drop(locks.lock(Path::new(name)).await);
        }
        let held = locks.lock(Path::new("d.docx")).await;
        assert_eq!(locks.locks.lock().unwrap().len(), 1);
        drop(held);
    }
}
