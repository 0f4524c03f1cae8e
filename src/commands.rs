//! Implementations of the `lnk` subcommands.
//!
//! Results go to stdout; progress and logs go to stderr.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use link_harness_core::models::{Document, DocumentStatus};

use crate::backup::{BackupStore, FsBackupStore};
use crate::batch::BatchController;
use crate::config::Config;
use crate::discover::discover_documents;
use crate::extract::extract_hyperlinks;
use crate::package::{OpenMode, Package};
use crate::progress::ProgressMode;
use crate::prune::is_invisible;
use crate::resolver::HttpLookupClient;
use crate::session::{SessionCoordinator, SessionOptions};
use crate::validate::IntegrityGuard;

/// Options for `lnk process`.
#[derive(Debug, Clone)]
pub struct ProcessArgs {
    pub inputs: Vec<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub progress: ProgressMode,
    pub report_dir: Option<PathBuf>,
    pub no_backup: bool,
}

/// Run the batch pipeline. Fails when any document did not complete.
pub async fn run_process(config: &Config, args: ProcessArgs, cancel: &CancellationToken) -> Result<()> {
    let paths = discover_documents(&args.inputs, &args.include, &args.exclude)?;
    if paths.is_empty() {
        println!("No documents found.");
        return Ok(());
    }

    let client = Arc::new(HttpLookupClient::new(&config.lookup)?);
    let backups: Option<Arc<dyn BackupStore>> = if config.backup.enabled && !args.no_backup {
        Some(Arc::new(FsBackupStore::new(config.backup.dir.clone())))
    } else {
        None
    };
    let coordinator = SessionCoordinator::new(SessionOptions::from_config(config), client, backups)?;
    let controller = BatchController::new(Arc::new(coordinator), config.batch.effective_workers());

    let reporter = args.progress.batch_reporter();
    let session_progress = Arc::from(args.progress.session_progress());
    let outcome = controller
        .run(paths, session_progress, reporter.as_ref(), cancel)
        .await;

    for doc in &outcome.documents {
        print_outcome(doc);
    }
    if let Some(dir) = &args.report_dir {
        let written = write_reports(dir, &outcome.documents)?;
        println!("Wrote {} changelog report(s) to {}", written, dir.display());
    }

    let s = &outcome.snapshot;
    println!(
        "Processed {} document(s): {} succeeded, {} failed, {} hyperlink(s) changed, avg {:.0} ms",
        s.processed, s.succeeded, s.failed, s.unique_hyperlinks_changed, s.average_ms
    );
    if s.failed > 0 {
        bail!("{} document(s) failed", s.failed);
    }
    Ok(())
}

fn print_outcome(doc: &Document) {
    match doc.status {
        DocumentStatus::Completed => {
            let summary = if doc.change_log.is_empty() {
                "no changes"
            } else {
                doc.change_log.summary.as_str()
            };
            println!("ok        {}  {}", doc.path.display(), summary);
        }
        status => println!(
            "{:<9} {}  {}",
            status.as_str(),
            doc.path.display(),
            doc.error_message.as_deref().unwrap_or("")
        ),
    }
}

/// One `<file name>.changelog.txt` per document that has entries.
fn write_reports(dir: &Path, documents: &[Document]) -> Result<usize> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
    let mut used = HashSet::new();
    let mut written = 0;
    for doc in documents.iter().filter(|d| !d.change_log.is_empty()) {
        let file_name = doc.file_name();
        let mut name = format!("{}.changelog.txt", file_name);
        let mut n = 2;
        while !used.insert(name.clone()) {
            name = format!("{}.{}.changelog.txt", file_name, n);
            n += 1;
        }
        std::fs::write(dir.join(&name), doc.change_log.render_report(&file_name))?;
        written += 1;
    }
    Ok(written)
}

/// List every hyperlink of the given documents without modifying them.
pub fn run_scan(inputs: &[PathBuf]) -> Result<()> {
    for path in discover_documents(inputs, &[], &[])? {
        let package = Package::open(&path, OpenMode::ReadOnly)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let links = extract_hyperlinks(&package);
        println!("{} ({} hyperlinks)", path.display(), links.len());
        for link in &links {
            let flag = if is_invisible(link) { "  [invisible]" } else { "" };
            println!(
                "  {}  {}  {:?}  id={}{}",
                link.id,
                link.url,
                link.display_text,
                link.lookup_id.as_deref().unwrap_or("-"),
                flag
            );
        }
    }
    Ok(())
}

/// Run the integrity guard. Fails when errors remain after filtering.
pub fn run_validate(config: &Config, inputs: &[PathBuf]) -> Result<()> {
    let guard = IntegrityGuard::new(config.validation.allowlist());
    let mut failing = 0;
    for path in discover_documents(inputs, &[], &[])? {
        let package = Package::open(&path, OpenMode::ReadOnly)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let report = guard.validate(&package);
        println!(
            "{}: {} error(s), {} ignored",
            path.display(),
            report.errors.len(),
            report.ignored.len()
        );
        for issue in &report.errors {
            println!("  error    {}", issue);
        }
        for issue in &report.ignored {
            println!("  ignored  {}", issue);
        }
        if !report.is_clean() {
            failing += 1;
        }
    }
    if failing > 0 {
        bail!("{} document(s) failed validation", failing);
    }
    Ok(())
}
