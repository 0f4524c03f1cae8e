mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use link_harness::backup::{BackupStore, FsBackupStore};
use link_harness::batch::BatchController;
use link_harness::config::Replacement;
use link_harness::extract::extract_hyperlinks;
use link_harness::package::{OpenMode, Package};
use link_harness::progress::NoProgress;
use link_harness::resolver::StaticLookupClient;
use link_harness::retry::{RetryPolicies, RetryPolicy};
use link_harness::session::{SessionCoordinator, SessionOptions};
use link_harness::validate::{Allowlist, IntegrityGuard};
use link_harness_core::changelog::ChangeType;
use link_harness_core::models::{DocumentRecord, DocumentStatus, LinkStatus};
use link_harness_core::rules::RuleOptions;

use common::{link, write_docx};

const BASE: &str = "https://thesource.example.com/content/";

fn record(document_id: &str, content_id: &str, title: &str, status: &str) -> DocumentRecord {
    DocumentRecord {
        document_id: document_id.to_string(),
        content_id: content_id.to_string(),
        title: title.to_string(),
        status: status.to_string(),
    }
}

fn records() -> Vec<DocumentRecord> {
    vec![
        record("DOC99", "CMS-ABC-000042", "Policy X", "Active"),
        record("", "TSRC-HR-123456", "Leave", "Active"),
        record("DOC7", "CMS-EXP-000007", "Old Form", "Expired"),
    ]
}

fn options(replacements: Vec<Replacement>) -> SessionOptions {
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
        replacements,
    }
}

fn coordinator(client: Arc<StaticLookupClient>, replacements: Vec<Replacement>) -> SessionCoordinator {
    SessionCoordinator::new(options(replacements), client, None).unwrap()
}

#[tokio::test]
async fn invisible_link_scenario() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_docx(
        dir.path(),
        "invisible.docx",
        &[link("rId5", "https://host/path#docid=CMS-ABC-000042", "")],
        "Body",
    );
    let client = Arc::new(StaticLookupClient::new(records()));

    let doc = coordinator(client.clone(), Vec::new())
        .process(&path, &NoProgress, &CancellationToken::new())
        .await;

    assert_eq!(doc.status, DocumentStatus::Completed, "{:?}", doc.error_message);
    assert!(doc.hyperlinks.is_empty());
    assert_eq!(doc.change_log.count(ChangeType::HyperlinkRemoved), 1);
    assert!(client.requests()[0].contains(&"CMS-ABC-000042".to_string()));

    let reopened = Package::open(&path, OpenMode::ReadOnly).unwrap();
    assert!(extract_hyperlinks(&reopened).is_empty());
    assert!(reopened.relationship("rId5").is_none());
}

#[tokio::test]
async fn every_rule_fires_once_and_the_second_run_is_a_no_op() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_docx(
        dir.path(),
        "policies.docx",
        &[
            link("rId5", "https://old.example.com/x?docid=CMS-ABC-000042", "Policy X"),
            link("rId6", "file:///S:/legacy/TSRC-HR-123456.docx", "Leave (23456)"),
            link("rId7", "https://old.example.com/x?docid=CMS-ZZZ-999999", "Gone"),
            link("rId8", "https://old.example.com/y?docid=CMS-EXP-000007", "Old Form (000007)"),
        ],
        "See the Procedures manual for details",
    );
    let replacements = vec![Replacement {
        find: "procedures manual".to_string(),
        replace: "Operations manual".to_string(),
        match_case: false,
        whole_word: true,
    }];
    let client = Arc::new(StaticLookupClient::new(records()));
    let session = coordinator(client.clone(), replacements);
    let cancel = CancellationToken::new();

    let first = session.process(&path, &NoProgress, &cancel).await;
    assert_eq!(first.status, DocumentStatus::Completed, "{:?}", first.error_message);
    assert_eq!(first.metadata.title.as_deref(), Some("Procedures"));
    assert_eq!(first.metadata.author.as_deref(), Some("Records Office"));
    assert_eq!(first.metadata.word_count, 120);

    let texts: Vec<&str> = first.hyperlinks.iter().map(|l| l.display_text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "Policy X (000042)",
            "Leave (123456)",
            "Gone - Not Found",
            "Old Form (000007) - Expired",
        ]
    );
    let urls: Vec<&str> = first.hyperlinks.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://thesource.example.com/content/!/view?docid=DOC99",
            "https://thesource.example.com/content/!/view?docid=TSRC-HR-123456",
            "https://old.example.com/x?docid=CMS-ZZZ-999999",
            "https://thesource.example.com/content/!/view?docid=DOC7",
        ]
    );
    assert_eq!(first.hyperlinks[2].status, LinkStatus::NotFound);
    assert_eq!(first.change_log.count(ChangeType::HyperlinkUpdated), 3);
    assert_eq!(first.change_log.count(ChangeType::ContentIdUpdated), 2);
    assert_eq!(first.change_log.count(ChangeType::StatusAppended), 2);
    assert_eq!(first.change_log.count(ChangeType::TextReplaced), 1);
    assert_eq!(first.change_log.count(ChangeType::Information), 1);
    assert_eq!(first.change_log.changed_hyperlinks().len(), 4);

    let reopened = Package::open(&path, OpenMode::ReadOnly).unwrap();
    let report = IntegrityGuard::default().validate(&reopened);
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.ignored.len(), 6);
    let stored = extract_hyperlinks(&reopened);
    assert_eq!(stored[0].display_text, "Policy X (000042)");
    assert_eq!(stored[1].url, urls[1]);

    let second = session.process(&path, &NoProgress, &cancel).await;
    assert_eq!(second.status, DocumentStatus::Completed, "{:?}", second.error_message);
    assert!(second.change_log.changed_hyperlinks().is_empty());
    assert_eq!(second.change_log.count(ChangeType::TextReplaced), 0);
    assert_eq!(second.change_log.count(ChangeType::Information), 0);
    assert!(second.hyperlinks.iter().all(|l| !l.requires_update));
}

#[tokio::test]
async fn formatting_survives_text_rewrite() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_docx(
        dir.path(),
        "styled.docx",
        &[link("rId5", "https://old.example.com/x?docid=CMS-ABC-000042", "Policy X")],
        "Body",
    );
    let client = Arc::new(StaticLookupClient::new(records()));
    coordinator(client, Vec::new())
        .process(&path, &NoProgress, &CancellationToken::new())
        .await;

    let reopened = Package::open(&path, OpenMode::ReadOnly).unwrap();
    let mut bold_hyperlink_runs = 0;
    reopened.document.root.visit(&mut |el| {
        if el.is("hyperlink") {
            for run in el.child_elements().filter(|c| c.is("r")) {
                let props = run.find_child("rPr").unwrap();
                assert!(props.find_child("rStyle").is_some());
                if props.find_child("b").is_some() {
                    bold_hyperlink_runs += 1;
                }
            }
        }
    });
    assert_eq!(bold_hyperlink_runs, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_counts_each_changed_link_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let a = write_docx(
        dir.path(),
        "a.docx",
        &[
            link("rId5", "https://old.example.com/x?docid=CMS-ABC-000042", "Policy X"),
            link("rId6", "file:///S:/legacy/TSRC-HR-123456.docx", "Leave (23456)"),
        ],
        "Body",
    );
    let b = write_docx(dir.path(), "b.docx", &[], "Nothing to see");

    let client = Arc::new(StaticLookupClient::new(records()));
    let backups: Arc<dyn BackupStore> = Arc::new(FsBackupStore::new(Some(dir.path().join("bak"))));
    let session = SessionCoordinator::new(options(Vec::new()), client, Some(backups)).unwrap();
    let controller = BatchController::new(Arc::new(session), 3);

    let outcome = controller
        .run(
            vec![a.clone(), b, a],
            Arc::new(NoProgress),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await;

    assert!(outcome
        .documents
        .iter()
        .all(|d| d.status == DocumentStatus::Completed));
    assert!(outcome.documents.iter().all(|d| d.backup_path.is_some()));
    assert_eq!(outcome.snapshot.processed, 3);
    assert_eq!(outcome.snapshot.unique_hyperlinks_changed, 2);
}
