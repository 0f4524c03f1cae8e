//! Mutation engine: plans and applies per-link edits.
//!
//! Planning runs the pure rules from [`link_harness_core::rules`] against
//! each resolved link and queues a pending URL and/or display text on the
//! [`Hyperlink`]. Applying writes the pending values into the package:
//!
//! 1. create a new hyperlink relationship for the new URL,
//! 2. repoint the element's `r:id` (dropping any anchor attributes),
//! 3. replace the element's text runs with one run carrying the new text,
//!    styled with a copy of the first text run's properties,
//! 4. delete the old relationship once nothing references it.
//!
//! Relationship targets are never edited in place. Each link is
//! snapshotted before its edit; if any step before the last fails, the
//! element is restored and the newly created relationship deleted before
//! the error is returned.

use link_harness_core::changelog::ChangeEntry;
use link_harness_core::identifier::build_complete_url;
use link_harness_core::models::{Hyperlink, LinkState};
use link_harness_core::rules::{plan_link, RuleOptions};

use crate::error::{PackageError, SessionError};
use crate::extract::locate;
use crate::package::Package;
use crate::resolver::LookupTable;
use crate::xml::{Element, Node, NodePath};

pub struct MutationEngine {
    opts: RuleOptions,
}

/// Totals from one apply pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub retargeted: usize,
    pub rewritten: usize,
}

impl MutationEngine {
    pub fn new(opts: RuleOptions) -> Self {
        Self { opts }
    }

    /// Queue edits for every link whose identifier resolved to a record.
    ///
    /// Returns the changelog entries produced by the rules, including
    /// report-only ones that queue no edit.
    pub fn plan(&self, links: &mut [Hyperlink], table: &LookupTable) -> Vec<ChangeEntry> {
        let mut entries = Vec::new();
        for link in links.iter_mut() {
            let Some(record) = link.lookup_id.as_deref().and_then(|id| table.get(id)) else {
                continue;
            };
            let plan = plan_link(link, record, &self.opts);
            link.status = plan.status;
            link.updated_url = plan.new_url;
            link.updated_text = plan.new_text;
            link.refresh_pending();
            entries.extend(plan.entries);
        }
        entries
    }

    /// Write every pending edit into the package.
    ///
    /// Stops at the first link that cannot be edited; that link is rolled
    /// back and earlier links stay applied.
    pub fn apply(
        &self,
        package: &mut Package,
        links: &mut [Hyperlink],
    ) -> Result<ApplySummary, SessionError> {
        package.ensure_writable()?;
        let mut summary = ApplySummary::default();
        for link in links.iter_mut().filter(|l| l.requires_update) {
            let retarget = link.updated_url.is_some();
            let rewrite = link.updated_text.is_some();
            if let Err(e) = apply_link(package, link) {
                link.error_message = Some(e.to_string());
                return Err(SessionError::Mutation {
                    link_id: link.id.clone(),
                    message: e.to_string(),
                });
            }
            tracing::debug!(link = %link.id, retarget, rewrite, "hyperlink persisted");
            summary.retargeted += retarget as usize;
            summary.rewritten += rewrite as usize;
        }
        Ok(summary)
    }
}

/// Apply one link's pending edits with snapshot/undo.
pub fn apply_link(package: &mut Package, link: &mut Hyperlink) -> Result<(), PackageError> {
    let path = locate(package, link).ok_or_else(|| PackageError::LinkNotFound(link.id.clone()))?;
    let snapshot = package
        .document
        .root
        .get(&path)
        .cloned()
        .ok_or_else(|| PackageError::LinkNotFound(link.id.clone()))?;

    let mut created = None;
    match edit_element(package, &path, link, &mut created) {
        Ok(old_relationship) => {
            if let Some(old) = old_relationship {
                if package.relationship_references(&old) == 0 {
                    package.delete_relationship(&old)?;
                }
            }
        }
        Err(e) => {
            package.document.root.replace(&path, snapshot);
            if let Some(id) = created {
                if package.relationship_references(&id) == 0 {
                    package.delete_relationship(&id)?;
                }
            }
            tracing::warn!(link = %link.id, error = %e, "hyperlink edit rolled back");
            return Err(e);
        }
    }

    if let Some(url) = link.updated_url.take() {
        let complete = build_complete_url(&url, None);
        link.address = complete.address;
        link.sub_address = complete.sub_address;
        link.url = complete.url;
        link.relationship_id = created;
    }
    if let Some(text) = link.updated_text.take() {
        link.display_text = text;
    }
    link.requires_update = false;
    link.state = LinkState::Persisted;
    Ok(())
}

/// Steps 1-3. Returns the relationship id the element pointed at before,
/// when it was repointed.
fn edit_element(
    package: &mut Package,
    path: &NodePath,
    link: &Hyperlink,
    created: &mut Option<String>,
) -> Result<Option<String>, PackageError> {
    let mut old_relationship = None;

    if let Some(url) = &link.updated_url {
        let new_id = package.add_hyperlink_relationship(url)?;
        *created = Some(new_id.clone());
        let element = package
            .document
            .root
            .get_mut(path)
            .ok_or_else(|| PackageError::LinkNotFound(link.id.clone()))?;
        old_relationship = element.attr("r:id").map(str::to_string);
        element.set_attr("r:id", new_id);
        element.remove_attr_local("anchor");
        element.remove_attr_local("docLocation");
    }

    if let Some(text) = &link.updated_text {
        let element = package
            .document
            .root
            .get_mut(path)
            .ok_or_else(|| PackageError::LinkNotFound(link.id.clone()))?;
        rewrite_text(element, text)
            .map_err(|msg| PackageError::Structure(format!("{}: {}", link.id, msg)))?;
    }

    Ok(old_relationship)
}

/// Replace the text runs of `hyperlink` with a single run showing `text`.
///
/// The new run takes a copy of the first text run's `w:rPr`, and sits where
/// that run (or the wrapper containing it) was. Runs that also hold a
/// drawing, tab or break keep that content and lose only their `w:t`;
/// wrappers such as `w:ins` emptied by the edit are dropped.
pub fn rewrite_text(hyperlink: &mut Element, text: &str) -> Result<(), &'static str> {
    let first_run = hyperlink
        .find_paths(&|e| e.is("r") && e.find_child("t").is_some())
        .into_iter()
        .next()
        .or_else(|| hyperlink.find_paths(&|e| e.is("r")).into_iter().next())
        .ok_or("hyperlink has no text run")?;
    let properties = hyperlink
        .get(&first_run)
        .and_then(|run| run.find_child("rPr"))
        .cloned();
    let insert_at = first_run[0];

    strip_text_runs(hyperlink);

    let mut run = Element::new("w:r");
    if let Some(rpr) = properties {
        run = run.with_child(rpr);
    }
    run = run.with_child(
        Element::new("w:t")
            .with_attr("xml:space", "preserve")
            .with_text(text),
    );
    let index = insert_at.min(hyperlink.children.len());
    hyperlink.children.insert(index, Node::Element(run));
    Ok(())
}

fn strip_text_runs(el: &mut Element) {
    el.children.retain_mut(|node| {
        let Node::Element(child) = node else {
            return true;
        };
        if child.is("r") {
            if child.find_child("t").is_none() {
                return true;
            }
            child
                .children
                .retain(|n| !matches!(n, Node::Element(e) if e.is("t")));
            return child.child_elements().any(|e| !e.is("rPr"));
        }
        let had_elements = child.child_elements().next().is_some();
        strip_text_runs(child);
        !had_elements || child.child_elements().next().is_some()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_hyperlinks;
    use crate::package::fixtures::docx;
    use crate::package::OpenMode;
    use crate::validate::IntegrityGuard;
    use link_harness_core::models::{DocumentRecord, LinkStatus};

    const BASE: &str = "https://thesource.example.com/content/";

    fn engine() -> MutationEngine {
        MutationEngine::new(RuleOptions {
            retarget_base: BASE.to_string(),
            ..Default::default()
        })
    }

    fn table() -> LookupTable {
        LookupTable::from_records(vec![
            DocumentRecord {
                document_id: "DOC99".to_string(),
                content_id: "CMS-ABC-000042".to_string(),
                title: "Policy X".to_string(),
                status: "Active".to_string(),
            },
            DocumentRecord {
                document_id: "DOC7".to_string(),
                content_id: "TSRC-Q-654321".to_string(),
                title: "Old".to_string(),
                status: "Expired".to_string(),
            },
        ])
    }

    #[test]
    fn retarget_and_rewrite_persist() {
        let bytes = docx(
            &[
                ("rId2", "https://old.example.com/x#docid=CMS-ABC-000042", "Policy X"),
                ("rId3", "file:///C:/docs/TSRC-Q-654321.docx", "Old (54321)"),
            ],
            "",
        );
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let mut links = extract_hyperlinks(&pkg);
        let entries = engine().plan(&mut links, &table());
        assert!(!entries.is_empty());
        assert_eq!(links[0].state, LinkState::UrlAndTextChanged);
        assert_eq!(links[1].status, LinkStatus::Expired);

        let summary = engine().apply(&mut pkg, &mut links).unwrap();
        assert_eq!(summary, ApplySummary { retargeted: 2, rewritten: 2 });
        assert!(links.iter().all(|l| l.state == LinkState::Persisted && !l.requires_update));

        let fresh = extract_hyperlinks(&pkg);
        assert_eq!(fresh[0].url, format!("{}!/view?docid=DOC99", BASE));
        assert_eq!(fresh[0].display_text, "Policy X (000042)");
        assert_eq!(fresh[1].url, format!("{}!/view?docid=DOC7", BASE));
        assert_eq!(fresh[1].display_text, "Old (654321) - Expired");
        assert_eq!(fresh[0].url, links[0].url);

        assert!(pkg.relationship("rId2").is_none());
        assert!(pkg.relationship("rId3").is_none());
        assert!(IntegrityGuard::default().validate(&pkg).is_clean());
    }

    #[test]
    fn second_run_changes_nothing() {
        let bytes = docx(&[("rId2", "https://old.example.com/x#docid=CMS-ABC-000042", "Policy X")], "");
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let mut links = extract_hyperlinks(&pkg);
        engine().plan(&mut links, &table());
        engine().apply(&mut pkg, &mut links).unwrap();

        let mut again = extract_hyperlinks(&pkg);
        assert_eq!(again[0].lookup_id.as_deref(), Some("DOC99"));
        engine().plan(&mut again, &table());
        assert!(again.iter().all(|l| !l.requires_update));
        let summary = engine().apply(&mut pkg, &mut again).unwrap();
        assert_eq!(summary, ApplySummary::default());
    }

    #[test]
    fn rewrite_keeps_first_run_formatting() {
        let mut link = Element::new("w:hyperlink")
            .with_child(Element::new("w:proofErr"))
            .with_child(
                Element::new("w:r")
                    .with_child(Element::new("w:rPr").with_child(Element::new("w:b")))
                    .with_child(Element::new("w:t").with_text("Pol")),
            )
            .with_child(Element::new("w:r").with_child(Element::new("w:t").with_text("icy")));
        rewrite_text(&mut link, "Policy (000042)").unwrap();

        assert_eq!(link.children.len(), 2);
        let run = link.find_child("r").unwrap();
        assert!(run.find_child("rPr").unwrap().find_child("b").is_some());
        assert_eq!(run.find_child("t").unwrap().attr("xml:space"), Some("preserve"));
        assert_eq!(link.descendant_text("t"), "Policy (000042)");
        assert!(link.children[0] == Node::Element(Element::new("w:proofErr")));
    }

    #[test]
    fn rewrite_keeps_non_text_runs() {
        let mut link = Element::new("w:hyperlink")
            .with_child(
                Element::new("w:r")
                    .with_child(Element::new("w:rPr").with_child(Element::new("w:i")))
                    .with_child(Element::new("w:t").with_text("Old")),
            )
            .with_child(Element::new("w:r").with_child(Element::new("w:tab")))
            .with_child(
                Element::new("w:ins").with_child(
                    Element::new("w:r").with_child(Element::new("w:t").with_text(" title")),
                ),
            )
            .with_child(
                Element::new("w:r")
                    .with_child(Element::new("w:drawing"))
                    .with_child(Element::new("w:t").with_text(" logo")),
            );
        rewrite_text(&mut link, "New (000042)").unwrap();

        assert_eq!(link.descendant_text("t"), "New (000042)");
        assert!(link.find_child("ins").is_none());
        let runs: Vec<&Element> = link.child_elements().filter(|e| e.is("r")).collect();
        assert_eq!(runs.len(), 3);
        assert!(runs[0].find_child("rPr").unwrap().find_child("i").is_some());
        assert!(runs[1].find_child("tab").is_some());
        assert!(runs[2].find_child("drawing").is_some());
        assert!(runs[2].find_child("t").is_none());
    }

    #[test]
    fn failed_rewrite_rolls_back_relationship() {
        let bytes = docx(&[("rId2", "https://old.example.com/a", "A")], "");
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let mut links = extract_hyperlinks(&pkg);

        // strip the runs so the text rewrite has nothing to work with
        let path = locate(&pkg, &links[0]).unwrap();
        pkg.document.root.get_mut(&path).unwrap().children.clear();
        links[0].display_text.clear();
        links[0].updated_url = Some("https://new.example.com/b".to_string());
        links[0].updated_text = Some("B".to_string());
        links[0].refresh_pending();

        let before = pkg.snapshot();
        let err = engine().apply(&mut pkg, &mut links).unwrap_err();
        assert!(matches!(err, SessionError::Mutation { ref link_id, .. } if link_id == "hl-0001"));
        assert_eq!(pkg.snapshot(), before);
        let element = pkg.document.root.get(&path).unwrap();
        assert_eq!(element.attr("r:id"), Some("rId2"));
        assert!(links[0].error_message.is_some());
    }

    #[test]
    fn missing_element_is_reported() {
        let bytes = docx(&[("rId2", "https://old.example.com/a", "A")], "");
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let mut link = extract_hyperlinks(&pkg).remove(0);
        link.url = "https://nowhere".to_string();
        link.updated_text = Some("x".to_string());
        assert!(matches!(
            apply_link(&mut pkg, &mut link),
            Err(PackageError::LinkNotFound(_))
        ));
    }
}
