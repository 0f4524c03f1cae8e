//! Invisible link pruning.
//!
//! A hyperlink whose rendered text is empty or whitespace-only but whose
//! address is non-empty cannot be clicked and is removed. A link showing
//! an image, symbol or tab instead of text is visible and stays. Identifiers must
//! already have been collected from the links passed in: the pruner only
//! removes elements and their relationships, it never touches
//! [`Document::lookup_ids`](link_harness_core::models::Document::lookup_ids).

use link_harness_core::changelog::{ChangeEntry, ChangeType};
use link_harness_core::models::Hyperlink;

use crate::error::PackageError;
use crate::extract::locate;
use crate::package::Package;

/// Result of one pruning pass.
#[derive(Debug, Default)]
pub struct PruneOutcome {
    /// Ids of the hyperlinks removed.
    pub removed: Vec<String>,
    pub entries: Vec<ChangeEntry>,
}

/// Whether a link qualifies for removal.
pub fn is_invisible(link: &Hyperlink) -> bool {
    link.is_blank() && !link.has_visual_content && !link.address.trim().is_empty()
}

/// Remove every invisible link in `links` from the package.
///
/// Each removal re-locates its element in the current tree. The link's
/// relationship is deleted once nothing else references it; a relationship
/// that is already gone is not an error.
pub fn prune_invisible(package: &mut Package, links: &[Hyperlink]) -> Result<PruneOutcome, PackageError> {
    package.ensure_writable()?;
    let mut outcome = PruneOutcome::default();

    for link in links.iter().filter(|l| is_invisible(l)) {
        let Some(path) = locate(package, link) else {
            tracing::debug!(link = %link.id, "invisible link already gone");
            continue;
        };
        package.document.root.remove(&path);

        if let Some(rel_id) = &link.relationship_id {
            if package.relationship_references(rel_id) == 0 && !package.delete_relationship(rel_id)? {
                tracing::debug!(link = %link.id, relationship = %rel_id, "relationship already removed");
            }
        }

        outcome.removed.push(link.id.clone());
        let mut entry = ChangeEntry::new(ChangeType::HyperlinkRemoved, &link.id)
            .details(format!("invisible hyperlink to {} removed", link.url));
        if let Some(id) = &link.lookup_id {
            entry.details.push_str(&format!(" (identifier {} kept)", id));
        }
        outcome.entries.push(entry);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_hyperlinks;
    use crate::package::fixtures::docx;
    use crate::package::OpenMode;
    use crate::validate::IntegrityGuard;

    #[test]
    fn removes_blank_link_and_relationship() {
        let bytes = docx(
            &[
                ("rId2", "https://host/path#docid=CMS-ABC-000042", ""),
                ("rId3", "https://host/keep", "Keep"),
            ],
            "",
        );
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let links = extract_hyperlinks(&pkg);
        let out = prune_invisible(&mut pkg, &links).unwrap();

        assert_eq!(out.removed, vec!["hl-0001".to_string()]);
        assert_eq!(out.entries[0].change_type, ChangeType::HyperlinkRemoved);
        assert!(out.entries[0].details.contains("CMS-ABC-000042"));
        assert!(pkg.relationship("rId2").is_none());
        assert!(pkg.relationship("rId3").is_some());

        let remaining = extract_hyperlinks(&pkg);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].display_text, "Keep");
        assert!(IntegrityGuard::default().validate(&pkg).is_clean());
    }

    #[test]
    fn blank_link_without_address_is_kept() {
        let bytes = docx(&[("", "", " ")], "");
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let links = extract_hyperlinks(&pkg);
        assert_eq!(links.len(), 1);
        let out = prune_invisible(&mut pkg, &links).unwrap();
        assert!(out.removed.is_empty());
        assert_eq!(extract_hyperlinks(&pkg).len(), 1);
    }

    #[test]
    fn image_only_link_is_kept() {
        let bytes = docx(
            &[(
                "rId2",
                "https://host/logo",
                "</w:t><w:drawing><wp:inline/></w:drawing><w:t>",
            )],
            "",
        );
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let links = extract_hyperlinks(&pkg);
        assert_eq!(links[0].display_text, "");
        assert!(links[0].has_visual_content);
        assert!(!is_invisible(&links[0]));

        let out = prune_invisible(&mut pkg, &links).unwrap();
        assert!(out.removed.is_empty());
        assert_eq!(extract_hyperlinks(&pkg).len(), 1);
        assert!(pkg.relationship("rId2").is_some());
    }

    #[test]
    fn second_pass_is_a_noop() {
        let bytes = docx(&[("rId2", "https://host/a", "")], "");
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let links = extract_hyperlinks(&pkg);
        prune_invisible(&mut pkg, &links).unwrap();
        let again = prune_invisible(&mut pkg, &links).unwrap();
        assert!(again.removed.is_empty());
    }

    #[test]
    fn shared_relationship_survives_until_unreferenced() {
        let bytes = docx(&[("rId2", "https://host/a", ""), ("rId2", "https://host/a", "Visible")], "");
        let mut pkg = Package::from_bytes(&bytes, OpenMode::ReadWrite).unwrap();
        let links = extract_hyperlinks(&pkg);
        let out = prune_invisible(&mut pkg, &links).unwrap();
        assert_eq!(out.removed.len(), 1);
        assert!(pkg.relationship("rId2").is_some());
    }
}
