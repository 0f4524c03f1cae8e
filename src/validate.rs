//! Integrity guard: structural validation of an open package.
//!
//! [`IntegrityGuard::validate`] walks the package and reports every problem
//! it finds as a [`ValidationIssue`] with a validator-style message. Issues
//! are then split against an [`Allowlist`]: exact-match messages for
//! cosmetic attributes older schema revisions do not declare, and
//! prefix-match messages for attribute values produced by intermediate
//! editing states. Anything left after filtering is fatal at that
//! checkpoint.
//!
//! Checks performed:
//!
//! | Check | Message |
//! |-------|---------|
//! | required part present | `The part '<name>' is missing.` |
//! | part is well-formed XML | `The part is not well-formed XML: ...` |
//! | main document shape | `The element 'w:document' is missing the required child 'w:body'.` |
//! | relationship rows complete | `The required attribute '<attr>' is missing.` |
//! | relationship ids unique | `Duplicate relationship id '<id>'.` |
//! | `r:id` resolves | `The relationship '<id>' referenced by attribute 'r:id' does not exist.` |
//! | hyperlink points at a hyperlink relationship | `The relationship '<id>' referenced by a hyperlink is not a hyperlink relationship.` |
//! | `w:id` is a decimal number | `The attribute 'w:id' has invalid value '<v>'. ...` |
//! | table-look banding attributes | `The attribute '<ns>:<name>' is not declared.` |

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::{SessionError, ValidationFailure};
use crate::package::{
    OpenMode, Package, CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART, ROOT_RELS_PART,
};
use crate::xml::XmlDocument;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const TABLE_LOOK_ATTRIBUTES: [&str; 6] = [
    "firstRow",
    "lastRow",
    "firstColumn",
    "lastColumn",
    "noHBand",
    "noVBand",
];

const REQUIRED_PARTS: [&str; 3] = [CONTENT_TYPES_PART, ROOT_RELS_PART, DOCUMENT_PART];

/// Points in a session at which the package is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    AfterOpen,
    AfterPrune,
    AfterMutation,
    AfterReplacement,
    AfterOptimization,
    BeforeSave,
    AfterSave,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::AfterOpen => "after open",
            Checkpoint::AfterPrune => "after pruning",
            Checkpoint::AfterMutation => "after link mutation",
            Checkpoint::AfterReplacement => "after text replacement",
            Checkpoint::AfterOptimization => "after optimization",
            Checkpoint::BeforeSave => "before save",
            Checkpoint::AfterSave => "after save",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validator finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub part: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(part: &str, message: impl Into<String>) -> Self {
        Self {
            part: part.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.part, self.message)
    }
}

/// Validator output split by the allowlist.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub ignored: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Messages that never fail a checkpoint.
#[derive(Debug, Clone)]
pub struct Allowlist {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl Default for Allowlist {
    fn default() -> Self {
        let exact = TABLE_LOOK_ATTRIBUTES
            .iter()
            .map(|attr| undeclared_attribute_message(attr))
            .collect();
        Self {
            exact,
            prefixes: vec!["The attribute 'w:id' has invalid value".to_string()],
        }
    }
}

impl Allowlist {
    /// Built-in entries plus configured extras.
    pub fn with_extra(exact: &[String], prefixes: &[String]) -> Self {
        let mut list = Self::default();
        list.exact.extend(exact.iter().cloned());
        list.prefixes.extend(prefixes.iter().cloned());
        list
    }

    pub fn is_ignorable(&self, message: &str) -> bool {
        self.exact.contains(message) || self.prefixes.iter().any(|p| message.starts_with(p.as_str()))
    }
}

fn undeclared_attribute_message(local: &str) -> String {
    format!("The attribute '{}:{}' is not declared.", W_NS, local)
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityGuard {
    allowlist: Allowlist,
}

impl IntegrityGuard {
    pub fn new(allowlist: Allowlist) -> Self {
        Self { allowlist }
    }

    /// Run every check and split the findings against the allowlist.
    pub fn validate(&self, package: &Package) -> ValidationReport {
        let mut report = ValidationReport::default();
        for issue in collect_issues(package) {
            if self.allowlist.is_ignorable(&issue.message) {
                report.ignored.push(issue);
            } else {
                report.errors.push(issue);
            }
        }
        report
    }

    /// Validate at a checkpoint; remaining errors abort the session.
    pub fn check(
        &self,
        package: &Package,
        checkpoint: Checkpoint,
    ) -> Result<ValidationReport, ValidationFailure> {
        let report = self.validate(package);
        if !report.ignored.is_empty() {
            tracing::debug!(
                checkpoint = %checkpoint,
                ignored = report.ignored.len(),
                "ignorable validation errors filtered"
            );
        }
        if report.is_clean() {
            return Ok(report);
        }
        for issue in &report.errors {
            tracing::warn!(checkpoint = %checkpoint, "{}", issue);
        }
        Err(ValidationFailure {
            checkpoint: checkpoint.to_string(),
            issues: report.errors,
        })
    }

    /// Reopen a saved file read-only and validate it.
    ///
    /// The read-only handle lives only for the duration of this call.
    pub fn verify_file(&self, path: &Path) -> Result<ValidationReport, SessionError> {
        let package = Package::open(path, OpenMode::ReadOnly)?;
        Ok(self.check(&package, Checkpoint::AfterSave)?)
    }
}

fn collect_issues(package: &Package) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for part in REQUIRED_PARTS {
        if !package.has_part(part) {
            issues.push(ValidationIssue::new(part, format!("The part '{}' is missing.", part)));
        }
    }

    for name in package.part_names() {
        if name == DOCUMENT_PART || name == DOCUMENT_RELS_PART {
            continue;
        }
        if !(name.ends_with(".xml") || name.ends_with(".rels")) {
            continue;
        }
        if let Some(data) = package.raw_part(name) {
            if let Err(e) = XmlDocument::parse(data) {
                issues.push(ValidationIssue::new(
                    name,
                    format!("The part is not well-formed XML: {}", e),
                ));
            }
        }
    }

    check_document(package, &mut issues);
    check_relationships(package, &mut issues);
    issues
}

fn check_document(package: &Package, issues: &mut Vec<ValidationIssue>) {
    let root = &package.document.root;
    if !root.is("document") {
        issues.push(ValidationIssue::new(
            DOCUMENT_PART,
            format!("The root element '{}' is not 'w:document'.", root.name),
        ));
    } else if root.find_child("body").is_none() {
        issues.push(ValidationIssue::new(
            DOCUMENT_PART,
            "The element 'w:document' is missing the required child 'w:body'.",
        ));
    }

    let relationships = package.relationships();
    root.visit(&mut |el| {
        if let Some(id) = el.attr("r:id") {
            match relationships.iter().find(|r| r.id == id) {
                None => issues.push(ValidationIssue::new(
                    DOCUMENT_PART,
                    format!(
                        "The relationship '{}' referenced by attribute 'r:id' does not exist.",
                        id
                    ),
                )),
                Some(rel) if el.is("hyperlink") && !rel.is_hyperlink() => {
                    issues.push(ValidationIssue::new(
                        DOCUMENT_PART,
                        format!(
                            "The relationship '{}' referenced by a hyperlink is not a hyperlink relationship.",
                            id
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
        if let Some(value) = el.attr("w:id") {
            if value.trim().parse::<i32>().is_err() {
                issues.push(ValidationIssue::new(
                    DOCUMENT_PART,
                    format!(
                        "The attribute 'w:id' has invalid value '{}'. The text value cannot be parsed as a decimal number.",
                        value
                    ),
                ));
            }
        }
        if el.is("tblLook") {
            for (key, _) in &el.attributes {
                let local = crate::xml::local_name(key);
                if key.starts_with("w:") && TABLE_LOOK_ATTRIBUTES.contains(&local) {
                    issues.push(ValidationIssue::new(
                        DOCUMENT_PART,
                        undeclared_attribute_message(local),
                    ));
                }
            }
        }
    });
}

fn check_relationships(package: &Package, issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for rel in package.relationships() {
        if !seen.insert(rel.id.clone()) {
            issues.push(ValidationIssue::new(
                DOCUMENT_RELS_PART,
                format!("Duplicate relationship id '{}'.", rel.id),
            ));
        }
        if rel.rel_type.is_empty() {
            issues.push(ValidationIssue::new(
                DOCUMENT_RELS_PART,
                "The required attribute 'Type' is missing.",
            ));
        }
        if rel.target.is_empty() && !rel.external {
            issues.push(ValidationIssue::new(
                DOCUMENT_RELS_PART,
                "The required attribute 'Target' is missing.",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::fixtures::docx;
    use crate::xml::Element;

    fn open(bytes: &[u8]) -> Package {
        Package::from_bytes(bytes, OpenMode::ReadWrite).unwrap()
    }

    #[test]
    fn fixture_is_clean() {
        let pkg = open(&docx(&[("rId2", "https://a/b", "A")], "body"));
        let report = IntegrityGuard::default().validate(&pkg);
        assert!(report.is_clean(), "{:?}", report.errors);
        assert!(report.ignored.is_empty());
    }

    #[test]
    fn dangling_relationship_is_fatal() {
        let mut pkg = open(&docx(&[("rId2", "https://a/b", "A")], ""));
        pkg.delete_relationship("rId2").unwrap();
        let err = IntegrityGuard::default()
            .check(&pkg, Checkpoint::AfterMutation)
            .unwrap_err();
        assert_eq!(err.checkpoint, "after link mutation");
        assert_eq!(err.issues.len(), 1);
        assert!(err.issues[0].message.contains("'rId2'"));
    }

    #[test]
    fn table_look_and_id_warnings_are_ignored() {
        let mut pkg = open(&docx(&[], ""));
        let body = vec![0];
        let body_el = pkg.document.root.get_mut(&body).unwrap();
        body_el.children.insert(
            0,
            crate::xml::Node::Element(
                Element::new("w:tbl").with_child(
                    Element::new("w:tblPr").with_child(
                        Element::new("w:tblLook")
                            .with_attr("w:val", "04A0")
                            .with_attr("w:firstRow", "1")
                            .with_attr("w:noVBand", "1"),
                    ),
                ),
            ),
        );
        body_el.children.insert(
            0,
            crate::xml::Node::Element(Element::new("w:bookmarkStart").with_attr("w:id", "_x1")),
        );

        let report = IntegrityGuard::default()
            .check(&pkg, Checkpoint::AfterOpen)
            .unwrap();
        assert_eq!(report.ignored.len(), 3);
        assert!(report.ignored.iter().any(|i| i.message
            == "The attribute 'http://schemas.openxmlformats.org/wordprocessingml/2006/main:firstRow' is not declared."));
    }

    #[test]
    fn configured_prefix_extends_allowlist() {
        let list = Allowlist::with_extra(&[], &["The relationship 'rId9'".to_string()]);
        assert!(list.is_ignorable(
            "The relationship 'rId9' referenced by attribute 'r:id' does not exist."
        ));
        assert!(!Allowlist::default().is_ignorable(
            "The relationship 'rId9' referenced by attribute 'r:id' does not exist."
        ));
    }

    #[test]
    fn missing_body_is_reported() {
        let mut pkg = open(&docx(&[], ""));
        pkg.document.root.children.clear();
        let report = IntegrityGuard::default().validate(&pkg);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("'w:body'"));
    }

    #[test]
    fn verify_file_reopens_read_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.docx");
        std::fs::write(&path, docx(&[("rId2", "https://a/b", "A")], "")).unwrap();
        assert!(IntegrityGuard::default().verify_file(&path).is_ok());

        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            IntegrityGuard::default().verify_file(&path),
            Err(SessionError::Package(_))
        ));
    }
}
