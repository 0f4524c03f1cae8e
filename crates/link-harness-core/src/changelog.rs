//! Append-only audit trail for one document.
//!
//! Every edit the pipeline makes (or declines to make) is recorded as a
//! [`ChangeEntry`]. Entries are never removed; [`ChangeLog::summary`] is
//! derived by tallying entry types, and [`ChangeLog::render_report`] produces
//! the plain-text changelog written alongside a batch run.
//!
//! # Report format
//!
//! ```text
//! Changelog for policy.docx
//! Summary: 2 hyperlinks updated, 1 hyperlink removed
//!
//! == Hyperlinks updated (2) ==
//! - [hl-0001] https://old/a -> https://new/!/view?docid=DOC1
//! ...
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Kind of change recorded in a [`ChangeLog`].
///
/// Variant order is the section order of the rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Relationship retargeted to a new URL.
    HyperlinkUpdated,
    /// Content-id suffix appended or upgraded from 5 to 6 digits.
    ContentIdUpdated,
    /// Display text replaced with the title from the lookup service.
    TitleReplaced,
    /// Display text differs from the service title; left untouched.
    PossibleTitleChange,
    /// `- Expired` or `- Not Found` appended to display text.
    StatusAppended,
    /// Invisible hyperlink removed from the document.
    HyperlinkRemoved,
    /// Configured find/replace pair applied to document text.
    TextReplaced,
    Error,
    Information,
}

impl ChangeType {
    pub fn heading(&self) -> &'static str {
        match self {
            ChangeType::HyperlinkUpdated => "Hyperlinks updated",
            ChangeType::ContentIdUpdated => "Content IDs updated",
            ChangeType::TitleReplaced => "Titles replaced",
            ChangeType::PossibleTitleChange => "Possible title changes",
            ChangeType::StatusAppended => "Status suffixes appended",
            ChangeType::HyperlinkRemoved => "Hyperlinks removed",
            ChangeType::TextReplaced => "Text replaced",
            ChangeType::Error => "Errors",
            ChangeType::Information => "Information",
        }
    }

    fn noun(&self, count: usize) -> String {
        let (one, many) = match self {
            ChangeType::HyperlinkUpdated => ("hyperlink updated", "hyperlinks updated"),
            ChangeType::ContentIdUpdated => ("content id updated", "content ids updated"),
            ChangeType::TitleReplaced => ("title replaced", "titles replaced"),
            ChangeType::PossibleTitleChange => ("possible title change", "possible title changes"),
            ChangeType::StatusAppended => ("status suffix appended", "status suffixes appended"),
            ChangeType::HyperlinkRemoved => ("hyperlink removed", "hyperlinks removed"),
            ChangeType::TextReplaced => ("text replacement", "text replacements"),
            ChangeType::Error => ("error", "errors"),
            ChangeType::Information => ("note", "notes"),
        };
        format!("{} {}", count, if count == 1 { one } else { many })
    }

    /// Whether an entry of this type means a hyperlink instance was modified.
    pub fn touches_hyperlink(&self) -> bool {
        matches!(
            self,
            ChangeType::HyperlinkUpdated
                | ChangeType::ContentIdUpdated
                | ChangeType::TitleReplaced
                | ChangeType::StatusAppended
                | ChangeType::HyperlinkRemoved
        )
    }
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    pub change_type: ChangeType,
    /// Hyperlink id or another element locator; empty for document-wide notes.
    pub element_id: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEntry {
    pub fn new(change_type: ChangeType, element_id: impl Into<String>) -> Self {
        Self {
            change_type,
            element_id: element_id.into(),
            old_value: None,
            new_value: None,
            details: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn values(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old_value = Some(old.into());
        self.new_value = Some(new.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str("- ");
        if !self.element_id.is_empty() {
            out.push_str(&format!("[{}] ", self.element_id));
        }
        match (&self.old_value, &self.new_value) {
            (Some(old), Some(new)) => out.push_str(&format!("{} -> {}", old, new)),
            (Some(old), None) => out.push_str(old),
            (None, Some(new)) => out.push_str(new),
            (None, None) => out.push_str(&self.details),
        }
        out.push('\n');
        if (self.old_value.is_some() || self.new_value.is_some()) && !self.details.is_empty() {
            out.push_str(&format!("  {}\n", self.details));
        }
    }
}

/// Ordered list of [`ChangeEntry`] values plus a derived summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeLog {
    pub entries: Vec<ChangeEntry>,
    pub summary: String,
}

impl ChangeLog {
    pub fn record(&mut self, entry: ChangeEntry) {
        self.entries.push(entry);
        self.summary = self.tally_summary();
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ChangeEntry>) {
        self.entries.extend(entries);
        self.summary = self.tally_summary();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> BTreeMap<ChangeType, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.change_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, change_type: ChangeType) -> usize {
        self.entries
            .iter()
            .filter(|e| e.change_type == change_type)
            .count()
    }

    /// Distinct element ids touched by hyperlink-modifying entries.
    pub fn changed_hyperlinks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.change_type.touches_hyperlink() && !e.element_id.is_empty())
            .map(|e| e.element_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn tally_summary(&self) -> String {
        let counts = self.counts();
        if counts.is_empty() {
            return "no changes".to_string();
        }
        counts
            .iter()
            .map(|(kind, count)| kind.noun(*count))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Plain-text report: one section per change type, one or two lines per entry.
    pub fn render_report(&self, file_name: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("Changelog for {}\n", file_name));
        out.push_str(&format!("Summary: {}\n", self.tally_summary()));

        let mut sections: BTreeMap<ChangeType, Vec<&ChangeEntry>> = BTreeMap::new();
        for entry in &self.entries {
            sections.entry(entry.change_type).or_default().push(entry);
        }
        for (kind, entries) in sections {
            out.push_str(&format!("\n== {} ({}) ==\n", kind.heading(), entries.len()));
            for entry in entries {
                entry.render(&mut out);
            }
        }
        out
    }
}
