//! Core data models used throughout Link Harness.
//!
//! These types are the in-memory projection of one package while it flows
//! through a processing session: the [`Document`] with its [`Hyperlink`]s,
//! the metadata records returned by the lookup service, and the per-link
//! edit state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::changelog::ChangeLog;

/// Lifecycle status of a [`Document`].
///
/// `Completed`, `Failed`, and `Recovered` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Processing failed and the file was restored from its backup.
    Recovered,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Recovered
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Recovered => "recovered",
        }
    }
}

/// Resolution status of a single hyperlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    #[default]
    Unknown,
    Active,
    Expired,
    NotFound,
    Invalid,
}

impl LinkStatus {
    /// Map a lookup-service status string onto a link status.
    ///
    /// Anything that is not `Expired` counts as active; the service only
    /// distinguishes the two.
    pub fn from_service(status: &str) -> Self {
        if status.trim().eq_ignore_ascii_case("expired") {
            LinkStatus::Expired
        } else {
            LinkStatus::Active
        }
    }
}

/// Per-link edit state inside the mutation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Unchanged,
    UrlChanged,
    TextChanged,
    UrlAndTextChanged,
    Persisted,
}

impl LinkState {
    /// State after a pending URL and/or text change has been planned.
    pub fn from_changes(url_changed: bool, text_changed: bool) -> Self {
        match (url_changed, text_changed) {
            (false, false) => LinkState::Unchanged,
            (true, false) => LinkState::UrlChanged,
            (false, true) => LinkState::TextChanged,
            (true, true) => LinkState::UrlAndTextChanged,
        }
    }
}

/// One hyperlink instance inside the main document part.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Hyperlink {
    /// Synthetic id, stable for the lifetime of one session (`hl-0001`).
    pub id: String,
    /// Position among the hyperlink elements of the document, in document order.
    pub ordinal: usize,
    /// Relationship id the element points at, if any.
    pub relationship_id: Option<String>,
    /// Address half of the link (relationship target without fragment).
    pub address: String,
    /// Fragment half of the link (anchor, doc location, or split-out `#...`).
    pub sub_address: String,
    /// Complete URL: `address` and `sub_address` joined with `#`.
    pub url: String,
    pub display_text: String,
    /// The element shows a drawing, picture, object, symbol or tab.
    pub has_visual_content: bool,
    pub lookup_id: Option<String>,
    pub content_id: Option<String>,
    pub document_id: Option<String>,
    pub status: LinkStatus,
    pub requires_update: bool,
    /// Retarget pending for this link.
    pub updated_url: Option<String>,
    /// Display-text rewrite pending for this link.
    pub updated_text: Option<String>,
    pub state: LinkState,
    pub error_message: Option<String>,
}

impl Hyperlink {
    pub fn synthetic_id(ordinal: usize) -> String {
        format!("hl-{:04}", ordinal + 1)
    }

    /// Rendered text is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.display_text.trim().is_empty()
    }

    /// Recompute `requires_update` and `state` from the pending values.
    ///
    /// A pending value equal to the observed one is discarded.
    pub fn refresh_pending(&mut self) {
        if self.updated_url.as_deref() == Some(self.url.as_str()) {
            self.updated_url = None;
        }
        if self.updated_text.as_deref() == Some(self.display_text.as_str()) {
            self.updated_text = None;
        }
        let url_changed = self.updated_url.is_some();
        let text_changed = self.updated_text.is_some();
        self.requires_update = url_changed || text_changed;
        self.state = LinkState::from_changes(url_changed, text_changed);
    }

    /// Text the link will carry once pending edits land.
    pub fn effective_text(&self) -> &str {
        self.updated_text.as_deref().unwrap_or(&self.display_text)
    }

    /// URL the link will carry once pending edits land.
    pub fn effective_url(&self) -> &str {
        self.updated_url.as_deref().unwrap_or(&self.url)
    }
}

/// Descriptive metadata read from the package properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub word_count: u64,
}

/// One record returned by the lookup service.
///
/// Immutable once received. A lookup table may map both the document id and
/// the content id onto the same record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "Document_ID", default)]
    pub document_id: String,
    #[serde(rename = "Content_ID", default)]
    pub content_id: String,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl DocumentRecord {
    pub fn is_expired(&self) -> bool {
        LinkStatus::from_service(&self.status) == LinkStatus::Expired
    }

    /// Id used when composing a retargeted URL: document id preferred.
    pub fn preferred_id(&self) -> Option<&str> {
        let doc = self.document_id.trim();
        if !doc.is_empty() {
            return Some(doc);
        }
        let content = self.content_id.trim();
        (!content.is_empty()).then_some(content)
    }
}

/// In-memory projection of one package being processed.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub path: PathBuf,
    pub status: DocumentStatus,
    pub hyperlinks: Vec<Hyperlink>,
    pub metadata: DocumentMetadata,
    pub change_log: ChangeLog,
    pub backup_path: Option<PathBuf>,
    pub error_message: Option<String>,
    /// Every lookup identifier seen in the document, including those of
    /// links that were later pruned.
    pub lookup_ids: Vec<String>,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: DocumentStatus::Pending,
            hyperlinks: Vec::new(),
            metadata: DocumentMetadata::default(),
            change_log: ChangeLog::default(),
            backup_path: None,
            error_message: None,
            lookup_ids: Vec::new(),
        }
    }

    /// Move to a new status. Terminal documents are frozen.
    ///
    /// Returns `false` when the transition was refused.
    pub fn set_status(&mut self, status: DocumentStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
