//! Per-hyperlink edit rules.
//!
//! Pure functions that decide what should happen to one link given the
//! record the lookup service returned for it. Nothing here touches a
//! package; the mutation engine applies a [`LinkPlan`] afterwards.
//!
//! Rules run in a fixed precedence:
//!
//! 1. **Retarget**: `base + "!/view?docid=" + id`, document id preferred.
//! 2. **Content-id suffix**: upgrade ` (12345)` to ` (012345)`, or append
//!    the six-digit form, unless a status suffix is already present.
//! 3. **Title**: compare the text (minus suffix) against the service title;
//!    replace it or just report the difference.
//! 4. **Status suffix**: append ` - Expired` for expired records.
//!
//! Running the rules on their own output produces no further changes.

use crate::changelog::{ChangeEntry, ChangeType};
use crate::identifier::{docid_param, is_file_url};
use crate::models::{DocumentRecord, Hyperlink, LinkStatus};

pub const EXPIRED_SUFFIX: &str = " - Expired";
pub const NOT_FOUND_SUFFIX: &str = " - Not Found";
/// Path segment placed between the retarget base and the chosen id.
pub const VIEW_PATH: &str = "!/view?docid=";
/// Length of the formatted six-digit suffix, ` (######)`.
pub const SUFFIX_LEN: usize = 9;

/// Switches controlling which rules fire.
#[derive(Debug, Clone)]
pub struct RuleOptions {
    pub retarget_base: String,
    pub fix_content_ids: bool,
    pub auto_replace_titles: bool,
    pub report_title_changes: bool,
    pub append_status_suffixes: bool,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            retarget_base: String::new(),
            fix_content_ids: true,
            auto_replace_titles: false,
            report_title_changes: true,
            append_status_suffixes: true,
        }
    }
}

/// Outcome of running the rules against one link.
#[derive(Debug, Clone, Default)]
pub struct LinkPlan {
    pub new_url: Option<String>,
    pub new_text: Option<String>,
    pub status: LinkStatus,
    pub entries: Vec<ChangeEntry>,
}

impl LinkPlan {
    pub fn is_noop(&self) -> bool {
        self.new_url.is_none() && self.new_text.is_none()
    }
}

/// The two display forms of a content id suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdSuffix {
    pub last6: String,
    pub last5: String,
}

impl ContentIdSuffix {
    /// ` (######)`
    pub fn six(&self) -> String {
        format!(" ({})", self.last6)
    }

    /// ` (#####)`
    pub fn five(&self) -> String {
        format!(" ({})", self.last5)
    }
}

/// Compute the suffix digits for a content id.
///
/// The last six characters, left-padded with zeros when the id is shorter.
/// For ids shorter than six characters the five-digit form equals the
/// six-digit one, so the upgrade branch can never fire for them.
pub fn content_id_suffix(content_id: &str) -> Option<ContentIdSuffix> {
    let content_id = content_id.trim();
    if content_id.is_empty() {
        return None;
    }
    let chars: Vec<char> = content_id.chars().collect();
    if chars.len() < 6 {
        let padded = format!("{:0>6}", content_id);
        return Some(ContentIdSuffix {
            last6: padded.clone(),
            last5: padded,
        });
    }
    let last6: String = chars[chars.len() - 6..].iter().collect();
    let last5: String = chars[chars.len() - 5..].iter().collect();
    Some(ContentIdSuffix { last6, last5 })
}

/// Case-insensitive (ASCII) `ends_with`.
pub fn ends_with_ci(text: &str, suffix: &str) -> bool {
    if suffix.len() > text.len() {
        return false;
    }
    let start = text.len() - suffix.len();
    text.is_char_boundary(start) && text[start..].eq_ignore_ascii_case(suffix)
}

fn strip_suffix_ci<'a>(text: &'a str, suffix: &str) -> &'a str {
    if ends_with_ci(text, suffix) {
        &text[..text.len() - suffix.len()]
    } else {
        text
    }
}

/// Text already ends in ` - Expired` or ` - Not Found`.
pub fn has_status_suffix(text: &str) -> bool {
    let text = text.trim_end();
    ends_with_ci(text, EXPIRED_SUFFIX) || ends_with_ci(text, NOT_FOUND_SUFFIX)
}

/// URL a link with this record should point at.
pub fn retarget_url(base: &str, record: &DocumentRecord) -> Option<String> {
    record
        .preferred_id()
        .map(|id| format!("{}{}{}", base, VIEW_PATH, id))
}

/// Decide whether `link` must be retargeted to `target`.
///
/// Ordinary links retarget when the target differs ignoring case. Two cases
/// force a retarget on any byte difference: links whose `docid` is the
/// content id while a document id exists, and `file:` links.
fn retarget_reason(link: &Hyperlink, record: &DocumentRecord, target: &str) -> Option<&'static str> {
    if is_file_url(&link.url) {
        return (link.url != target).then_some("legacy file link retargeted");
    }
    let content_only = !record.document_id.trim().is_empty()
        && docid_param(&link.url)
            .map(|docid| docid.eq_ignore_ascii_case(record.content_id.trim()))
            .unwrap_or(false);
    if content_only {
        return (link.url != target).then_some("content id link normalised to document id");
    }
    (!link.url.eq_ignore_ascii_case(target)).then_some("target updated")
}

/// Run every rule for a link that was found by the lookup service.
pub fn plan_link(link: &Hyperlink, record: &DocumentRecord, opts: &RuleOptions) -> LinkPlan {
    let mut plan = LinkPlan {
        status: LinkStatus::from_service(&record.status),
        ..Default::default()
    };

    if let Some(target) = retarget_url(&opts.retarget_base, record) {
        if let Some(reason) = retarget_reason(link, record, &target) {
            plan.entries.push(
                ChangeEntry::new(ChangeType::HyperlinkUpdated, &link.id)
                    .values(&link.url, &target)
                    .details(reason),
            );
            plan.new_url = Some(target);
        }
    }

    let mut text = link.display_text.clone();

    if !has_status_suffix(&text) {
        // without a content id the title is compared against the whole text
        let six = match content_id_suffix(&record.content_id) {
            Some(suffix) => {
                let six = suffix.six();
                if opts.fix_content_ids {
                    let five = suffix.five();
                    if suffix.last5 != suffix.last6 && ends_with_ci(&text, &five) && !ends_with_ci(&text, &six) {
                        let upgraded = format!("{}{}", &text[..text.len() - five.len()], six);
                        plan.entries.push(
                            ChangeEntry::new(ChangeType::ContentIdUpdated, &link.id)
                                .values(&text, &upgraded)
                                .details("five-digit content id suffix upgraded"),
                        );
                        text = upgraded;
                    } else if !ends_with_ci(&text, &six) {
                        let appended = format!("{}{}", text, six);
                        plan.entries.push(
                            ChangeEntry::new(ChangeType::ContentIdUpdated, &link.id)
                                .values(&text, &appended)
                                .details("content id suffix appended"),
                        );
                        text = appended;
                    }
                }
                six
            }
            None => String::new(),
        };
        apply_title_rule(link, record, opts, &six, &mut text, &mut plan);
    }

    if opts.append_status_suffixes
        && plan.status == LinkStatus::Expired
        && !has_status_suffix(&text)
    {
        let expired = format!("{}{}", text, EXPIRED_SUFFIX);
        plan.entries.push(
            ChangeEntry::new(ChangeType::StatusAppended, &link.id)
                .values(&text, &expired)
                .details("document expired"),
        );
        text = expired;
    }

    if text != link.display_text {
        plan.new_text = Some(text);
    }
    plan
}

fn apply_title_rule(
    link: &Hyperlink,
    record: &DocumentRecord,
    opts: &RuleOptions,
    six: &str,
    text: &mut String,
    plan: &mut LinkPlan,
) {
    let title = record.title.trim();
    if title.is_empty() {
        return;
    }
    let current = strip_suffix_ci(text, six).trim();
    if current.to_lowercase() == title.to_lowercase() {
        return;
    }
    if opts.auto_replace_titles {
        let replaced = format!("{}{}", title, six);
        plan.entries.push(
            ChangeEntry::new(ChangeType::TitleReplaced, &link.id)
                .values(text.as_str(), &replaced)
                .details("display text replaced with service title"),
        );
        *text = replaced;
    } else if opts.report_title_changes {
        plan.entries.push(
            ChangeEntry::new(ChangeType::PossibleTitleChange, &link.id)
                .values(current, title)
                .details("display text differs from service title"),
        );
    }
}

/// Plan for a link whose identifier the service did not return.
pub fn plan_not_found(link: &Hyperlink, opts: &RuleOptions) -> LinkPlan {
    let mut plan = LinkPlan {
        status: LinkStatus::NotFound,
        ..Default::default()
    };
    if opts.append_status_suffixes && !has_status_suffix(&link.display_text) {
        let text = format!("{}{}", link.display_text, NOT_FOUND_SUFFIX);
        plan.entries.push(
            ChangeEntry::new(ChangeType::StatusAppended, &link.id)
                .values(&link.display_text, &text)
                .details(format!(
                    "identifier {} not found",
                    link.lookup_id.as_deref().unwrap_or_default()
                )),
        );
        plan.new_text = Some(text);
    }
    plan
}
