//! Complete-URL construction and lookup-identifier extraction.
//!
//! A hyperlink in a word-processing package stores its target in two halves:
//! the relationship target (the *address*) and an optional fragment held in
//! an `anchor` or `docLocation` attribute (the *sub-address*). The fragment
//! can also arrive already embedded in the address, either literally
//! (`...#frag`) or URL-escaped (`...%23frag`). [`build_complete_url`]
//! normalises all of these into `address#sub_address`.
//!
//! Identifier extraction runs against the complete URL, in order:
//!
//! 1. [`LOOKUP_ID_PATTERN`], case-insensitive, upper-cased on match.
//! 2. The value of a `docid=` parameter, URL-decoded and trimmed.
//! 3. Nothing; the link takes no part in metadata resolution.
//!
//! The pattern and its word-boundary anchors are a compatibility contract:
//! a seven-digit run after the last dash must never match.
//!
//! ```rust
//! use link_harness_core::identifier::extract_lookup_id;
//!
//! assert_eq!(
//!     extract_lookup_id("https://h/p#docid=cms-abc-000042").as_deref(),
//!     Some("CMS-ABC-000042")
//! );
//! assert_eq!(extract_lookup_id("https://h/x?docid=TSRC-A-1234567"), Some("TSRC-A-1234567".to_string()));
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Lookup identifier pattern shared with the legacy macro tooling.
pub const LOOKUP_ID_PATTERN: &str = r"(?i)\b(TSRC-[^-]+-\d{6}|CMS-[^-]+-\d{6})\b";

static LOOKUP_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(LOOKUP_ID_PATTERN).unwrap());

const DOCID_KEY: &str = "docid=";
const ESCAPED_HASH: &str = "%23";

/// The two halves of a link target and their joined form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompleteUrl {
    pub address: String,
    pub sub_address: String,
    pub url: String,
}

/// Build the complete URL the way the legacy macro does:
/// `address & ("#" & sub_address if sub_address is non-empty)`.
///
/// `fragment_attr` is the element's anchor/doc-location value. A fragment
/// embedded in `address` is split out rather than re-encoded; an explicit
/// attribute wins over an embedded fragment.
pub fn build_complete_url(address: &str, fragment_attr: Option<&str>) -> CompleteUrl {
    let (base, embedded) = split_embedded_fragment(address);
    let sub_address = match fragment_attr.map(str::trim) {
        Some(attr) if !attr.is_empty() => attr.to_string(),
        _ => embedded.unwrap_or_default(),
    };
    let url = join_url(&base, &sub_address);
    CompleteUrl {
        address: base,
        sub_address,
        url,
    }
}

/// Join an address and sub-address with `#` when the latter is non-empty.
pub fn join_url(address: &str, sub_address: &str) -> String {
    if sub_address.is_empty() {
        address.to_string()
    } else {
        format!("{}#{}", address, sub_address)
    }
}

/// Split `address` at a literal `#` or, failing that, at an escaped `%23`.
fn split_embedded_fragment(address: &str) -> (String, Option<String>) {
    if let Some(pos) = address.find('#') {
        let fragment = &address[pos + 1..];
        return (
            address[..pos].to_string(),
            (!fragment.is_empty()).then(|| fragment.to_string()),
        );
    }
    let lower = address.to_ascii_lowercase();
    if let Some(pos) = lower.find(ESCAPED_HASH) {
        let fragment = &address[pos + ESCAPED_HASH.len()..];
        return (
            address[..pos].to_string(),
            (!fragment.is_empty()).then(|| fragment.to_string()),
        );
    }
    (address.to_string(), None)
}

/// Extract the lookup identifier from a complete URL.
pub fn extract_lookup_id(url: &str) -> Option<String> {
    if let Some(caps) = LOOKUP_ID_REGEX.captures(url) {
        return caps.get(1).map(|m| m.as_str().to_uppercase());
    }
    docid_param(url)
}

/// Value of the first `docid=` parameter: up to the next `&` or the end,
/// URL-decoded and trimmed. Empty values count as absent.
pub fn docid_param(url: &str) -> Option<String> {
    let start = url.find(DOCID_KEY)? + DOCID_KEY.len();
    let rest = &url[start..];
    let raw = match rest.find('&') {
        Some(end) => &rest[..end],
        None => rest,
    };
    let decoded = urlencoding::decode(raw)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    let trimmed = decoded.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `file:` scheme links are legacy local pointers that must be retargeted.
pub fn is_file_url(url: &str) -> bool {
    url.trim_start()
        .get(..5)
        .map(|scheme| scheme.eq_ignore_ascii_case("file:"))
        .unwrap_or(false)
}

/// Add each identifier to `ids` unless an equal one (ignoring case) is present.
pub fn push_unique_id(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing.eq_ignore_ascii_case(id)) {
        ids.push(id.to_string());
    }
}
