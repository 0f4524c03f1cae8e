//! Link-graph walk and package metadata extraction.
//!
//! Hyperlinks are read from the main document part in document order. Each
//! `w:hyperlink` element contributes its relationship target (the address),
//! its `w:anchor` / `w:docLocation` attribute (the sub-address), and the
//! concatenated text of its `w:t` descendants. Complete-URL construction and
//! identifier extraction live in [`link_harness_core::identifier`].
//!
//! Element paths are invalidated by every structural edit, so callers
//! re-extract after pruning or retargeting and use [`reconcile`] to carry
//! synthetic ids and resolution results across the re-read.

use link_harness_core::identifier::{build_complete_url, extract_lookup_id, push_unique_id};
use link_harness_core::models::{DocumentMetadata, Hyperlink};

use crate::error::PackageError;
use crate::package::{Package, APP_PROPS_PART, CORE_PROPS_PART};
use crate::xml::{Element, NodePath};

/// Paths of every hyperlink element in the main document, in document order.
pub fn hyperlink_paths(package: &Package) -> Vec<NodePath> {
    package.document.root.find_paths(&|el| el.is("hyperlink"))
}

/// Read one hyperlink element.
pub fn read_hyperlink(package: &Package, element: &Element, ordinal: usize) -> Hyperlink {
    let relationship_id = element.attr("r:id").map(str::to_string);
    let address = relationship_id
        .as_deref()
        .and_then(|id| package.relationship(id))
        .map(|rel| rel.target)
        .unwrap_or_default();
    let fragment = element
        .attr_local("anchor")
        .or_else(|| element.attr_local("docLocation"));
    let complete = build_complete_url(&address, fragment);
    let lookup_id = if complete.url.is_empty() {
        None
    } else {
        extract_lookup_id(&complete.url)
    };

    Hyperlink {
        id: Hyperlink::synthetic_id(ordinal),
        ordinal,
        relationship_id,
        address: complete.address,
        sub_address: complete.sub_address,
        url: complete.url,
        display_text: element.descendant_text("t"),
        has_visual_content: element.has_visible_content(),
        lookup_id,
        ..Default::default()
    }
}

/// Every hyperlink in the main document.
pub fn extract_hyperlinks(package: &Package) -> Vec<Hyperlink> {
    hyperlink_paths(package)
        .iter()
        .enumerate()
        .filter_map(|(ordinal, path)| {
            package
                .document
                .root
                .get(path)
                .map(|el| read_hyperlink(package, el, ordinal))
        })
        .collect()
}

/// Union of lookup identifiers, deduplicated ignoring case, in first-seen order.
pub fn collect_lookup_ids(links: &[Hyperlink]) -> Vec<String> {
    let mut ids = Vec::new();
    for id in links.iter().filter_map(|l| l.lookup_id.as_deref()) {
        push_unique_id(&mut ids, id);
    }
    ids
}

/// Find the element for `link` in the current tree.
///
/// Identity is the current complete URL. The element at the link's ordinal
/// wins when it matches; otherwise the first element with the same URL and
/// display text, then the first with the same URL.
pub fn locate(package: &Package, link: &Hyperlink) -> Option<NodePath> {
    let paths = hyperlink_paths(package);
    let read = |ordinal: usize, path: &NodePath| {
        package
            .document
            .root
            .get(path)
            .map(|el| read_hyperlink(package, el, ordinal))
    };

    if let Some(path) = paths.get(link.ordinal) {
        if let Some(current) = read(link.ordinal, path) {
            if current.url == link.url && current.display_text == link.display_text {
                return Some(path.clone());
            }
        }
    }
    let candidates: Vec<(NodePath, Hyperlink)> = paths
        .iter()
        .enumerate()
        .filter_map(|(i, p)| read(i, p).map(|h| (p.clone(), h)))
        .filter(|(_, h)| h.url == link.url)
        .collect();
    candidates
        .iter()
        .find(|(_, h)| h.display_text == link.display_text)
        .or_else(|| candidates.first())
        .map(|(p, _)| p.clone())
}

/// Carry ids and resolution state from `previous` onto a fresh extraction.
///
/// Links are paired by URL in document order, preferring an exact display
/// text match. Fresh links with no partner keep their positional id unless
/// it collides with a carried one, in which case they get the next free id.
pub fn reconcile(previous: &[Hyperlink], fresh: Vec<Hyperlink>) -> Vec<Hyperlink> {
    let mut used = vec![false; previous.len()];
    let mut out = Vec::with_capacity(fresh.len());
    let mut unmatched = Vec::new();

    for mut link in fresh {
        let partner = (0..previous.len())
            .find(|&i| !used[i] && previous[i].url == link.url && previous[i].display_text == link.display_text)
            .or_else(|| (0..previous.len()).find(|&i| !used[i] && previous[i].url == link.url));
        match partner {
            Some(i) => {
                used[i] = true;
                let old = &previous[i];
                link.id = old.id.clone();
                link.lookup_id = old.lookup_id.clone().or(link.lookup_id);
                link.content_id = old.content_id.clone();
                link.document_id = old.document_id.clone();
                link.status = old.status;
                link.error_message = old.error_message.clone();
            }
            None => unmatched.push(out.len()),
        }
        out.push(link);
    }

    let mut next = previous.len().max(out.len());
    for idx in unmatched {
        let taken = out
            .iter()
            .enumerate()
            .any(|(j, l)| j != idx && l.id == out[idx].id);
        if taken {
            out[idx].id = Hyperlink::synthetic_id(next);
            next += 1;
        }
    }
    out
}

/// Title, author and word count from the package properties.
///
/// The word count comes from the extended properties when present and
/// positive, otherwise from counting the words of the body text.
pub fn extract_metadata(package: &Package) -> Result<DocumentMetadata, PackageError> {
    let mut metadata = DocumentMetadata::default();

    if let Some(core) = package.xml_part(CORE_PROPS_PART)? {
        metadata.title = non_empty(core.root.find_child("title").map(Element::inner_text));
        metadata.author = non_empty(core.root.find_child("creator").map(Element::inner_text));
    }
    if let Some(app) = package.xml_part(APP_PROPS_PART)? {
        metadata.word_count = app
            .root
            .find_child("Words")
            .and_then(|w| w.inner_text().trim().parse().ok())
            .unwrap_or(0);
    }
    if metadata.word_count == 0 {
        metadata.word_count = document_text(&package.document.root)
            .split_whitespace()
            .count() as u64;
    }
    Ok(metadata)
}

/// Plain text of the body: `w:t` content, paragraphs separated by newlines.
pub fn document_text(root: &Element) -> String {
    let mut out = String::new();
    root.visit(&mut |el| {
        if el.is("p") {
            if !out.is_empty() {
                out.push('\n');
            }
        } else if el.is("t") {
            out.push_str(&el.inner_text());
        } else if el.is("tab") {
            out.push('\t');
        }
    });
    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
