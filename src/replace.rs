//! Text replacement and package optimization passes.
//!
//! Replacement applies the configured find/replace pairs to hyperlink
//! display text (rewriting the hyperlink's runs as the mutation engine
//! does) and to every other `w:t` element in place. Matches are found per
//! text element: a phrase split across runs is not matched.
//!
//! Optimization strips `w:proofErr` markers and runs whose only content is
//! empty text. Runs inside hyperlinks are left alone.

use regex::{NoExpand, Regex, RegexBuilder};

use link_harness_core::changelog::{ChangeEntry, ChangeType};
use link_harness_core::models::Hyperlink;

use crate::config::Replacement;
use crate::error::PackageError;
use crate::extract::{hyperlink_paths, locate};
use crate::mutation::rewrite_text;
use crate::package::Package;
use crate::xml::{Element, Node};

struct CompiledReplacement {
    pattern: Regex,
    replace: String,
    label: String,
}

/// Compiled find/replace pairs.
pub struct TextReplacer {
    rules: Vec<CompiledReplacement>,
}

impl TextReplacer {
    pub fn new(replacements: &[Replacement]) -> Result<Self, regex::Error> {
        let mut rules = Vec::with_capacity(replacements.len());
        for r in replacements {
            let escaped = regex::escape(&r.find);
            let source = if r.whole_word {
                format!(r"\b{}\b", escaped)
            } else {
                escaped
            };
            let pattern = RegexBuilder::new(&source)
                .case_insensitive(!r.match_case)
                .build()?;
            rules.push(CompiledReplacement {
                pattern,
                replace: r.replace.clone(),
                label: format!("'{}' -> '{}'", r.find, r.replace),
            });
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every pair in order. `None` when nothing matched.
    pub fn apply_str(&self, text: &str) -> Option<(String, Vec<&str>)> {
        let mut current = text.to_string();
        let mut applied = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(&current) {
                current = rule
                    .pattern
                    .replace_all(&current, NoExpand(&rule.replace))
                    .into_owned();
                applied.push(rule.label.as_str());
            }
        }
        (current != text).then_some((current, applied))
    }

    /// Run the replacement pass over the main document.
    pub fn apply(
        &self,
        package: &mut Package,
        links: &mut [Hyperlink],
    ) -> Result<Vec<ChangeEntry>, PackageError> {
        let mut entries = Vec::new();
        if self.is_empty() {
            return Ok(entries);
        }
        package.ensure_writable()?;

        for link in links.iter_mut().filter(|l| !l.is_blank()) {
            let Some((text, applied)) = self.apply_str(&link.display_text) else {
                continue;
            };
            let path = locate(package, link).ok_or_else(|| PackageError::LinkNotFound(link.id.clone()))?;
            let element = package
                .document
                .root
                .get_mut(&path)
                .ok_or_else(|| PackageError::LinkNotFound(link.id.clone()))?;
            rewrite_text(element, &text)
                .map_err(|msg| PackageError::Structure(format!("{}: {}", link.id, msg)))?;
            entries.push(
                ChangeEntry::new(ChangeType::TextReplaced, &link.id)
                    .values(&link.display_text, &text)
                    .details(applied.join(", ")),
            );
            link.display_text = text;
        }

        let link_paths = hyperlink_paths(package);
        let text_paths = package.document.root.find_paths(&|e| e.is("t"));
        for (ordinal, path) in text_paths.iter().enumerate() {
            if link_paths.iter().any(|lp| path.starts_with(lp)) {
                continue;
            }
            let Some(element) = package.document.root.get_mut(path) else {
                continue;
            };
            let old = element.inner_text();
            let Some((text, applied)) = self.apply_str(&old) else {
                continue;
            };
            element.children = vec![Node::Text(text.clone())];
            element.set_attr("xml:space", "preserve");
            entries.push(
                ChangeEntry::new(ChangeType::TextReplaced, format!("text-{:04}", ordinal + 1))
                    .values(old, text)
                    .details(applied.join(", ")),
            );
        }
        Ok(entries)
    }
}

/// Counts from one optimization pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeSummary {
    pub proofing_marks: usize,
    pub empty_runs: usize,
}

impl OptimizeSummary {
    pub fn total(&self) -> usize {
        self.proofing_marks + self.empty_runs
    }

    /// Informational changelog entry, or `None` when nothing was removed.
    pub fn entry(&self) -> Option<ChangeEntry> {
        (self.total() > 0).then(|| {
            ChangeEntry::new(ChangeType::Information, "").details(format!(
                "optimization removed {} proofing mark(s) and {} empty run(s)",
                self.proofing_marks, self.empty_runs
            ))
        })
    }
}

/// Strip proofing markers and empty runs from the main document.
pub fn optimize(package: &mut Package) -> Result<OptimizeSummary, PackageError> {
    package.ensure_writable()?;
    let mut summary = OptimizeSummary::default();
    strip(&mut package.document.root, false, &mut summary);
    Ok(summary)
}

fn strip(element: &mut Element, in_hyperlink: bool, summary: &mut OptimizeSummary) {
    let in_hyperlink = in_hyperlink || element.is("hyperlink");
    element.children.retain(|node| match node {
        Node::Element(e) if e.is("proofErr") => {
            summary.proofing_marks += 1;
            false
        }
        Node::Element(e) if !in_hyperlink && is_empty_run(e) => {
            summary.empty_runs += 1;
            false
        }
        _ => true,
    });
    for child in element.children.iter_mut() {
        if let Node::Element(e) = child {
            strip(e, in_hyperlink, summary);
        }
    }
}

/// A run whose content is nothing but properties and empty `w:t` elements.
fn is_empty_run(run: &Element) -> bool {
    if !run.is("r") {
        return false;
    }
    let mut saw_text = false;
    for child in run.child_elements() {
        match child.local_name() {
            "rPr" => {}
            "t" if child.inner_text().is_empty() => saw_text = true,
            _ => return false,
        }
    }
    saw_text
}
