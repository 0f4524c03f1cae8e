//! Word-processing package handle.
//!
//! A `.docx` file is a zip archive of XML parts. [`Package`] reads every
//! entry into memory once, keeps the main document part and its
//! relationship table as mutable [`XmlDocument`] trees, and writes the whole
//! archive back in the original entry order. Untouched parts are written
//! byte-for-byte.
//!
//! Handles come in two modes. A [`OpenMode::ReadWrite`] handle is consumed
//! by [`Package::save`], so a verification pass must open a fresh
//! [`OpenMode::ReadOnly`] handle after the write handle is gone.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::error::PackageError;
use crate::xml::{Element, XmlDocument};

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const ROOT_RELS_PART: &str = "_rels/.rels";
pub const CORE_PROPS_PART: &str = "docProps/core.xml";
pub const APP_PROPS_PART: &str = "docProps/app.xml";

pub const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const HYPERLINK_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink";

/// Maximum decompressed bytes read from a single zip entry (zip-bomb protection).
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    compression: CompressionMethod,
    is_dir: bool,
}

/// One row of the relationship table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    pub fn is_hyperlink(&self) -> bool {
        self.rel_type == HYPERLINK_REL_TYPE
    }

    fn from_element(el: &Element) -> Option<Self> {
        if !el.is("Relationship") {
            return None;
        }
        Some(Self {
            id: el.attr("Id")?.to_string(),
            rel_type: el.attr("Type").unwrap_or_default().to_string(),
            target: el.attr("Target").unwrap_or_default().to_string(),
            external: el
                .attr("TargetMode")
                .map(|m| m.eq_ignore_ascii_case("External"))
                .unwrap_or(false),
        })
    }
}

/// Relationship id -> target, captured right after open.
///
/// Diagnostic only: structural revert goes through the file backup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipSnapshot {
    pub targets: BTreeMap<String, String>,
}

impl RelationshipSnapshot {
    /// Ids whose target differs from (or is missing in) `other`.
    pub fn changed_since(&self, other: &RelationshipSnapshot) -> Vec<String> {
        self.targets
            .iter()
            .filter(|(id, target)| other.targets.get(*id) != Some(*target))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// An open package.
#[derive(Debug)]
pub struct Package {
    path: Option<PathBuf>,
    mode: OpenMode,
    entries: Vec<Entry>,
    pub document: XmlDocument,
    relationships: XmlDocument,
}

impl Package {
    /// Open the package at `path`.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, PackageError> {
        let bytes = std::fs::read(path)?;
        let mut package = Self::from_bytes(&bytes, mode)?;
        package.path = Some(path.to_path_buf());
        Ok(package)
    }

    /// Parse a package held in memory. The result has no backing file.
    pub fn from_bytes(bytes: &[u8], mode: OpenMode) -> Result<Self, PackageError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let compression = entry.compression();
            let is_dir = entry.is_dir();
            let mut data = Vec::new();
            entry.take(MAX_PART_BYTES).read_to_end(&mut data)?;
            if data.len() as u64 >= MAX_PART_BYTES {
                return Err(PackageError::Zip(format!(
                    "zip entry {} exceeds size limit ({} bytes)",
                    name, MAX_PART_BYTES
                )));
            }
            entries.push(Entry {
                name,
                data,
                compression,
                is_dir,
            });
        }

        let document = {
            let data = entries
                .iter()
                .find(|e| e.name == DOCUMENT_PART)
                .map(|e| e.data.as_slice())
                .ok_or_else(|| PackageError::MissingPart(DOCUMENT_PART.to_string()))?;
            XmlDocument::parse(data).map_err(|e| PackageError::xml(DOCUMENT_PART, e))?
        };
        let relationships = match entries.iter().find(|e| e.name == DOCUMENT_RELS_PART) {
            Some(entry) => XmlDocument::parse(&entry.data)
                .map_err(|e| PackageError::xml(DOCUMENT_RELS_PART, e))?,
            None => XmlDocument::new(Element::new("Relationships").with_attr("xmlns", RELATIONSHIPS_NS)),
        };

        Ok(Self {
            path: None,
            mode,
            entries,
            document,
            relationships,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(|e| !e.is_dir).map(|e| e.name.as_str())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name && !e.is_dir)
    }

    /// Raw bytes of a part as read from the archive. The document and
    /// relationship parts are held as trees; use the typed accessors for them.
    pub fn raw_part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name && !e.is_dir)
            .map(|e| e.data.as_slice())
    }

    /// Parse an auxiliary XML part on demand. `Ok(None)` when absent.
    pub fn xml_part(&self, name: &str) -> Result<Option<XmlDocument>, PackageError> {
        match self.raw_part(name) {
            Some(data) => XmlDocument::parse(data)
                .map(Some)
                .map_err(|e| PackageError::xml(name, e)),
            None => Ok(None),
        }
    }

    // --- relationship table -------------------------------------------

    pub fn relationships(&self) -> Vec<Relationship> {
        self.relationships
            .root
            .child_elements()
            .filter_map(Relationship::from_element)
            .collect()
    }

    pub fn relationship(&self, id: &str) -> Option<Relationship> {
        self.relationships
            .root
            .child_elements()
            .filter_map(Relationship::from_element)
            .find(|r| r.id == id)
    }

    pub fn snapshot(&self) -> RelationshipSnapshot {
        RelationshipSnapshot {
            targets: self
                .relationships()
                .into_iter()
                .map(|r| (r.id, r.target))
                .collect(),
        }
    }

    /// Next free id of the form `rId<n>`.
    pub fn next_relationship_id(&self) -> String {
        let max = self
            .relationships()
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId").and_then(|n| n.parse::<u32>().ok()))
            .max()
            .unwrap_or(0);
        format!("rId{}", max + 1)
    }

    /// Add an external hyperlink relationship and return its id.
    pub fn add_hyperlink_relationship(&mut self, target: &str) -> Result<String, PackageError> {
        self.ensure_writable()?;
        if target.trim().is_empty() {
            return Err(PackageError::Relationship(
                "hyperlink target is empty".to_string(),
            ));
        }
        let id = self.next_relationship_id();
        let rel = Element::new("Relationship")
            .with_attr("Id", id.as_str())
            .with_attr("Type", HYPERLINK_REL_TYPE)
            .with_attr("Target", target)
            .with_attr("TargetMode", "External");
        self.relationships.root.children.push(crate::xml::Node::Element(rel));
        Ok(id)
    }

    /// Delete a relationship. Returns `false` when it was already gone.
    pub fn delete_relationship(&mut self, id: &str) -> Result<bool, PackageError> {
        self.ensure_writable()?;
        let removed = self
            .relationships
            .root
            .remove_where(&|el| el.is("Relationship") && el.attr("Id") == Some(id));
        Ok(removed > 0)
    }

    /// Number of elements in the main document that reference `id`.
    pub fn relationship_references(&self, id: &str) -> usize {
        let mut count = 0;
        self.document.root.visit(&mut |el| {
            if el.attr("r:id") == Some(id) {
                count += 1;
            }
        });
        count
    }

    pub fn ensure_writable(&self) -> Result<(), PackageError> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(PackageError::Structure(
                "package is open read-only".to_string(),
            )),
        }
    }

    // --- persistence ---------------------------------------------------

    /// Serialize the package, entries in their original order.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        let document = self
            .document
            .to_bytes()
            .map_err(|e| PackageError::xml(DOCUMENT_PART, e))?;
        let relationships = self
            .relationships
            .to_bytes()
            .map_err(|e| PackageError::xml(DOCUMENT_RELS_PART, e))?;
        let mut wrote_rels = false;

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            let options = SimpleFileOptions::default().compression_method(match entry.compression {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            });
            if entry.is_dir {
                zip.add_directory(entry.name.as_str(), options)?;
                continue;
            }
            zip.start_file(entry.name.as_str(), options)?;
            let data: &[u8] = match entry.name.as_str() {
                DOCUMENT_PART => &document,
                DOCUMENT_RELS_PART => {
                    wrote_rels = true;
                    &relationships
                }
                _ => &entry.data,
            };
            zip.write_all(data)?;
        }
        if !wrote_rels && !self.relationships.root.children.is_empty() {
            zip.start_file(DOCUMENT_RELS_PART, SimpleFileOptions::default())?;
            zip.write_all(&relationships)?;
        }
        Ok(zip.finish()?.into_inner())
    }

    /// Serialize and release the handle, returning the backing path and bytes.
    pub fn into_bytes(self) -> Result<(PathBuf, Vec<u8>), PackageError> {
        self.ensure_writable()?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| PackageError::MissingPart("package has no backing file".to_string()))?;
        let bytes = self.to_bytes()?;
        Ok((path, bytes))
    }

    /// Write the package back to its file atomically and release the handle.
    pub fn save(self) -> Result<PathBuf, PackageError> {
        let (path, bytes) = self.into_bytes()?;
        persist_bytes(&path, &bytes)?;
        Ok(path)
    }
}

/// Replace `path` with `bytes` through a synced temporary sibling file.
pub fn persist_bytes(path: &Path, bytes: &[u8]) -> Result<(), PackageError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PackageError::Io(e.error))?;
    Ok(())
}
