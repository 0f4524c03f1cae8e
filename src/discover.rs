//! Input discovery for batch commands.
//!
//! Command-line paths may name files or directories. Files are taken as
//! given; directories are walked recursively and filtered with include and
//! exclude globs matched against the path relative to that directory.
//! Office lock files (`~$name.docx`) are always skipped.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_INCLUDE: &str = "**/*.docx";
const LOCK_FILE_PREFIX: &str = "~$";

/// Expand `inputs` into a sorted, de-duplicated list of document paths.
pub fn discover_documents(
    inputs: &[PathBuf],
    include: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>> {
    let include_set = if include.is_empty() {
        build_globset(&[DEFAULT_INCLUDE.to_string()])?
    } else {
        build_globset(include)?
    };
    let exclude_set = build_globset(exclude)?;

    let mut found = Vec::new();
    for input in inputs {
        if input.is_file() {
            if !is_lock_file(input) {
                found.push(input.clone());
            }
            continue;
        }
        if !input.is_dir() {
            bail!("input does not exist: {}", input.display());
        }
        let mut from_dir = Vec::new();
        for entry in WalkDir::new(input) {
            let entry = entry?;
            if !entry.file_type().is_file() || is_lock_file(entry.path()) {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(input).unwrap_or(path);
            if exclude_set.is_match(relative) || !include_set.is_match(relative) {
                continue;
            }
            from_dir.push(path.to_path_buf());
        }
        from_dir.sort();
        found.extend(from_dir);
    }

    let mut seen = std::collections::HashSet::new();
    found.retain(|p| seen.insert(p.clone()));
    Ok(found)
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with(LOCK_FILE_PREFIX))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn walks_directories_with_default_glob() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "a.docx");
        let b = touch(dir.path(), "nested/b.docx");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "~$a.docx");

        let found = discover_documents(&[dir.path().to_path_buf()], &[], &[]).unwrap();
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn exclude_and_explicit_files() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "a.docx");
        touch(dir.path(), "archive/old.docx");
        let txt = touch(dir.path(), "list.txt");

        let found = discover_documents(
            &[dir.path().to_path_buf(), txt.clone(), a.clone()],
            &[],
            &["archive/**".to_string()],
        )
        .unwrap();
        assert_eq!(found, vec![a, txt]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(discover_documents(&[dir.path().join("nope")], &[], &[]).is_err());
    }
}
