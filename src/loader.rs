//! Filesystem loader: turns source files into [`Document`]s.
//!
//! Walks a knowledge-base root recursively, keeps files with a supported
//! extension that pass the include/exclude globs, and loads each one
//! independently. A file that fails to load is logged and skipped; it
//! never aborts the scan. Files that extract to empty text are skipped as
//! empty. Results are sorted by path so chunk numbering is reproducible.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::LoadError;
use crate::extract::{extract_text, ExtractError};
use crate::models::{Document, SourceType};

/// Directory scan filters.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Relative-path globs a file must match. Empty means "all supported files".
    pub include_globs: Vec<String>,
    /// Relative-path globs that exclude a file, on top of the defaults.
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

/// Why a file did not produce a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Outcome of a directory scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

/// Load a single file, choosing the extractor by extension.
pub fn load_document(path: &Path) -> Result<Document, LoadError> {
    let source_type = SourceType::from_path(path).ok_or_else(|| LoadError::Unsupported {
        path: path.to_path_buf(),
    })?;

    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let content = extract_text(&bytes, source_type).map_err(|e| match e {
        ExtractError::Decode { valid_up_to } => LoadError::Decode {
            path: path.to_path_buf(),
            valid_up_to,
        },
        ExtractError::Pdf(reason) => LoadError::Pdf {
            path: path.to_path_buf(),
            reason,
        },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Document {
        content,
        source_path: path.display().to_string(),
        filename,
        source_type,
    })
}

/// Recursively load every supported file under `root`.
///
/// A missing root is not an error: it yields an empty report. Only invalid
/// glob patterns fail the scan.
pub fn scan_directory(root: &Path, options: &ScanOptions) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    if !root.exists() {
        tracing::warn!(root = %root.display(), "knowledge base directory does not exist");
        return Ok(report);
    }

    let include_set = if options.include_globs.is_empty() {
        None
    } else {
        Some(build_globset(&options.include_globs)?)
    };

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(options.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if SourceType::from_path(path).is_none() {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }
        if let Some(include) = &include_set {
            if !include.is_match(relative) {
                continue;
            }
        }

        paths.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    paths.sort();

    for path in paths {
        match load_document(&path) {
            Ok(doc) if doc.content.trim().is_empty() => {
                tracing::warn!(file = %doc.filename, "empty document, skipping");
                report.skipped.push(SkippedFile {
                    path,
                    reason: SkipReason::Empty,
                });
            }
            Ok(doc) => {
                tracing::info!(file = %doc.filename, "loaded document");
                report.documents.push(doc);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load document");
                report.skipped.push(SkippedFile {
                    path,
                    reason: SkipReason::Failed(e.to_string()),
                });
            }
        }
    }

    Ok(report)
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
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_loads_text_with_provenance() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("leadership.txt");
        fs::write(&path, "Transformational leadership inspires change.").unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.content, "Transformational leadership inspires change.");
        assert_eq!(doc.filename, "leadership.txt");
        assert_eq!(doc.source_type, SourceType::Txt);
        assert_eq!(doc.source_path, path.display().to_string());
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.docx");
        fs::write(&path, "x").unwrap();
        assert!(matches!(
            load_document(&path),
            Err(LoadError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.md");
        fs::write(&path, b"\xc3\x28 broken").unwrap();
        assert!(matches!(load_document(&path), Err(LoadError::Decode { .. })));
    }

    #[test]
    fn test_scan_is_sorted_and_skips_failures() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("b/nested")).unwrap();
        fs::write(root.join("b/nested/zeta.md"), "# Zeta\n\nTeams.").unwrap();
        fs::write(root.join("alpha.txt"), "Alpha text.").unwrap();
        fs::write(root.join("broken.txt"), b"\xff\xfe").unwrap();
        fs::write(root.join("empty.md"), "   \n").unwrap();
        fs::write(root.join("ignored.rs"), "fn main() {}").unwrap();

        let report = scan_directory(root, &ScanOptions::default()).unwrap();
        let names: Vec<&str> = report
            .documents
            .iter()
            .map(|d| d.filename.as_str())
            .collect();
        assert_eq!(names, vec!["alpha.txt", "zeta.md"]);

        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.path.ends_with("empty.md") && s.reason == SkipReason::Empty));
        assert!(report
            .skipped
            .iter()
            .any(|s| s.path.ends_with("broken.txt") && matches!(s.reason, SkipReason::Failed(_))));
    }

    #[test]
    fn test_scan_applies_globs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::write(root.join("keep.md"), "keep").unwrap();
        fs::write(root.join("drafts/skip.md"), "skip").unwrap();
        fs::write(root.join("other.txt"), "other").unwrap();

        let options = ScanOptions {
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
        };
        let report = scan_directory(root, &options).unwrap();
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].filename, "keep.md");
    }

    #[test]
    fn test_missing_root_yields_empty_report() {
        let tmp = TempDir::new().unwrap();
        let report = scan_directory(&tmp.path().join("nope"), &ScanOptions::default()).unwrap();
        assert!(report.documents.is_empty());
        assert!(report.skipped.is_empty());
    }
}
