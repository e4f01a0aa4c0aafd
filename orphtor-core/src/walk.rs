//! Enumerates the content a torrent describes.
//!
//! The walk is deterministic: files come back in lexicographic order of their
//! path segments, which fixes piece boundaries and therefore the info hash.
//! Hidden entries (any component starting with `.`) are never visited and
//! symbolic links are never followed; links are reported in [`Walk::skipped`].

use std::io;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{GenerateError, Result};

/// Extensions of the audio formats a release folder is expected to hold.
pub const MEDIA_EXTENSIONS: &[&str] = &["flac", "mp3", "m4a"];

/// One file of the content set, addressed relative to the walked root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path segments below the root. Never empty, no segment contains a separator.
    pub path: Vec<String>,
    pub size: u64,
    /// Where the bytes are read from. For entries decoded out of a torrent
    /// this is the relative path joined from `path`.
    pub source: PathBuf,
}

impl FileEntry {
    /// `a/b/c` form, for display and progress events.
    pub fn display_path(&self) -> String {
        self.path.join("/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Symlink,
    NotRegularFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Clone, Debug, Default)]
pub struct WalkOptions {
    /// Case-insensitive extension allow-list, without the dot. `None` keeps every file.
    pub extensions: Option<Vec<String>>,
}

impl WalkOptions {
    pub fn media_only() -> Self {
        Self { extensions: Some(MEDIA_EXTENSIONS.iter().map(|e| e.to_string()).collect()) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Walk {
    pub files: Vec<FileEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl Walk {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

fn build_filter(extensions: &[String]) -> Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for ext in extensions {
        let pattern = format!("*.{}", ext.trim_start_matches('.'));
        let glob = GlobBuilder::new(&pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|e| GenerateError::InvalidFilter { pattern: pattern.clone(), source: e })?;
        b.add(glob);
    }
    b.build().map_err(|e| GenerateError::InvalidFilter { pattern: extensions.join(","), source: e })
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

fn walk_error(root: &Path, err: walkdir::Error) -> GenerateError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let msg = err.to_string();
    let source = err.into_io_error().unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, msg));
    GenerateError::unreadable(path, 0, source)
}

fn segments(rel: &Path, full: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => match s.to_str() {
                Some(s) => out.push(s.to_string()),
                None => return Err(GenerateError::NonUtf8Path { path: full.to_path_buf() }),
            },
            _ => {
                return Err(GenerateError::EncodingInvariantViolation(format!(
                    "unexpected component in walked path {}",
                    full.display()
                )))
            }
        }
    }
    Ok(out)
}

/// Lists every regular file under `root` in deterministic order.
pub fn walk(root: &Path, opts: &WalkOptions) -> Result<Walk> {
    let filter = match &opts.extensions {
        Some(exts) => Some(build_filter(exts)?),
        None => None,
    };
    let mut out = Walk::default();
    let iter = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()));
    for ent in iter {
        let ent = ent.map_err(|e| walk_error(root, e))?;
        let ft = ent.file_type();
        if ft.is_dir() {
            continue;
        }
        if ft.is_symlink() {
            tracing::warn!(path = %ent.path().display(), "skipping symlink");
            out.skipped
                .push(SkippedEntry { path: ent.path().to_path_buf(), reason: SkipReason::Symlink });
            continue;
        }
        if !ft.is_file() {
            tracing::warn!(path = %ent.path().display(), "skipping non-regular file");
            out.skipped
                .push(SkippedEntry { path: ent.path().to_path_buf(), reason: SkipReason::NotRegularFile });
            continue;
        }
        if let Some(set) = &filter {
            if !set.is_match(ent.file_name()) {
                continue;
            }
        }
        let rel = pathdiff::diff_paths(ent.path(), root).unwrap_or_else(|| ent.path().into());
        let path = segments(&rel, ent.path())?;
        let size = ent.metadata().map_err(|e| walk_error(root, e))?.len();
        out.files.push(FileEntry { path, size, source: ent.path().to_path_buf() });
    }
    // walkdir sorts by OsStr per directory; re-sort on the segments so the
    // order is defined purely by the names that end up in the torrent.
    out.files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(
        files = out.files.len(),
        skipped = out.skipped.len(),
        bytes = out.total_size(),
        "walked {}",
        root.display()
    );
    Ok(out)
}
