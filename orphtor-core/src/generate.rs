//! One generation run: walk, hash, encode.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{GenerateError, Result};
use crate::hasher::{HashMode, PieceHasher};
use crate::metainfo::{Metainfo, MetainfoOptions, Torrent};
use crate::piece::PieceSize;
use crate::progress::{CancelToken, NoProgress, ProgressSink};
use crate::walk::{self, FileEntry, WalkOptions};

/// Builds a torrent for a directory.
///
/// ```no_run
/// use orphtor_core::generate::Generator;
/// use orphtor_core::progress::NoProgress;
///
/// let torrent = Generator::new("Some Album (2001)").piece_size(1 << 18).run(&mut NoProgress)?;
/// std::fs::write("Some Album (2001).torrent", &torrent.bytes)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug)]
pub struct Generator {
    root: PathBuf,
    piece_size: Option<u64>,
    walk: WalkOptions,
    meta: MetainfoOptions,
    mode: HashMode,
    cancel: CancelToken,
}

impl Generator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            piece_size: None,
            walk: WalkOptions::default(),
            meta: MetainfoOptions::default(),
            mode: HashMode::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Fixed piece size in bytes; auto-selected from the content size otherwise.
    pub fn piece_size(mut self, bytes: u64) -> Self {
        self.piece_size = Some(bytes);
        self
    }

    pub fn walk_options(mut self, opts: WalkOptions) -> Self {
        self.walk = opts;
        self
    }

    pub fn metainfo_options(mut self, opts: MetainfoOptions) -> Self {
        self.meta = opts;
        self
    }

    pub fn mode(mut self, mode: HashMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    fn check_root(&self) -> Result<()> {
        let md = match fs::metadata(&self.root) {
            Ok(md) => md,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(GenerateError::InputNotFound { path: self.root.clone() })
            }
            Err(e) => return Err(GenerateError::unreadable(&self.root, 0, e)),
        };
        if !md.is_dir() {
            return Err(GenerateError::InputNotADirectory { path: self.root.clone() });
        }
        Ok(())
    }

    /// Runs the whole pipeline. Any failure aborts the run; an empty content
    /// set (no files, or only empty ones) is [`GenerateError::EmptyContentSet`].
    pub fn run<S>(&self, sink: &mut S) -> Result<Torrent>
    where
        S: ProgressSink + ?Sized,
    {
        self.check_root()?;
        let fixed = self.piece_size.map(PieceSize::new).transpose()?;

        let walked = walk::walk(&self.root, &self.walk)?;
        let total = walked.total_size();
        if total == 0 {
            return Err(GenerateError::EmptyContentSet { path: self.root.clone() });
        }
        let piece_size = fixed.unwrap_or_else(|| PieceSize::auto(total));
        tracing::info!(
            root = %self.root.display(),
            files = walked.files.len(),
            bytes = total,
            piece_size = piece_size.get(),
            "hashing"
        );

        let pieces = PieceHasher::new(piece_size)
            .mode(self.mode)
            .cancel_token(self.cancel.clone())
            .hash(&walked.files, sink)?;

        let name = default_name(&self.root, &walked.files)?;
        let mut torrent =
            Metainfo::new(name, piece_size, pieces, walked.files, self.meta.clone()).encode()?;
        torrent.skipped = walked.skipped;
        tracing::info!(
            info_hash = %torrent.info_hash,
            pieces = torrent.metainfo.pieces.len(),
            "torrent ready"
        );
        Ok(torrent)
    }
}

/// The single file's name for a lone top-level file, otherwise the root's own name.
fn default_name(root: &Path, files: &[FileEntry]) -> Result<String> {
    if let [only] = files {
        if let [name] = only.path.as_slice() {
            return Ok(name.clone());
        }
    }
    let abs = fs::canonicalize(root).map_err(|e| GenerateError::unreadable(root, 0, e))?;
    let name = abs.file_name().ok_or_else(|| {
        GenerateError::EncodingInvariantViolation(format!("{} has no name", abs.display()))
    })?;
    name.to_str()
        .map(str::to_string)
        .ok_or_else(|| GenerateError::NonUtf8Path { path: abs.clone() })
}

/// [`Generator`] with defaults and no progress reporting.
pub fn generate(root: impl Into<PathBuf>) -> Result<Torrent> {
    Generator::new(root).run(&mut NoProgress)
}
