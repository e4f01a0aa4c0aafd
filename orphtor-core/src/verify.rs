use crate::hasher::{Layout, PieceHasher};
use crate::metainfo::{InfoHash, Metainfo};
use crate::path_safety::{resolve, PathPolicy};
use crate::walk::FileEntry;
use anyhow::{Context, Result};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub info_hash: InfoHash,
    pub pieces_ok: u64,
    pub pieces_bad: u64,
    /// Indices of pieces whose data did not hash to the recorded value.
    pub bad_pieces: Vec<usize>,
    /// Files absent from disk or with a different size, as `a/b/c`.
    pub missing_files: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.pieces_bad == 0 && self.missing_files.is_empty()
    }
}

pub fn verify(torrent_path: &Path, root: &Path) -> Result<VerifyReport> {
    verify_with_policy(torrent_path, root, PathPolicy::default())
}

pub fn verify_with_policy(
    torrent_path: &Path,
    root: &Path,
    policy: PathPolicy,
) -> Result<VerifyReport> {
    let bytes =
        std::fs::read(torrent_path).with_context(|| format!("read {}", torrent_path.display()))?;
    verify_bytes(&bytes, root, policy)
        .with_context(|| format!("verify {} against {}", torrent_path.display(), root.display()))
}

/// Re-hashes the content under `root` and compares it piece by piece.
/// Missing or resized files make the pieces they touch bad; they do not
/// abort the check.
pub fn verify_bytes(bytes: &[u8], root: &Path, policy: PathPolicy) -> Result<VerifyReport> {
    let torrent = Metainfo::from_bytes(bytes).context("decode torrent")?;
    let mi = &torrent.metainfo;

    let mut files: Vec<FileEntry> = Vec::with_capacity(mi.files.len());
    let mut broken = vec![false; mi.files.len()];
    let mut missing_files = Vec::new();
    for (i, fe) in mi.files.iter().enumerate() {
        let source = resolve(root, &fe.path, policy)?;
        let intact = std::fs::metadata(&source).map(|m| m.is_file() && m.len() == fe.size);
        if !matches!(intact, Ok(true)) {
            broken[i] = true;
            missing_files.push(fe.display_path());
        }
        files.push(FileEntry { path: fe.path.clone(), size: fe.size, source });
    }

    let layout = Layout::new(&files);
    let hasher = PieceHasher::new(mi.piece_size);
    let mut report = VerifyReport {
        info_hash: torrent.info_hash,
        pieces_ok: 0,
        pieces_bad: 0,
        bad_pieces: Vec::new(),
        missing_files,
    };
    for (i, want) in mi.pieces.iter().enumerate() {
        let start = i as u64 * mi.piece_size.get();
        let len = mi.piece_size.piece_len(i as u64, layout.total);
        let touches_broken = len == 0
            || (layout.file_at(start)..=layout.file_at(start + len - 1)).any(|fi| broken[fi]);
        let ok = !touches_broken
            && match hasher.hash_piece(&layout, &files, i) {
                Ok(got) => &got == want,
                Err(e) => {
                    tracing::warn!(piece = i, error = %e, "piece unreadable");
                    false
                }
            };
        if ok {
            report.pieces_ok += 1;
        } else {
            report.pieces_bad += 1;
            report.bad_pieces.push(i);
        }
    }
    tracing::debug!(ok = report.pieces_ok, bad = report.pieces_bad, "verified {}", root.display());
    Ok(report)
}
