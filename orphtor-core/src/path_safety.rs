use anyhow::{bail, Result};
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Maps a torrent's path segments onto `root`.
///
/// Each segment must be a single plain name: no separators, no `.` or `..`,
/// nothing that makes the path absolute. Without `follow_symlinks` any
/// symlink along the way is refused; with it, the resolved path must still
/// lie under `root`. A path that does not exist yet resolves fine so the
/// caller can report it as missing.
pub fn resolve(root: &Path, segments: &[String], policy: PathPolicy) -> Result<PathBuf> {
    if segments.is_empty() {
        bail!("empty path in torrent");
    }
    let mut rel = PathBuf::new();
    for seg in segments {
        let mut comps = Path::new(seg).components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(_)), None) if !seg.contains(['/', '\\']) => rel.push(seg),
            _ => bail!("unsafe path segment {:?} in {:?}", seg, segments.join("/")),
        }
    }

    let candidate = root.join(&rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur.push(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    bail!("symlink in path (not following): {:?}", cur);
                }
            }
        }
        return Ok(candidate);
    }

    let root_can = std::fs::canonicalize(root)?;
    match std::fs::canonicalize(&candidate) {
        Ok(cand_can) => {
            if !cand_can.starts_with(&root_can) {
                bail!("path escapes root: {:?}", rel);
            }
            Ok(cand_can)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(candidate),
        Err(e) => Err(e.into()),
    }
}
