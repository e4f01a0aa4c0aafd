//! Piece hashing over the virtual concatenation of all files.
//!
//! Pieces straddle file boundaries freely: piece `i` always covers bytes
//! `i * piece_size ..` of the stream formed by laying the files end to end in
//! walk order. Only the last piece may be short.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use rayon::prelude::*;
use sha1::{Digest, Sha1};

use crate::error::{GenerateError, Result};
use crate::piece::{PieceHash, PieceSize};
use crate::progress::{CancelToken, Flow, ProgressEvent, ProgressSink};
use crate::walk::FileEntry;

/// Read buffer size. Unrelated to the piece size.
pub const READ_CHUNK: usize = 64 << 10;

/// Pieces handed to the pool per worker before progress is merged.
const PIECES_PER_WORKER: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashMode {
    #[default]
    Sequential,
    /// Hash pieces on a dedicated pool. `threads == 0` lets rayon decide.
    Parallel { threads: usize },
}

pub struct PieceHasher {
    piece_size: PieceSize,
    mode: HashMode,
    cancel: CancelToken,
}

/// Stream offset at which each file starts.
pub(crate) struct Layout {
    pub(crate) starts: Vec<u64>,
    pub(crate) total: u64,
}

impl Layout {
    pub(crate) fn new(files: &[FileEntry]) -> Self {
        let mut starts = Vec::with_capacity(files.len());
        let mut total = 0u64;
        for f in files {
            starts.push(total);
            total += f.size;
        }
        Self { starts, total }
    }

    /// Index of the file holding stream byte `pos`. Zero-length files are
    /// never returned for an in-range position.
    pub(crate) fn file_at(&self, pos: u64) -> usize {
        self.starts.partition_point(|&s| s <= pos).saturating_sub(1)
    }
}

impl PieceHasher {
    pub fn new(piece_size: PieceSize) -> Self {
        Self { piece_size, mode: HashMode::Sequential, cancel: CancelToken::new() }
    }

    pub fn mode(mut self, mode: HashMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Hashes `files` in order. Returns one digest per piece; an empty content
    /// set yields no pieces.
    pub fn hash<S>(&self, files: &[FileEntry], sink: &mut S) -> Result<Vec<PieceHash>>
    where
        S: ProgressSink + ?Sized,
    {
        match self.mode {
            HashMode::Sequential => self.hash_sequential(files, sink),
            HashMode::Parallel { threads } => self.hash_parallel(files, threads, sink),
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        Ok(())
    }

    fn hash_sequential<S>(&self, files: &[FileEntry], sink: &mut S) -> Result<Vec<PieceHash>>
    where
        S: ProgressSink + ?Sized,
    {
        let piece = self.piece_size.get();
        let total: u64 = files.iter().map(|f| f.size).sum();
        let mut pieces = Vec::with_capacity(self.piece_size.piece_count(total) as usize);
        let mut acc = Sha1::new();
        let mut in_piece = 0u64;
        let mut done = 0u64;
        let mut buf = vec![0u8; READ_CHUNK];

        for fe in files {
            self.check_cancel()?;
            let mut f =
                File::open(&fe.source).map_err(|e| GenerateError::unreadable(&fe.source, 0, e))?;
            let name = fe.display_path();
            let mut file_off = 0u64;
            loop {
                let n = match f.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(GenerateError::unreadable(&fe.source, file_off, e)),
                };
                if n == 0 {
                    break;
                }
                if file_off + n as u64 > fe.size {
                    return Err(GenerateError::unreadable(
                        &fe.source,
                        fe.size,
                        io::Error::new(io::ErrorKind::InvalidData, "file grew while hashing"),
                    ));
                }
                let mut chunk = &buf[..n];
                while !chunk.is_empty() {
                    let take = ((piece - in_piece) as usize).min(chunk.len());
                    acc.update(&chunk[..take]);
                    in_piece += take as u64;
                    chunk = &chunk[take..];
                    if in_piece == piece {
                        pieces.push(acc.finalize_reset().into());
                        in_piece = 0;
                    }
                }
                file_off += n as u64;
                done += n as u64;
                let ev = ProgressEvent { file: &name, bytes_done: done, bytes_total: total };
                if sink.progress(&ev) == Flow::Stop {
                    return Err(GenerateError::Cancelled);
                }
                self.check_cancel()?;
            }
            if file_off < fe.size {
                return Err(GenerateError::unreadable(
                    &fe.source,
                    file_off,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while hashing"),
                ));
            }
        }
        if in_piece > 0 {
            pieces.push(acc.finalize().into());
        }
        Ok(pieces)
    }

    fn hash_parallel<S>(
        &self,
        files: &[FileEntry],
        threads: usize,
        sink: &mut S,
    ) -> Result<Vec<PieceHash>>
    where
        S: ProgressSink + ?Sized,
    {
        // Empty files are never read below; opening them keeps an unreadable
        // one from slipping through.
        for fe in files.iter().filter(|f| f.size == 0) {
            File::open(&fe.source).map_err(|e| GenerateError::unreadable(&fe.source, 0, e))?;
        }

        let layout = Layout::new(files);
        let count = self.piece_size.piece_count(layout.total) as usize;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(GenerateError::Workers)?;
        let window = pool.current_num_threads().max(1) * PIECES_PER_WORKER;
        tracing::debug!(threads = pool.current_num_threads(), pieces = count, "parallel hashing");

        let mut pieces: Vec<PieceHash> = vec![[0u8; 20]; count];
        let mut done = 0u64;
        let mut first = 0usize;
        while first < count {
            self.check_cancel()?;
            let last = (first + window).min(count);
            let hashed: Vec<Result<PieceHash>> = pool.install(|| {
                (first..last).into_par_iter().map(|i| self.hash_piece(&layout, files, i)).collect()
            });
            // Merge in index order so progress stays monotonic.
            for (i, h) in (first..last).zip(hashed) {
                pieces[i] = h?;
                done += self.piece_size.piece_len(i as u64, layout.total);
                let name = files[layout.file_at(done - 1)].display_path();
                let ev = ProgressEvent { file: &name, bytes_done: done, bytes_total: layout.total };
                // The window is fully merged here, so no worker is left running.
                if sink.progress(&ev) == Flow::Stop {
                    return Err(GenerateError::Cancelled);
                }
            }
            first = last;
        }
        Ok(pieces)
    }

    pub(crate) fn hash_piece(
        &self,
        layout: &Layout,
        files: &[FileEntry],
        index: usize,
    ) -> Result<PieceHash> {
        self.check_cancel()?;
        let mut pos = index as u64 * self.piece_size.get();
        let mut remaining = self.piece_size.piece_len(index as u64, layout.total);
        let mut fi = layout.file_at(pos);
        let mut acc = Sha1::new();
        let mut buf = vec![0u8; READ_CHUNK.min(remaining as usize)];

        while remaining > 0 {
            let fe = &files[fi];
            let off = pos - layout.starts[fi];
            let take = (fe.size - off).min(remaining);
            fi += 1;
            if take == 0 {
                continue;
            }
            let mut f =
                File::open(&fe.source).map_err(|e| GenerateError::unreadable(&fe.source, 0, e))?;
            f.seek(SeekFrom::Start(off)).map_err(|e| GenerateError::unreadable(&fe.source, off, e))?;
            let mut left = take;
            while left > 0 {
                self.check_cancel()?;
                let n = (left as usize).min(buf.len());
                f.read_exact(&mut buf[..n])
                    .map_err(|e| GenerateError::unreadable(&fe.source, off + (take - left), e))?;
                acc.update(&buf[..n]);
                left -= n as u64;
            }
            pos += take;
            remaining -= take;
        }
        Ok(acc.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::fs;
    use std::path::Path;

    fn entries(root: &Path, files: &[(&str, Vec<u8>)]) -> Vec<FileEntry> {
        files
            .iter()
            .map(|(name, data)| {
                let p = root.join(name);
                fs::write(&p, data).unwrap();
                FileEntry { path: vec![name.to_string()], size: data.len() as u64, source: p }
            })
            .collect()
    }

    fn sha1(data: &[u8]) -> PieceHash {
        Sha1::digest(data).into()
    }

    #[test]
    fn pieces_straddle_files() {
        let td = tempfile::tempdir().unwrap();
        let files = entries(td.path(), &[("a.txt", vec![b'A'; 17]), ("b.txt", vec![b'B'; 15])]);
        let hasher = PieceHasher::new(PieceSize::new(16).unwrap());
        let pieces = hasher.hash(&files, &mut NoProgress).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], sha1(&[b'A'; 16]));
        let mut second = vec![b'A'];
        second.extend_from_slice(&[b'B'; 15]);
        assert_eq!(pieces[1], sha1(&second));
    }

    #[test]
    fn short_tail_and_empty_files() {
        let td = tempfile::tempdir().unwrap();
        let files = entries(
            td.path(),
            &[("a", vec![1u8; 10]), ("b", vec![]), ("c", vec![2u8; 10]), ("d", vec![])],
        );
        let hasher = PieceHasher::new(PieceSize::new(8).unwrap());
        let pieces = hasher.hash(&files, &mut NoProgress).unwrap();
        assert_eq!(pieces.len(), 3);
        let mut all = vec![1u8; 10];
        all.extend_from_slice(&[2u8; 10]);
        assert_eq!(pieces[2], sha1(&all[16..]));
    }

    #[test]
    fn empty_content_yields_no_pieces() {
        let td = tempfile::tempdir().unwrap();
        let files = entries(td.path(), &[("empty", vec![])]);
        let hasher = PieceHasher::new(PieceSize::new(16).unwrap());
        assert!(hasher.hash(&files, &mut NoProgress).unwrap().is_empty());
        assert!(hasher.hash(&[], &mut NoProgress).unwrap().is_empty());
    }

    #[test]
    fn parallel_matches_sequential() {
        let td = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let files = entries(
            td.path(),
            &[("x", data[..70_001].to_vec()), ("y", vec![]), ("z", data[70_001..].to_vec())],
        );
        let ps = PieceSize::new(16 << 10).unwrap();
        let seq = PieceHasher::new(ps).hash(&files, &mut NoProgress).unwrap();
        let mut events = Vec::new();
        let mut sink = |ev: &ProgressEvent<'_>| {
            events.push(ev.bytes_done);
            Flow::Continue
        };
        let par = PieceHasher::new(ps)
            .mode(HashMode::Parallel { threads: 3 })
            .hash(&files, &mut sink)
            .unwrap();
        assert_eq!(seq, par);
        assert!(events.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(events.last().copied(), Some(200_000));
    }

    #[test]
    fn stop_from_sink_cancels() {
        let td = tempfile::tempdir().unwrap();
        let files = entries(td.path(), &[("a", vec![0u8; 3 * READ_CHUNK])]);
        let mut calls = 0;
        let mut sink = |_: &ProgressEvent<'_>| {
            calls += 1;
            Flow::Stop
        };
        let err = PieceHasher::new(PieceSize::new(1 << 14).unwrap())
            .hash(&files, &mut sink)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls, 1);
    }

    #[test]
    fn parallel_stop_leaves_caller_token_alone() {
        let td = tempfile::tempdir().unwrap();
        let files = entries(td.path(), &[("a", vec![3u8; 100_000])]);
        let token = CancelToken::new();
        let hasher = PieceHasher::new(PieceSize::new(1 << 14).unwrap())
            .mode(HashMode::Parallel { threads: 2 })
            .cancel_token(token.clone());
        let err = hasher.hash(&files, &mut |_: &ProgressEvent<'_>| Flow::Stop).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!token.is_cancelled());
        assert_eq!(hasher.hash(&files, &mut NoProgress).unwrap().len(), 7);
    }

    #[test]
    fn vanished_file_fails_at_offset_zero() {
        let td = tempfile::tempdir().unwrap();
        let files = entries(td.path(), &[("a", vec![1u8; 40]), ("b", vec![2u8; 40])]);
        fs::remove_file(&files[1].source).unwrap();
        for mode in [HashMode::Sequential, HashMode::Parallel { threads: 2 }] {
            let err = PieceHasher::new(PieceSize::new(16).unwrap())
                .mode(mode)
                .hash(&files, &mut NoProgress)
                .unwrap_err();
            match err {
                GenerateError::UnreadableFile { path, offset, .. } => {
                    assert_eq!(path, files[1].source);
                    assert_eq!(offset, 0);
                }
                other => panic!("{mode:?}: unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn shrunk_file_reports_offset() {
        let td = tempfile::tempdir().unwrap();
        let mut files = entries(td.path(), &[("a", vec![9u8; 100])]);
        files[0].size = 150;
        let err = PieceHasher::new(PieceSize::new(64).unwrap())
            .hash(&files, &mut NoProgress)
            .unwrap_err();
        match err {
            GenerateError::UnreadableFile { offset, .. } => assert_eq!(offset, 100),
            other => panic!("unexpected error: {other}"),
        }
    }
}
