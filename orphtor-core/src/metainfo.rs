//! The metainfo structure and its canonical encoding.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode::{self, BencodeError, Value};
use crate::error::{GenerateError, Result};
use crate::piece::{PieceHash, PieceSize};
use crate::walk::{FileEntry, SkippedEntry};

/// Errors reading back a torrent.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// SHA-1 of the encoded info dictionary.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn of(info_bytes: &[u8]) -> Self {
        Self(Sha1::digest(info_bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Descriptive fields. None of them affect piece layout; `private` and
/// `source` live inside the info dictionary and so change the info hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetainfoOptions {
    /// Overrides the name derived from the root or the single file.
    pub name: Option<String>,
    /// Tracker URLs, one tier each. The first also goes in `announce`.
    pub announce: Vec<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    /// Unix timestamp. Unset by default so library output is reproducible.
    pub creation_date: Option<i64>,
    pub private: bool,
    pub source: Option<String>,
}

impl Default for MetainfoOptions {
    fn default() -> Self {
        Self {
            name: None,
            announce: Vec::new(),
            comment: None,
            created_by: Some(format!("orphtor/{}", env!("CARGO_PKG_VERSION"))),
            creation_date: None,
            private: false,
            source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    pub name: String,
    pub piece_size: PieceSize,
    pub pieces: Vec<PieceHash>,
    pub files: Vec<FileEntry>,
    pub announce: Vec<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<i64>,
    pub private: bool,
    pub source: Option<String>,
}

/// Final artifact of a run: the metainfo, its encoding and its info hash.
#[derive(Debug, Clone)]
pub struct Torrent {
    pub metainfo: Metainfo,
    pub bytes: Vec<u8>,
    pub info_hash: InfoHash,
    /// Entries the walk left out (symlinks, special files). Empty for a
    /// torrent read back from bytes.
    pub skipped: Vec<SkippedEntry>,
}

fn violation(msg: impl Into<String>) -> GenerateError {
    GenerateError::EncodingInvariantViolation(msg.into())
}

fn check_segment(seg: &str, what: &str) -> Result<()> {
    if seg.is_empty() {
        return Err(violation(format!("empty {what}")));
    }
    if seg.contains(['/', '\\']) {
        return Err(violation(format!("{what} {seg:?} contains a path separator")));
    }
    if seg == "." || seg == ".." {
        return Err(violation(format!("{what} {seg:?} is a relative component")));
    }
    Ok(())
}

fn to_int(n: u64, what: &str) -> Result<Value> {
    i64::try_from(n).map(Value::Integer).map_err(|_| violation(format!("{what} {n} out of range")))
}

impl Metainfo {
    pub fn new(
        name: String,
        piece_size: PieceSize,
        pieces: Vec<PieceHash>,
        files: Vec<FileEntry>,
        opts: MetainfoOptions,
    ) -> Self {
        Self {
            name: opts.name.unwrap_or(name),
            piece_size,
            pieces,
            files,
            announce: opts.announce,
            comment: opts.comment,
            created_by: opts.created_by,
            creation_date: opts.creation_date,
            private: opts.private,
            source: opts.source,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Single-file shape: one file, directly under the root.
    pub fn is_single_file(&self) -> bool {
        self.files.len() == 1 && self.files[0].path.len() == 1
    }

    fn check(&self) -> Result<()> {
        check_segment(&self.name, "name")?;
        if self.files.is_empty() {
            return Err(violation("no files"));
        }
        for f in &self.files {
            if f.path.is_empty() {
                return Err(violation("file with empty path"));
            }
            for seg in &f.path {
                check_segment(seg, "path segment")?;
            }
        }
        let want = self.piece_size.piece_count(self.total_size());
        if self.pieces.len() as u64 != want {
            return Err(violation(format!(
                "{} piece hashes for {} bytes at piece size {}, expected {}",
                self.pieces.len(),
                self.total_size(),
                self.piece_size.get(),
                want
            )));
        }
        Ok(())
    }

    fn info_value(&self) -> Result<Value> {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::string(self.name.as_str()));
        info.insert(b"piece length".to_vec(), to_int(self.piece_size.get(), "piece length")?);
        info.insert(b"pieces".to_vec(), Value::Bytes(self.pieces.concat()));
        if self.is_single_file() {
            info.insert(b"length".to_vec(), to_int(self.files[0].size, "length")?);
        } else {
            let mut files = Vec::with_capacity(self.files.len());
            for f in &self.files {
                let mut d = BTreeMap::new();
                d.insert(b"length".to_vec(), to_int(f.size, "length")?);
                d.insert(
                    b"path".to_vec(),
                    Value::List(f.path.iter().map(|s| Value::string(s.as_str())).collect()),
                );
                files.push(Value::Dict(d));
            }
            info.insert(b"files".to_vec(), Value::List(files));
        }
        if self.private {
            info.insert(b"private".to_vec(), Value::Integer(1));
        }
        if let Some(source) = &self.source {
            info.insert(b"source".to_vec(), Value::string(source.as_str()));
        }
        Ok(Value::Dict(info))
    }

    /// Encodes the whole torrent. The info hash is taken over the exact bytes
    /// embedded under `info`.
    pub fn encode(self) -> Result<Torrent> {
        self.check()?;
        let info_bytes = bencode::encode(&self.info_value()?);
        let info_hash = InfoHash::of(&info_bytes);

        let mut root = BTreeMap::new();
        if let Some(first) = self.announce.first() {
            root.insert(b"announce".to_vec(), Value::string(first.as_str()));
        }
        if self.announce.len() > 1 {
            let tiers =
                self.announce.iter().map(|u| Value::List(vec![Value::string(u.as_str())])).collect();
            root.insert(b"announce-list".to_vec(), Value::List(tiers));
        }
        if let Some(comment) = &self.comment {
            root.insert(b"comment".to_vec(), Value::string(comment.as_str()));
        }
        if let Some(by) = &self.created_by {
            root.insert(b"created by".to_vec(), Value::string(by.as_str()));
        }
        if let Some(date) = self.creation_date {
            root.insert(b"creation date".to_vec(), Value::Integer(date));
        }
        root.insert(b"info".to_vec(), Value::Raw(info_bytes));
        let bytes = bencode::encode(&Value::Dict(root));
        Ok(Torrent { metainfo: self, bytes, info_hash, skipped: Vec::new() })
    }

    /// Reads back a v1 torrent. File sources are the relative paths.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Torrent, MetainfoError> {
        let root = bencode::decode(bytes)?;
        let info_raw =
            bencode::dict_entry_raw(bytes, b"info")?.ok_or(MetainfoError::MissingField("info"))?;
        let info = root.get(b"info").ok_or(MetainfoError::MissingField("info"))?;

        let name = info
            .get(b"name")
            .ok_or(MetainfoError::MissingField("name"))?
            .as_str()
            .ok_or(MetainfoError::InvalidField("name"))?
            .to_string();
        let piece_len = info
            .get(b"piece length")
            .ok_or(MetainfoError::MissingField("piece length"))?
            .as_integer()
            .ok_or(MetainfoError::InvalidField("piece length"))?;
        let piece_size = u64::try_from(piece_len)
            .ok()
            .and_then(|n| PieceSize::new(n).ok())
            .ok_or(MetainfoError::InvalidField("piece length"))?;
        let raw_pieces = info
            .get(b"pieces")
            .ok_or(MetainfoError::MissingField("pieces"))?
            .as_bytes()
            .ok_or(MetainfoError::InvalidField("pieces"))?;
        if raw_pieces.len() % 20 != 0 {
            return Err(MetainfoError::InvalidField("pieces"));
        }
        let pieces = raw_pieces
            .chunks_exact(20)
            .map(|c| {
                let mut h = [0u8; 20];
                h.copy_from_slice(c);
                h
            })
            .collect();

        let files = match (info.get(b"length"), info.get(b"files")) {
            (Some(len), None) => {
                let size = non_negative(len, "length")?;
                vec![FileEntry { path: vec![name.clone()], size, source: PathBuf::from(&name) }]
            }
            (None, Some(list)) => {
                let list = list.as_list().ok_or(MetainfoError::InvalidField("files"))?;
                let mut out = Vec::with_capacity(list.len());
                for f in list {
                    let size = non_negative(
                        f.get(b"length").ok_or(MetainfoError::MissingField("length"))?,
                        "length",
                    )?;
                    let path = f
                        .get(b"path")
                        .and_then(Value::as_list)
                        .ok_or(MetainfoError::MissingField("path"))?
                        .iter()
                        .map(|s| s.as_str().map(str::to_string))
                        .collect::<Option<Vec<String>>>()
                        .ok_or(MetainfoError::InvalidField("path"))?;
                    if path.is_empty() {
                        return Err(MetainfoError::InvalidField("path"));
                    }
                    let source = path.iter().collect();
                    out.push(FileEntry { path, size, source });
                }
                out
            }
            _ => return Err(MetainfoError::InvalidField("length/files")),
        };

        let text = |key: &[u8]| root.get(key).and_then(Value::as_str).map(str::to_string);
        let mut announce: Vec<String> = Vec::new();
        if let Some(tiers) = root.get(b"announce-list").and_then(Value::as_list) {
            for url in tiers.iter().filter_map(Value::as_list).flatten().filter_map(Value::as_str) {
                announce.push(url.to_string());
            }
        }
        if announce.is_empty() {
            announce.extend(text(b"announce"));
        }

        let metainfo = Metainfo {
            name,
            piece_size,
            pieces,
            files,
            announce,
            comment: text(b"comment"),
            created_by: text(b"created by"),
            creation_date: root.get(b"creation date").and_then(Value::as_integer),
            private: info.get(b"private").and_then(Value::as_integer) == Some(1),
            source: info.get(b"source").and_then(Value::as_str).map(str::to_string),
        };
        Ok(Torrent {
            metainfo,
            bytes: bytes.to_vec(),
            info_hash: InfoHash::of(info_raw),
            skipped: Vec::new(),
        })
    }
}

fn non_negative(v: &Value, field: &'static str) -> std::result::Result<u64, MetainfoError> {
    v.as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or(MetainfoError::InvalidField(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &[&str], size: u64) -> FileEntry {
        FileEntry {
            path: path.iter().map(|s| s.to_string()).collect(),
            size,
            source: path.iter().collect(),
        }
    }

    fn bare() -> MetainfoOptions {
        MetainfoOptions { created_by: None, ..Default::default() }
    }

    #[test]
    fn single_file_shape() {
        let ps = PieceSize::new(16).unwrap();
        let m = Metainfo::new("a.txt".into(), ps, vec![[7u8; 20]], vec![entry(&["a.txt"], 5)], bare());
        let t = m.encode().unwrap();
        let mut want = b"d4:infod6:lengthi5e4:name5:a.txt12:piece lengthi16e6:pieces20:".to_vec();
        want.extend_from_slice(&[7u8; 20]);
        want.extend_from_slice(b"ee");
        assert_eq!(t.bytes, want);
    }

    #[test]
    fn multi_file_shape_and_hash_over_embedded_info() {
        let ps = PieceSize::new(16).unwrap();
        let files = vec![entry(&["cd1", "01.flac"], 10), entry(&["cover.jpg"], 10)];
        let opts = MetainfoOptions {
            announce: vec!["http://a/ann".into(), "http://b/ann".into()],
            source: Some("OPS".into()),
            private: true,
            ..bare()
        };
        let t = Metainfo::new("rel".into(), ps, vec![[1u8; 20], [2u8; 20]], files, opts)
            .encode()
            .unwrap();
        let raw = bencode::dict_entry_raw(&t.bytes, b"info").unwrap().unwrap();
        assert_eq!(t.info_hash, InfoHash::of(raw));
        let v = bencode::decode(&t.bytes).unwrap();
        assert_eq!(v.get(b"announce").and_then(Value::as_str), Some("http://a/ann"));
        let info = v.get(b"info").unwrap();
        assert_eq!(info.get(b"private").and_then(Value::as_integer), Some(1));
        let f0 = &info.get(b"files").and_then(Value::as_list).unwrap()[0];
        assert_eq!(
            f0.get(b"path").unwrap(),
            &Value::List(vec![Value::string("cd1"), Value::string("01.flac")])
        );
    }

    #[test]
    fn nested_single_file_is_multi_file() {
        let ps = PieceSize::new(16).unwrap();
        let m = Metainfo::new("r".into(), ps, vec![[0u8; 20]], vec![entry(&["d", "x"], 3)], bare());
        assert!(!m.is_single_file());
        let t = m.encode().unwrap();
        assert!(bencode::decode(&t.bytes).unwrap().get(b"info").unwrap().get(b"files").is_some());
    }

    #[test]
    fn rejects_bad_segments_and_counts() {
        let ps = PieceSize::new(16).unwrap();
        for bad in [&["a/b"][..], &["", "x"], &["..", "x"], &["a\\b"]] {
            let m = Metainfo::new("r".into(), ps, vec![[0u8; 20]], vec![entry(bad, 3)], bare());
            assert!(matches!(m.encode(), Err(GenerateError::EncodingInvariantViolation(_))));
        }
        let m = Metainfo::new("r".into(), ps, vec![[0u8; 20]; 2], vec![entry(&["a"], 16)], bare());
        assert!(matches!(m.encode(), Err(GenerateError::EncodingInvariantViolation(_))));
    }

    #[test]
    fn reads_back_what_it_wrote() {
        let ps = PieceSize::new(16).unwrap();
        let files = vec![entry(&["a"], 17), entry(&["b", "c"], 15)];
        let opts = MetainfoOptions {
            comment: Some("hi".into()),
            creation_date: Some(1_700_000_000),
            announce: vec!["http://t/a".into()],
            ..MetainfoOptions::default()
        };
        let t = Metainfo::new("root".into(), ps, vec![[3u8; 20], [4u8; 20]], files, opts)
            .encode()
            .unwrap();
        let back = Metainfo::from_bytes(&t.bytes).unwrap();
        assert_eq!(back.info_hash, t.info_hash);
        assert_eq!(back.metainfo, t.metainfo);
    }

    #[test]
    fn from_bytes_reports_missing_fields() {
        let err = Metainfo::from_bytes(b"d4:infod4:name1:xee").unwrap_err();
        assert!(matches!(err, MetainfoError::MissingField("piece length")));
        assert!(matches!(Metainfo::from_bytes(b"de"), Err(MetainfoError::MissingField("info"))));
    }
}
