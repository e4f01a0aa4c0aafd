use serde::Serialize;

use crate::metainfo::Torrent;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileSummary {
    pub path: String,
    pub size: u64,
}

/// Printable description of a torrent.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub name: String,
    pub info_hash: String,
    pub piece_size: u64,
    pub pieces: usize,
    pub total_size: u64,
    pub files: Vec<FileSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub announce: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
    pub private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl From<&Torrent> for Summary {
    fn from(t: &Torrent) -> Self {
        let m = &t.metainfo;
        Self {
            name: m.name.clone(),
            info_hash: t.info_hash.to_hex(),
            piece_size: m.piece_size.get(),
            pieces: m.pieces.len(),
            total_size: m.total_size(),
            files: m
                .files
                .iter()
                .map(|f| FileSummary { path: f.display_path(), size: f.size })
                .collect(),
            announce: m.announce.clone(),
            comment: m.comment.clone(),
            created_by: m.created_by.clone(),
            creation_date: m.creation_date,
            private: m.private,
            source: m.source.clone(),
        }
    }
}
