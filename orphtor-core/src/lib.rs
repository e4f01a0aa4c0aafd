pub mod bencode;
pub mod error;
pub mod generate;
pub mod hasher;
pub mod metainfo;
pub mod path_safety;
pub mod piece;
pub mod progress;
pub mod summary;
pub mod verify;
pub mod walk;

pub use error::{GenerateError, Result};
pub use generate::{generate, Generator};
pub use metainfo::{InfoHash, Metainfo, MetainfoOptions, Torrent};
