use crate::error::{GenerateError, Result};

/// SHA-1 digest of one piece.
pub type PieceHash = [u8; 20];

pub const MIN_AUTO_PIECE_SIZE: u64 = 16 << 10;
pub const MAX_AUTO_PIECE_SIZE: u64 = 16 << 20;
pub const MAX_PIECE_SIZE: u64 = 64 << 20;

/// Auto-selection aims for about this many pieces per torrent.
pub const TARGET_PIECE_COUNT: u64 = 1500;

/// Power-of-two piece length, fixed for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceSize(u64);

impl PieceSize {
    pub fn new(bytes: u64) -> Result<Self> {
        if !bytes.is_power_of_two() || bytes > MAX_PIECE_SIZE {
            return Err(GenerateError::InvalidPieceSize { size: bytes });
        }
        Ok(Self(bytes))
    }

    /// Smallest power of two giving at most [`TARGET_PIECE_COUNT`] pieces,
    /// clamped to 16 KiB ..= 16 MiB.
    pub fn auto(total_size: u64) -> Self {
        let want = total_size.div_ceil(TARGET_PIECE_COUNT).max(1).next_power_of_two();
        Self(want.clamp(MIN_AUTO_PIECE_SIZE, MAX_AUTO_PIECE_SIZE))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn piece_count(self, total_size: u64) -> u64 {
        total_size.div_ceil(self.0)
    }

    /// Length of piece `index` in a stream of `total_size` bytes.
    pub fn piece_len(self, index: u64, total_size: u64) -> u64 {
        let start = index * self.0;
        total_size.saturating_sub(start).min(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(PieceSize::new(0).is_err());
        assert!(PieceSize::new(3).is_err());
        assert!(PieceSize::new(MAX_PIECE_SIZE * 2).is_err());
        assert_eq!(PieceSize::new(16).unwrap().get(), 16);
    }

    #[test]
    fn auto_steps() {
        assert_eq!(PieceSize::auto(0).get(), MIN_AUTO_PIECE_SIZE);
        assert_eq!(PieceSize::auto(10 << 20).get(), MIN_AUTO_PIECE_SIZE);
        assert_eq!(PieceSize::auto(1 << 30).get(), 1 << 20);
        assert_eq!(PieceSize::auto(350 << 20).get(), 256 << 10);
        assert_eq!(PieceSize::auto(100 << 30).get(), MAX_AUTO_PIECE_SIZE);
    }

    #[test]
    fn counts_and_tail() {
        let ps = PieceSize::new(16).unwrap();
        assert_eq!(ps.piece_count(0), 0);
        assert_eq!(ps.piece_count(32), 2);
        assert_eq!(ps.piece_count(33), 3);
        assert_eq!(ps.piece_len(2, 33), 1);
        assert_eq!(ps.piece_len(0, 33), 16);
    }
}
