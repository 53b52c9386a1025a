//! The 2880-byte physical block and its header/data classifier.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::header::{is_valid_name_bytes, parse_header_block, Card};

/// FITS block size in bytes (each logical record is one block).
pub const BLOCK_SIZE: usize = 2880;

/// FITS card (keyword record) size in bytes.
pub const CARD_SIZE: usize = 80;

/// Number of cards that fit in a single block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Padding byte used for header blocks (ASCII space).
pub const HEADER_PAD_BYTE: u8 = 0x20;

/// Padding byte used for data blocks (zero).
pub const DATA_PAD_BYTE: u8 = 0x00;

/// Returns the number of FITS blocks required to hold `num_bytes` bytes.
///
/// 0 bytes requires 0 blocks, 1 byte requires 1 block, 2880 bytes requires
/// 1 block, 2881 bytes requires 2 blocks, etc.
pub const fn blocks_needed(num_bytes: usize) -> usize {
    if num_bytes == 0 {
        return 0;
    }
    num_bytes.div_ceil(BLOCK_SIZE)
}

/// Returns the total byte length (in whole blocks) required to hold `num_bytes`.
pub const fn padded_byte_len(num_bytes: usize) -> usize {
    blocks_needed(num_bytes) * BLOCK_SIZE
}

/// Number of card slots a header of `num_cards` records occupies on disk.
pub const fn padded_card_count(num_cards: usize) -> usize {
    num_cards.div_ceil(CARDS_PER_BLOCK) * CARDS_PER_BLOCK
}

/// Classification of a physical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Allocated but never filled.
    Empty,
    /// All 36 card slots carry syntactically valid keyword names.
    Header,
    /// First slot is not a keyword name; assumed to be payload bytes.
    Data,
    /// First slot looks like a keyword but a later one does not.
    Corrupted,
}

/// Classify one filled block.
///
/// The first 80-byte window decides: if its name field is not a valid keyword
/// the block is data and nothing else is checked. Otherwise every window must
/// carry a valid name for the block to count as a header. A data block whose
/// first eight bytes happen to spell a valid name therefore comes out as
/// `Corrupted` (or even `Header`); the format offers no other discriminator.
pub fn classify(raw: &[u8; BLOCK_SIZE]) -> BlockState {
    let mut windows = raw.chunks_exact(CARD_SIZE);
    let first_valid = windows
        .next()
        .map(|w| is_valid_name_bytes(&w[..8]))
        .unwrap_or(false);
    if !first_valid {
        return BlockState::Data;
    }

    let valid = 1 + windows.filter(|w| is_valid_name_bytes(&w[..8])).count();
    if valid == CARDS_PER_BLOCK {
        BlockState::Header
    } else {
        BlockState::Corrupted
    }
}

/// One 2880-byte physical block ("blob").
///
/// A blob is filled exactly once through [`Blob::try_initialize`]; filling it
/// again requires a [`Blob::reset`] first.
#[derive(Debug, Clone)]
pub struct Blob {
    bytes: Box<[u8; BLOCK_SIZE]>,
    state: BlockState,
}

impl Default for Blob {
    fn default() -> Self {
        Self::new()
    }
}

impl Blob {
    /// Allocate an empty, unfilled block.
    pub fn new() -> Self {
        Blob {
            bytes: Box::new([0u8; BLOCK_SIZE]),
            state: BlockState::Empty,
        }
    }

    /// Fill the block from exactly [`BLOCK_SIZE`] bytes and classify it.
    ///
    /// Fails with [`Error::BufferContractViolation`] if the block is already
    /// filled or `src` has the wrong length.
    pub fn try_initialize(&mut self, src: &[u8]) -> Result<BlockState> {
        if self.state != BlockState::Empty {
            return Err(Error::BufferContractViolation(
                "physical block initialized twice without reset",
            ));
        }
        if src.len() != BLOCK_SIZE {
            return Err(Error::BufferContractViolation(
                "physical block source is not exactly 2880 bytes",
            ));
        }
        self.bytes.copy_from_slice(src);
        self.state = classify(&self.bytes);
        tracing::trace!(state = ?self.state, "physical block classified");
        Ok(self.state)
    }

    /// Return the block to the `Empty` state so it can be filled again.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
        self.state = BlockState::Empty;
    }

    /// Current classification.
    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Raw block contents.
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.bytes
    }

    /// Decode the 36 records of a header block.
    pub fn cards(&self) -> Result<Vec<Card>> {
        if self.state != BlockState::Header {
            return Err(Error::BufferContractViolation(
                "cards requested from a block that is not a header",
            ));
        }
        parse_header_block(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_like() -> [u8; BLOCK_SIZE] {
        let mut raw = [b' '; BLOCK_SIZE];
        raw[..6].copy_from_slice(b"SIMPLE");
        raw[8..10].copy_from_slice(b"= ");
        raw[29] = b'T';
        raw
    }

    // ---- sizes ----

    #[test]
    fn blocks_needed_partial() {
        assert_eq!(blocks_needed(0), 0);
        assert_eq!(blocks_needed(1), 1);
        assert_eq!(blocks_needed(2879), 1);
        assert_eq!(blocks_needed(2880), 1);
        assert_eq!(blocks_needed(2881), 2);
        assert_eq!(blocks_needed(5761), 3);
    }

    #[test]
    fn padded_byte_len_unaligned() {
        assert_eq!(padded_byte_len(0), 0);
        assert_eq!(padded_byte_len(1), BLOCK_SIZE);
        assert_eq!(padded_byte_len(BLOCK_SIZE + 1), 2 * BLOCK_SIZE);
    }

    #[test]
    fn padded_card_count_rounds_to_block() {
        assert_eq!(padded_card_count(0), 0);
        assert_eq!(padded_card_count(1), 36);
        assert_eq!(padded_card_count(36), 36);
        assert_eq!(padded_card_count(37), 72);
    }

    #[test]
    fn constant_relationships() {
        assert_eq!(CARDS_PER_BLOCK, 36);
        assert_eq!(CARDS_PER_BLOCK * CARD_SIZE, BLOCK_SIZE);
    }

    // ---- classify ----

    #[test]
    fn blank_padded_header_is_header() {
        assert_eq!(classify(&header_like()), BlockState::Header);
    }

    #[test]
    fn zero_block_is_data() {
        assert_eq!(classify(&[0u8; BLOCK_SIZE]), BlockState::Data);
    }

    #[test]
    fn lowercase_first_name_is_data() {
        let mut raw = header_like();
        raw[0] = b's';
        assert_eq!(classify(&raw), BlockState::Data);
    }

    #[test]
    fn bad_tenth_window_is_corrupted() {
        let mut raw = header_like();
        raw[9 * CARD_SIZE] = 0x00;
        assert_eq!(classify(&raw), BlockState::Corrupted);
    }

    #[test]
    fn data_that_spells_a_name_is_misclassified() {
        let mut raw = [0u8; BLOCK_SIZE];
        raw[..8].copy_from_slice(b"ABCDEFGH");
        assert_eq!(classify(&raw), BlockState::Corrupted);
    }

    // ---- Blob ----

    #[test]
    fn new_blob_is_empty() {
        let blob = Blob::new();
        assert_eq!(blob.state(), BlockState::Empty);
    }

    #[test]
    fn initialize_classifies() {
        let mut blob = Blob::new();
        let state = blob.try_initialize(&header_like()).unwrap();
        assert_eq!(state, BlockState::Header);
        assert_eq!(blob.as_bytes()[..6], *b"SIMPLE");
    }

    #[test]
    fn double_initialize_is_contract_violation() {
        let mut blob = Blob::new();
        blob.try_initialize(&[0u8; BLOCK_SIZE]).unwrap();
        let err = blob.try_initialize(&[0u8; BLOCK_SIZE]).unwrap_err();
        assert!(matches!(err, Error::BufferContractViolation(_)));
    }

    #[test]
    fn reset_allows_reuse() {
        let mut blob = Blob::new();
        blob.try_initialize(&[0u8; BLOCK_SIZE]).unwrap();
        blob.reset();
        assert_eq!(blob.state(), BlockState::Empty);
        assert_eq!(
            blob.try_initialize(&header_like()).unwrap(),
            BlockState::Header
        );
    }

    #[test]
    fn wrong_length_source_rejected() {
        let mut blob = Blob::new();
        let err = blob.try_initialize(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, Error::BufferContractViolation(_)));
        assert_eq!(blob.state(), BlockState::Empty);
    }

    #[test]
    fn header_blob_decodes_cards() {
        let mut blob = Blob::new();
        blob.try_initialize(&header_like()).unwrap();
        let cards = blob.cards().unwrap();
        assert_eq!(cards.len(), CARDS_PER_BLOCK);
        assert_eq!(cards[0].name(), "SIMPLE");
    }

    #[test]
    fn data_blob_refuses_cards() {
        let mut blob = Blob::new();
        blob.try_initialize(&[0u8; BLOCK_SIZE]).unwrap();
        assert!(blob.cards().is_err());
    }
}
