//! Header-data units: cards, resolved shape and the payload bytes.

use alloc::vec::Vec;

use bytemuck::{pod_collect_to_vec, Pod};

use crate::block::padded_card_count;
use crate::descriptor::{resolve, Descriptor, ElementType};
use crate::endian::{buf_be_to_native, buf_native_to_be};
use crate::error::{Error, Result};
use crate::header::{find_card, merge_continued, record_count, serialize_header, Card};

/// Rust types that can be stored in a data unit.
pub trait Element: Pod {
    /// Element type whose `BITPIX` matches this Rust type.
    const ELEMENT_TYPE: ElementType;
}

impl Element for u8 {
    const ELEMENT_TYPE: ElementType = ElementType::U8;
}

impl Element for i16 {
    const ELEMENT_TYPE: ElementType = ElementType::I16;
}

impl Element for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::I32;
}

impl Element for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::F32;
}

impl Element for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::F64;
}

/// One header-data unit.
///
/// `cards` are the header records in file order without the `END` card. Long
/// strings stay split into their `CONTINUE` records; use
/// [`Hdu::logical_cards`] for the reassembled view. `bytes` holds exactly
/// [`Descriptor::byte_size`] bytes, in big-endian order until
/// [`Hdu::normalize_endianness`] has run and in native order afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    descriptor: Descriptor,
    cards: Vec<Card>,
    bytes: Vec<u8>,
    endianness_normalized: bool,
}

/// Cards before the first `END`.
fn header_cards(mut cards: Vec<Card>) -> Vec<Card> {
    if let Some(end) = cards.iter().position(Card::is_end) {
        cards.truncate(end);
    }
    cards
}

impl Hdu {
    fn assemble(cards: Vec<Card>, bytes: Vec<u8>, endianness_normalized: bool) -> Result<Hdu> {
        let cards = header_cards(cards);
        let mut descriptor = resolve(&cards)?;
        // Records as written, including the END card.
        descriptor.key_count = padded_card_count(record_count(&cards)? + 1);
        Hdu::from_resolved(descriptor, cards, bytes, endianness_normalized)
    }

    pub(crate) fn from_resolved(
        descriptor: Descriptor,
        cards: Vec<Card>,
        bytes: Vec<u8>,
        endianness_normalized: bool,
    ) -> Result<Hdu> {
        if bytes.len() != descriptor.byte_size() {
            return Err(Error::DataSizeMismatch {
                expected: descriptor.byte_size(),
                actual: bytes.len(),
            });
        }
        Ok(Hdu {
            descriptor,
            cards: header_cards(cards),
            bytes,
            endianness_normalized,
        })
    }

    /// Wrap payload bytes exactly as they appear in a file (big-endian).
    pub fn from_stream_bytes(cards: Vec<Card>, bytes: Vec<u8>) -> Result<Hdu> {
        Hdu::assemble(cards, bytes, false)
    }

    /// Wrap payload bytes already in native byte order.
    pub fn from_native(cards: Vec<Card>, bytes: Vec<u8>) -> Result<Hdu> {
        Hdu::assemble(cards, bytes, true)
    }

    /// Build a unit from typed values; `T` must match the header's `BITPIX`.
    pub fn from_values<T: Element>(cards: Vec<Card>, values: &[T]) -> Result<Hdu> {
        let cards = header_cards(cards);
        let descriptor = resolve(&cards)?;
        if descriptor.element_type != T::ELEMENT_TYPE {
            return Err(Error::ElementTypeMismatch(descriptor.element_type.bitpix()));
        }
        Hdu::assemble(cards, pod_collect_to_vec(values), true)
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Header records without `END`, `CONTINUE` records included.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Header cards with long strings reassembled.
    pub fn logical_cards(&self) -> Vec<Card> {
        merge_continued(&self.cards)
    }

    /// First header record with the given keyword.
    pub fn card(&self, name: &str) -> Option<&Card> {
        find_card(&self.cards, name)
    }

    /// Raw payload in its current byte order.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_normalized(&self) -> bool {
        self.endianness_normalized
    }

    /// Flip the payload from big-endian to native order. Later calls do
    /// nothing.
    pub fn normalize_endianness(&mut self) -> Result<()> {
        if self.endianness_normalized {
            return Ok(());
        }
        buf_be_to_native(&mut self.bytes, self.descriptor.item_size())?;
        self.endianness_normalized = true;
        Ok(())
    }

    /// Header blocks as they are written: long strings split, `END` appended,
    /// padded to whole blocks.
    pub fn header_bytes(&self) -> Result<Vec<u8>> {
        serialize_header(&self.cards)
    }

    /// Big-endian copy of the payload, whatever the current byte order.
    pub fn to_stream_bytes(&self) -> Result<Vec<u8>> {
        let mut out = self.bytes.clone();
        if self.endianness_normalized {
            buf_native_to_be(&mut out, self.descriptor.item_size())?;
        }
        Ok(out)
    }

    /// Typed copy of the payload in native order.
    pub fn values<T: Element>(&self) -> Result<Vec<T>> {
        if self.descriptor.element_type != T::ELEMENT_TYPE {
            return Err(Error::ElementTypeMismatch(
                self.descriptor.element_type.bitpix(),
            ));
        }
        if self.endianness_normalized {
            return Ok(pod_collect_to_vec(&self.bytes[..]));
        }
        let mut native = self.bytes.clone();
        buf_be_to_native(&mut native, self.descriptor.item_size())?;
        Ok(pod_collect_to_vec(&native[..]))
    }

    /// The payload as an n-dimensional array, slowest axis first.
    ///
    /// Units with group parameters or more than one group do not map onto a
    /// plain array and fail with [`Error::DataSizeMismatch`].
    #[cfg(feature = "array")]
    pub fn to_array<T: Element>(&self) -> Result<ndarray::ArrayD<T>> {
        let data: Vec<T> = self.values()?;
        let shape: Vec<usize> = self.descriptor.dimensions.iter().rev().copied().collect();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::DataSizeMismatch {
                expected: expected * self.descriptor.item_size(),
                actual: self.bytes.len(),
            });
        }
        ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data).map_err(|_| {
            Error::DataSizeMismatch {
                expected: expected * self.descriptor.item_size(),
                actual: self.bytes.len(),
            }
        })
    }
}
