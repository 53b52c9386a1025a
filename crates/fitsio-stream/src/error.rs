use alloc::string::String;

use crate::block::BlockState;

/// All errors that can occur while encoding, decoding or streaming FITS units.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A keyword name contains characters outside `[A-Z0-9 _-]` or is longer
    /// than 8 characters.
    #[error("malformed card name: {0:?}")]
    MalformedCardName(String),
    /// The body of a card could not be interpreted (unterminated quote,
    /// unparsable value, non-printable text).
    #[error("malformed card body: {0}")]
    MalformedCardBody(&'static str),
    /// The value and comment of a card do not fit in one 80-byte record.
    #[error("card {0:?} does not fit in an 80-byte record")]
    FieldTooLong(String),
    /// NaN and infinities have no card representation.
    #[error("card {0:?} carries a non-finite value")]
    NonFiniteValue(String),
    /// The first card is neither `SIMPLE = T` nor `XTENSION`.
    #[error("not a standard HDU: first card must be SIMPLE = T or XTENSION")]
    NotStandardHdu,
    /// A mandatory keyword was never supplied.
    #[error("missing mandatory keyword {0}")]
    MandatoryKeyMissing(String),
    /// A mandatory keyword appeared more than once.
    #[error("mandatory keyword {0} appears more than once")]
    MandatoryKeyDuplicated(String),
    /// A mandatory keyword has an unusable value or appears out of order.
    #[error("mandatory keyword {key} is out of range: {reason}")]
    MandatoryKeyOutOfRange {
        /// Keyword name, e.g. `NAXIS3`.
        key: String,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// BITPIX outside {8, 16, 32, -32, -64}.
    #[error("unsupported element type: BITPIX = {0}")]
    UnsupportedElementType(i64),
    /// Header scanning reached a non-header block before an END card.
    #[error("header never closed: {cards_seen} cards read before a {block:?} block")]
    HeaderNeverClosed {
        /// Cards accumulated for the unit before the failure.
        cards_seen: usize,
        /// Classification of the offending block.
        block: BlockState,
    },
    /// The stream ended before an aligned block or payload was complete.
    #[error("short read: needed {expected} bytes, stream supplied {available}")]
    ShortRead {
        /// Bytes required to finish the current step.
        expected: usize,
        /// Bytes actually available before end of stream.
        available: usize,
    },
    /// An internal buffer invariant was violated.
    #[error("buffer contract violation: {0}")]
    BufferContractViolation(&'static str),
    /// A payload length disagrees with the descriptor it is paired with.
    #[error("data size mismatch: descriptor needs {expected} bytes, got {actual}")]
    DataSizeMismatch {
        /// Byte size implied by the descriptor.
        expected: usize,
        /// Byte size supplied.
        actual: usize,
    },
    /// Typed access used a Rust type that does not match BITPIX.
    #[error("element type mismatch: unit holds BITPIX = {0}")]
    ElementTypeMismatch(i64),
    /// The instance hit a fatal error earlier and refuses further work.
    #[error("stream poisoned by an earlier fatal error")]
    Poisoned,
    /// An I/O error from the underlying stream.
    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` when the error leaves the stream in an unknown state, so
    /// the reader/writer instance must not be used for further units.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ShortRead { .. } | Error::BufferContractViolation(_) | Error::Poisoned => true,
            #[cfg(feature = "std")]
            Error::Io(_) => true,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display_malformed_name() {
        let e = Error::MalformedCardName(String::from("bitpix"));
        assert_eq!(e.to_string(), "malformed card name: \"bitpix\"");
    }

    #[test]
    fn display_unsupported_element_type() {
        let e = Error::UnsupportedElementType(64);
        assert_eq!(e.to_string(), "unsupported element type: BITPIX = 64");
    }

    #[test]
    fn display_out_of_range() {
        let e = Error::MandatoryKeyOutOfRange {
            key: String::from("NAXIS3"),
            reason: "axis index exceeds NAXIS",
        };
        assert_eq!(
            e.to_string(),
            "mandatory keyword NAXIS3 is out of range: axis index exceeds NAXIS"
        );
    }

    #[test]
    fn display_short_read() {
        let e = Error::ShortRead {
            expected: 5760,
            available: 100,
        };
        assert_eq!(
            e.to_string(),
            "short read: needed 5760 bytes, stream supplied 100"
        );
    }

    #[test]
    fn fatal_classification() {
        assert!(Error::ShortRead {
            expected: 1,
            available: 0
        }
        .is_fatal());
        assert!(Error::BufferContractViolation("double init").is_fatal());
        assert!(Error::Poisoned.is_fatal());
        assert!(!Error::NotStandardHdu.is_fatal());
        assert!(!Error::HeaderNeverClosed {
            cards_seen: 0,
            block: BlockState::Data
        }
        .is_fatal());
        assert!(!Error::UnsupportedElementType(7).is_fatal());
    }

    #[cfg(feature = "std")]
    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::other("oops");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.is_fatal());
    }

    #[cfg(feature = "std")]
    #[test]
    fn std_error_source() {
        use std::error::Error as StdError;

        assert!(Error::NotStandardHdu.source().is_none());
        let e = Error::Io(std::io::Error::other("inner"));
        assert!(e.source().is_some());
    }
}
