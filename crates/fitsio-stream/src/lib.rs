#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod block;
pub mod descriptor;
pub mod endian;
pub mod error;
pub mod hdu;
pub mod header;
pub mod value;

#[cfg(feature = "std")]
pub mod buffer;
#[cfg(feature = "std")]
pub mod stream;

pub use block::{BlockState, BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use descriptor::{resolve, Descriptor, ElementType};
pub use error::{Error, Result};
pub use hdu::{Element, Hdu};
pub use header::{merge_continued, serialize_header, Card, CardKind};
pub use value::{Format, Value, ValueKind};

#[cfg(feature = "std")]
pub use stream::{FitsReader, FitsWriter, StreamOptions};
