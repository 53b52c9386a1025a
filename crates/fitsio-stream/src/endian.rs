//! Bulk byte-order conversion between on-disk big-endian and native order.
//!
//! FITS stores every element big-endian. These helpers flip a whole payload
//! in place, one element of `width` bytes at a time. On big-endian hosts they
//! only validate the length.

use crate::error::{Error, Result};

fn check_width(buf: &[u8], width: usize) -> Result<()> {
    if width == 0 || !buf.len().is_multiple_of(width) {
        return Err(Error::BufferContractViolation(
            "payload length is not a multiple of the element size",
        ));
    }
    Ok(())
}

#[cfg(target_endian = "little")]
fn swap_elements(buf: &mut [u8], width: usize) {
    if width == 1 {
        return;
    }
    for chunk in buf.chunks_exact_mut(width) {
        chunk.reverse();
    }
}

#[cfg(target_endian = "big")]
fn swap_elements(_buf: &mut [u8], _width: usize) {}

/// Convert a buffer of big-endian elements to native order in place.
pub fn buf_be_to_native(buf: &mut [u8], width: usize) -> Result<()> {
    check_width(buf, width)?;
    swap_elements(buf, width);
    Ok(())
}

/// Convert a buffer of native-order elements to big-endian in place.
pub fn buf_native_to_be(buf: &mut [u8], width: usize) -> Result<()> {
    check_width(buf, width)?;
    swap_elements(buf, width);
    Ok(())
}
