// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Big-endian, length-prefixed primitives shared by the frame and packet
//! codecs. Long form (`bytes`) carries a `u32` length, short form
//! (`short_bytes`) a `u16` length.

use bytes::{Buf, BufMut};

use crate::wire::frame::WireError;

#[inline]
fn ensure_remaining(buf: &impl Buf, need: usize) -> Result<(), WireError> {
    if buf.remaining() < need {
        return Err(WireError::UnexpectedEof);
    }
    Ok(())
}

pub fn read_u8(buf: &mut impl Buf) -> Result<u8, WireError> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut impl Buf) -> Result<u16, WireError> {
    ensure_remaining(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut impl Buf) -> Result<u32, WireError> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn read_fixed_bytes(buf: &mut impl Buf, len: usize) -> Result<Vec<u8>, WireError> {
    ensure_remaining(buf, len)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a `u32`-length-prefixed byte string.
pub fn read_bytes(buf: &mut impl Buf) -> Result<Vec<u8>, WireError> {
    let len = read_u32(buf)? as usize;
    read_fixed_bytes(buf, len)
}

/// Reads a `u16`-length-prefixed byte string.
pub fn read_short_bytes(buf: &mut impl Buf) -> Result<Vec<u8>, WireError> {
    let len = read_u16(buf)? as usize;
    read_fixed_bytes(buf, len)
}

pub fn read_short_string(buf: &mut impl Buf) -> Result<String, WireError> {
    let raw = read_short_bytes(buf)?;
    String::from_utf8(raw).map_err(|_| WireError::InvalidUtf8)
}

pub fn write_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

pub fn write_short_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
}
