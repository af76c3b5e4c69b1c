// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet context.
//!
//! A [`CtxBuff`] owns one frame, starting at the Ethernet header, in
//! a buffer of fixed capacity. Every header access goes through
//! [`CtxBuff::hdr`] / [`CtxBuff::hdr_mut`], which check the requested
//! header against the current end of the frame before handing out a
//! typed view. A short frame is a [`ReadErr`], never a panic.

use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use core::result;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// Capacity of a freshly created context: a full untagged Ethernet
/// frame without FCS.
pub const DEFAULT_CAPACITY: usize = 1514;

/// Size of the status word placed before the frame by
/// [`CtxBuff::to_status_frame`].
pub const STATUS_LEN: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadErr {
    /// The bytes are present but do not form a valid header.
    BadLayout,
    /// The offset is at or past the end of the frame.
    EndOfPacket,
    /// The header starts inside the frame but runs past its end.
    NotEnoughBytes,
}

impl Display for ReadErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLayout => write!(f, "bad layout"),
            Self::EndOfPacket => write!(f, "end of packet"),
            Self::NotEnoughBytes => write!(f, "not enough bytes"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteError {
    /// Growing the frame would exceed the context's capacity.
    NotEnoughBytes { available: usize, needed: usize },
    /// The write offset lies beyond the end of the frame.
    OutOfRange { off: usize, len: usize },
}

impl Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnoughBytes { available, needed } => write!(
                f,
                "not enough bytes: available {available}, needed {needed}",
            ),
            Self::OutOfRange { off, len } => {
                write!(f, "offset {off} out of range for length {len}")
            }
        }
    }
}

pub type ReadResult<T> = result::Result<T, ReadErr>;
pub type WriteResult<T> = result::Result<T, WriteError>;

/// Borrow a `T` header view starting at `off` in `bytes`.
pub fn hdr_at<T>(bytes: &[u8], off: usize) -> ReadResult<&T>
where
    T: FromBytes + KnownLayout + Immutable + Unaligned,
{
    let rest = bytes.get(off..).ok_or(ReadErr::EndOfPacket)?;
    if rest.is_empty() && size_of::<T>() != 0 {
        return Err(ReadErr::EndOfPacket);
    }
    T::ref_from_prefix(rest)
        .map(|(hdr, _)| hdr)
        .map_err(|_| ReadErr::NotEnoughBytes)
}

/// Mutably borrow a `T` header view starting at `off` in `bytes`.
pub fn hdr_at_mut<T>(bytes: &mut [u8], off: usize) -> ReadResult<&mut T>
where
    T: FromBytes + IntoBytes + KnownLayout + Unaligned,
{
    let rest = bytes.get_mut(off..).ok_or(ReadErr::EndOfPacket)?;
    if rest.is_empty() && size_of::<T>() != 0 {
        return Err(ReadErr::EndOfPacket);
    }
    T::mut_from_prefix(rest)
        .map(|(hdr, _)| hdr)
        .map_err(|_| ReadErr::NotEnoughBytes)
}

/// A single frame, as handed to a datapath program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CtxBuff {
    data: Vec<u8>,
    cap: usize,
    ifindex: u32,
}

impl CtxBuff {
    /// Create an empty context for a frame arriving on `ifindex`.
    pub fn new(ifindex: u32) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, ifindex)
    }

    pub fn with_capacity(cap: usize, ifindex: u32) -> Self {
        Self { data: Vec::with_capacity(cap), cap, ifindex }
    }

    /// Create a context holding a copy of `frame`.
    pub fn from_frame(frame: &[u8], ifindex: u32) -> WriteResult<Self> {
        let mut ctx = Self::new(ifindex);
        ctx.append(frame.len())?.copy_from_slice(frame);
        Ok(ctx)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// The interface this frame arrived on.
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn set_ifindex(&mut self, ifindex: u32) {
        self.ifindex = ifindex;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow the frame by `len` zeroed bytes and return them.
    pub fn append(&mut self, len: usize) -> WriteResult<&mut [u8]> {
        let start = self.data.len();
        self.resize(start + len)?;
        Ok(&mut self.data[start..])
    }

    /// Set the frame length to `new_len`, truncating or zero-filling
    /// at the tail.
    pub fn resize(&mut self, new_len: usize) -> WriteResult<()> {
        if new_len > self.cap {
            return Err(WriteError::NotEnoughBytes {
                available: self.cap - self.data.len(),
                needed: new_len - self.data.len(),
            });
        }

        self.data.resize(new_len, 0);
        Ok(())
    }

    /// Open a zeroed gap of `len` bytes at `off`, shifting the rest
    /// of the frame towards the tail, and return the gap.
    pub fn insert_room(
        &mut self,
        off: usize,
        len: usize,
    ) -> WriteResult<&mut [u8]> {
        let cur = self.data.len();
        if off > cur {
            return Err(WriteError::OutOfRange { off, len: cur });
        }

        if cur + len > self.cap {
            return Err(WriteError::NotEnoughBytes {
                available: self.cap - cur,
                needed: len,
            });
        }

        self.data.splice(off..off, core::iter::repeat_n(0, len));
        Ok(&mut self.data[off..off + len])
    }

    pub fn hdr<T>(&self, off: usize) -> ReadResult<&T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        hdr_at(&self.data, off)
    }

    pub fn hdr_mut<T>(&mut self, off: usize) -> ReadResult<&mut T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Unaligned,
    {
        hdr_at_mut(&mut self.data, off)
    }

    /// Return the frame prefixed with `status` in native byte order,
    /// the layout a test harness observes after a program has run.
    pub fn to_status_frame(&self, status: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(STATUS_LEN + self.data.len());
        out.extend_from_slice(&status.to_ne_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}
