// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP headers.

use super::checksum::HeaderChecksum;
use bitflags::bitflags;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::byteorder::network_endian::U32;

pub const TCP_HDR_SZ: usize = size_of::<TcpHdrRaw>();

/// Data offset (in 32-bit words) of a header without options.
pub const TCP_DOFF_NO_OPTS: u8 = 5;

bitflags! {
/// The standard TCP flags. We don't bother with the experimental NS
/// flag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcpFlags: u8 {
    const FIN = 1 << 0;
    const SYN = 1 << 1;
    const RST = 1 << 2;
    const PSH = 1 << 3;
    const ACK = 1 << 4;
    const URG = 1 << 5;
    const ECE = 1 << 6;
    const CWR = 1 << 7;
}
}

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: U16,
    pub dst_port: U16,
    pub seq: U32,
    pub ack: U32,
    pub offset: u8,
    pub flags: u8,
    pub win: U16,
    pub csum: [u8; 2],
    pub urg: U16,
}

impl TcpHdrRaw {
    /// Header length in bytes, as given by the data offset.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.offset >> 4) * 4
    }

    pub fn set_doff(&mut self, words: u8) {
        self.offset = (words << 4) | (self.offset & 0x0F);
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits_retain(self.flags)
    }

    pub fn set_flags(&mut self, flags: TcpFlags) {
        self.flags = flags.bits();
    }

    pub fn csum(&self) -> HeaderChecksum {
        HeaderChecksum::wrap(self.csum)
    }
}
