// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! UDP headers.

use super::checksum::HeaderChecksum;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;

pub const UDP_HDR_SZ: usize = size_of::<UdpHdrRaw>();

/// Offset of the checksum field within the header.
pub const UDP_CSUM_OFF: usize = 6;

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct UdpHdrRaw {
    pub src_port: U16,
    pub dst_port: U16,
    pub len: U16,
    pub csum: [u8; 2],
}

impl UdpHdrRaw {
    pub fn csum(&self) -> HeaderChecksum {
        HeaderChecksum::wrap(self.csum)
    }

    /// A zero checksum means the sender did not compute one.
    pub fn has_csum(&self) -> bool {
        self.csum != [0; 2]
    }
}
