// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 headers.

use super::checksum::HeaderChecksum;
use super::checksum::ipv4_hdr_csum;
use nplb_api::Ipv4Addr;
use nplb_api::Protocol;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;

pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_MASK: u8 = 0xF0;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
pub const IPV4_VERSION: u8 = 4;

/// The version/IHL byte of a header without options.
pub const IPV4_VER_IHL: u8 = (IPV4_VERSION << IPV4_HDR_VER_SHIFT) | 5;

pub const IPV4_HDR_SZ: usize = size_of::<Ipv4HdrRaw>();

/// The TTL given to every packet the datapath originates.
pub const DEF_TTL: u8 = 64;

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: U16,
    pub ident: U16,
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4HdrRaw {
    pub fn version(&self) -> u8 {
        (self.ver_hdr_len & IPV4_HDR_VER_MASK) >> IPV4_HDR_VER_SHIFT
    }

    /// Header length in bytes.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & IPV4_HDR_LEN_MASK) * 4
    }

    pub fn proto(&self) -> Protocol {
        Protocol::from(self.proto)
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }

    pub fn csum(&self) -> HeaderChecksum {
        HeaderChecksum::wrap(self.csum)
    }

    /// Recompute the checksum from scratch.
    pub fn compute_csum(&mut self) {
        self.csum = [0; 2];
        self.csum = ipv4_hdr_csum(self.as_bytes()).bytes();
    }

    /// Whether the stored checksum verifies.
    pub fn csum_ok(&self) -> bool {
        ipv4_hdr_csum(self.as_bytes()).value() == 0
    }

    /// Build a header for a locally originated packet with no
    /// options and no fragmentation.
    pub fn new_local(
        tos: u8,
        proto: Protocol,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        total_len: u16,
    ) -> Self {
        let mut hdr = Self {
            ver_hdr_len: IPV4_VER_IHL,
            dscp_ecn: tos,
            total_len: U16::new(total_len),
            ident: U16::ZERO,
            frag_and_flags: [0; 2],
            ttl: DEF_TTL,
            proto: u8::from(proto),
            csum: [0; 2],
            src: src.bytes(),
            dst: dst.bytes(),
        };
        hdr.compute_csum();
        hdr
    }
}
