// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The internet checksum.
//!
//! [`Checksum`] is a rolling one's complement sum which can be built
//! up from several byte regions, or incrementally adjusted when only
//! part of a header is rewritten (RFC 1624). Finalizing it yields a
//! [`HeaderChecksum`]: the two bytes exactly as they sit in the
//! header.
//!
//! All words are summed in network order, so a [`HeaderChecksum`] is
//! also in network order. Never byte-swap it.
//!
//! The free functions at the bottom compute complete checksums for
//! the headers the datapath writes. They take immutable byte views
//! and are pure.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

use nplb_api::Ipv4Addr;
use nplb_api::Protocol;

/// The checksum value as it is contained in a network header, i.e.
/// with one's complement applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes as read from a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }

    /// The checksum as a logical value, e.g. `0x4b8e` for the bytes
    /// `[0x4b, 0x8e]`.
    pub fn value(&self) -> u16 {
        u16::from_be_bytes(self.inner)
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_be_bytes() }
    }
}

/// A rolling one's complement sum.
///
/// Carries are accumulated in the upper half of the `u32` and only
/// folded back in by [`Checksum::finalize`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self { inner: 0 }
    }

    /// Create a new rolling checksum, starting with `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut csum = Self::new();
        csum.add_bytes(bytes);
        csum
    }

    /// Add the contents of `bytes` to the sum.
    ///
    /// An odd trailing byte is padded with zero, so only the final
    /// region added may have an odd length.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.add_word(u16::from_be_bytes([w[0], w[1]]));
        }

        if let [last] = words.remainder() {
            self.add_word(u16::from_be_bytes([*last, 0]));
        }
    }

    /// Remove the contents of `bytes` from the sum.
    ///
    /// Used with [`Checksum::add_bytes`] to update a checksum when a
    /// field is rewritten, without summing the whole header again.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.add_word(!u16::from_be_bytes([w[0], w[1]]));
        }

        if let [last] = words.remainder() {
            self.add_word(!u16::from_be_bytes([*last, 0]));
        }
    }

    #[inline]
    fn add_word(&mut self, word: u16) {
        self.inner += u32::from(word);
        // Fold early so that arbitrarily long inputs cannot overflow.
        if self.inner >= 0xFFFF_0000 {
            self.fold();
        }
    }

    fn fold(&mut self) {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }
    }

    /// Fold all carries and return the one's complement sum.
    pub fn finalize(&mut self) -> u16 {
        self.fold();
        self.inner as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    /// Turn a header's checksum back into the running sum it was
    /// finalized from.
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: u32::from(!hc.value()) }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(mut self, mut other: Self) -> Self {
        self.add_word(other.finalize());
        self
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, mut other: Self) {
        self.add_word(other.finalize());
    }
}

/// Rewrite `csum` to account for `old` being replaced by `new`.
///
/// `old` and `new` must have the same, even, length.
pub fn csum_replace(csum: &mut [u8; 2], old: &[u8], new: &[u8]) {
    debug_assert_eq!(old.len(), new.len());
    let mut c = Checksum::from(HeaderChecksum::wrap(*csum));
    c.sub_bytes(old);
    c.add_bytes(new);
    *csum = HeaderChecksum::from(c).bytes();
}

/// Compute the checksum of an IPv4 header.
///
/// The header's own checksum field must be zero, or the result is
/// the verification sum (zero for a valid header).
pub fn ipv4_hdr_csum(hdr: &[u8]) -> HeaderChecksum {
    HeaderChecksum::from(Checksum::compute(hdr))
}

/// Sum the IPv4 pseudo-header used by TCP and UDP.
pub fn pseudo_hdr_v4(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: Protocol,
    ulp_len: u16,
) -> Checksum {
    let mut csum = Checksum::new();
    csum.add_bytes(&src.bytes());
    csum.add_bytes(&dst.bytes());
    csum.add_bytes(&[0, u8::from(proto)]);
    csum.add_bytes(&ulp_len.to_be_bytes());
    csum
}

/// Compute a TCP or UDP checksum over the pseudo-header and
/// `segment`, whose checksum field must be zero.
pub fn ulp_csum_v4(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: Protocol,
    segment: &[u8],
) -> HeaderChecksum {
    let mut csum = pseudo_hdr_v4(src, dst, proto, segment.len() as u16);
    csum.add_bytes(segment);
    HeaderChecksum::from(csum)
}

/// Compute the checksum of an ICMPv4 message (header and body),
/// whose checksum field must be zero.
pub fn icmp_csum(msg: &[u8]) -> HeaderChecksum {
    HeaderChecksum::from(Checksum::compute(msg))
}

#[cfg(test)]
mod test {
    use super::*;

    // The header from RFC 1071's worked example family: a real
    // captured IPv4 header with checksum 0xB861.
    const IP_HDR: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00,
        0x00, 0xC0, 0xA8, 0x00, 0x01, 0xC0, 0xA8, 0x00, 0xC7,
    ];

    #[test]
    fn ipv4_known_value() {
        assert_eq!(ipv4_hdr_csum(&IP_HDR).value(), 0xB861);

        let mut with_csum = IP_HDR;
        with_csum[10..12].copy_from_slice(&[0xB8, 0x61]);
        assert_eq!(ipv4_hdr_csum(&with_csum).value(), 0x0000);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        let mut a = Checksum::compute(&[0x12, 0x34, 0x56]);
        let mut b = Checksum::compute(&[0x12, 0x34, 0x56, 0x00]);
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn incremental_matches_full() {
        let mut hdr = IP_HDR;
        let mut csum = ipv4_hdr_csum(&hdr).bytes();

        // Rewrite the destination address.
        let old = [0xC0, 0xA8, 0x00, 0xC7];
        let new = [0x0A, 0x00, 0x00, 0x05];
        hdr[16..20].copy_from_slice(&new);
        csum_replace(&mut csum, &old, &new);

        assert_eq!(csum, ipv4_hdr_csum(&hdr).bytes());
    }

    #[test]
    fn add_combines_regions() {
        let mut whole = Checksum::compute(&IP_HDR);
        let mut split = Checksum::compute(&IP_HDR[..8]);
        split += Checksum::compute(&IP_HDR[8..]);
        assert_eq!(whole.finalize(), split.finalize());
    }
}
