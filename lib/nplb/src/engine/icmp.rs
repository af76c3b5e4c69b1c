// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! ICMPv4 headers.

use super::checksum::HeaderChecksum;
use super::checksum::icmp_csum;
pub use smoltcp::wire::Icmpv4DstUnreachable;
use smoltcp::wire::Icmpv4Message;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const ICMP_HDR_SZ: usize = size_of::<IcmpHdrRaw>();

/// The longest sample of the offending frame carried in an error
/// message generated by the datapath.
pub const ICMP_ERR_SAMPLE_MAX: usize = 64;

/// The ICMPv4 message type, as carried in [`IcmpHdrRaw::ty`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageType {
    inner: Icmpv4Message,
}

impl MessageType {
    pub const DEST_UNREACHABLE: Self =
        Self { inner: Icmpv4Message::DstUnreachable };
}

impl From<MessageType> for u8 {
    fn from(mt: MessageType) -> u8 {
        u8::from(mt.inner)
    }
}

impl From<u8> for MessageType {
    fn from(val: u8) -> Self {
        Self { inner: Icmpv4Message::from(val) }
    }
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct IcmpHdrRaw {
    pub ty: u8,
    pub code: u8,
    pub csum: [u8; 2],
    pub rest: [u8; 4],
}

impl IcmpHdrRaw {
    /// A Destination Unreachable / Port Unreachable header with a
    /// zero checksum.
    pub fn port_unreachable() -> Self {
        Self {
            ty: u8::from(MessageType::DEST_UNREACHABLE),
            code: u8::from(Icmpv4DstUnreachable::PortUnreachable),
            csum: [0; 2],
            rest: [0; 4],
        }
    }

    pub fn msg_type(&self) -> MessageType {
        MessageType::from(self.ty)
    }

    pub fn csum(&self) -> HeaderChecksum {
        HeaderChecksum::wrap(self.csum)
    }
}

/// Compute and store the checksum of the ICMP message in `msg`,
/// which starts with an [`IcmpHdrRaw`].
pub fn fill_csum(msg: &mut [u8]) -> Option<HeaderChecksum> {
    let (hdr, _) = IcmpHdrRaw::mut_from_prefix(msg).ok()?;
    hdr.csum = [0; 2];
    let csum = icmp_csum(msg);
    let (hdr, _) = IcmpHdrRaw::mut_from_prefix(msg).ok()?;
    hdr.csum = csum.bytes();
    Some(csum)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn port_unreachable_codes() {
        let hdr = IcmpHdrRaw::port_unreachable();
        assert_eq!(hdr.ty, 3);
        assert_eq!(hdr.code, 3);
        assert_eq!(hdr.msg_type(), MessageType::DEST_UNREACHABLE);
    }

    #[test]
    fn fill_csum_verifies() {
        let mut msg = [0u8; 12];
        msg[..ICMP_HDR_SZ]
            .copy_from_slice(IcmpHdrRaw::port_unreachable().as_bytes());
        msg[8..].copy_from_slice(&[0x45, 0x00, 0x00, 0x3C]);

        let csum = fill_csum(&mut msg).unwrap();
        assert_eq!(&msg[2..4], &csum.bytes());
        assert_eq!(icmp_csum(&msg).value(), 0);
    }

    #[test]
    fn fill_csum_short() {
        let mut msg = [0u8; 4];
        assert!(fill_csum(&mut msg).is_none());
    }
}
