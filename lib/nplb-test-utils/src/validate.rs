// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Checking the frames the datapath hands back.
//!
//! Everything here works on the observed buffer: the verdict word
//! followed by the frame. Each header is bounds checked before it is
//! read, and a short buffer is reported as [`TestError::OutOfBounds`]
//! rather than as a mismatch.

use crate::BuildError;
use crate::CLIENT_IP;
use crate::CLIENT_MAC;
use crate::FRONTEND_IP;
use crate::LB_MAC;
use nplb::api::Ipv4Addr;
use nplb::api::MacAddr;
use nplb::api::Protocol;
use nplb::engine::checksum::icmp_csum;
use nplb::engine::checksum::ipv4_hdr_csum;
use nplb::engine::datapath::ProcessError;
use nplb::engine::ether::ETHER_HDR_SZ;
use nplb::engine::ether::ETHER_TYPE_IPV4;
use nplb::engine::ether::EtherHdrRaw;
use nplb::engine::icmp::IcmpHdrRaw;
use nplb::engine::ip4::DEF_TTL;
use nplb::engine::ip4::IPV4_HDR_SZ;
use nplb::engine::ip4::Ipv4HdrRaw;
use nplb::engine::maps::MapError;
use nplb::engine::packet::STATUS_LEN;
use nplb::engine::packet::hdr_at;
use nplb::engine::tail_call::DispatchError;
use smoltcp::wire::Icmpv4DstUnreachable;
use smoltcp::wire::Icmpv4Message;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TestError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("{what} out of bounds")]
    OutOfBounds { what: &'static str },

    #[error("{field}: expected {expected}, actual {actual}")]
    Mismatch { field: &'static str, expected: String, actual: String },

    #[error("setup failed: {0}")]
    Map(MapError),

    #[error("processing failed: {0}")]
    Process(ProcessError),

    #[error("dispatch failed: {0}")]
    Dispatch(DispatchError),

    #[error("control fell through past the tail call to {idx}")]
    FellThrough { idx: u32 },
}

/// Compare a single field.
pub fn check_field<T: PartialEq + Debug>(
    field: &'static str,
    expected: T,
    actual: T,
) -> Result<(), TestError> {
    if expected == actual {
        return Ok(());
    }

    Err(TestError::Mismatch {
        field,
        expected: format!("{expected:?}"),
        actual: format!("{actual:?}"),
    })
}

/// Compare a checksum, reporting values in hex.
pub fn check_csum(
    field: &'static str,
    expected: u16,
    actual: u16,
) -> Result<(), TestError> {
    if expected == actual {
        return Ok(());
    }

    Err(TestError::Mismatch {
        field,
        expected: format!("{expected:#06x}"),
        actual: format!("{actual:#06x}"),
    })
}

/// Read the verdict word at the front of an observed buffer.
pub fn status(buf: &[u8]) -> Result<u32, TestError> {
    let word = buf
        .get(..STATUS_LEN)
        .ok_or(TestError::OutOfBounds { what: "status code" })?;
    let mut raw = [0u8; STATUS_LEN];
    raw.copy_from_slice(word);
    Ok(u32::from_ne_bytes(raw))
}

/// The frame of an observed buffer.
pub fn frame(buf: &[u8]) -> Result<&[u8], TestError> {
    buf.get(STATUS_LEN..).ok_or(TestError::OutOfBounds { what: "status code" })
}

/// What an ICMP error generated by the datapath should look like.
#[derive(Clone, Debug)]
pub struct IcmpReplyExpect {
    pub verdict: u32,
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub tos: u8,
    pub ttl: u8,
    pub ip_csum: u16,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub icmp_csum: u16,
}

impl IcmpReplyExpect {
    /// The Port Unreachable answering the canonical TCP SYN.
    pub fn no_backend_tcp(verdict: u32) -> Self {
        Self::port_unreachable(verdict, 0x4b8e, 0x2c3f)
    }

    /// The Port Unreachable answering the canonical UDP request.
    pub fn no_backend_udp(verdict: u32) -> Self {
        Self::port_unreachable(verdict, 0x4b90, 0x2c3e)
    }

    fn port_unreachable(verdict: u32, ip_csum: u16, icmp_csum: u16) -> Self {
        Self {
            verdict,
            eth_src: LB_MAC,
            eth_dst: CLIENT_MAC,
            ip_src: FRONTEND_IP,
            ip_dst: CLIENT_IP,
            tos: 0,
            ttl: DEF_TTL,
            ip_csum,
            icmp_type: u8::from(Icmpv4Message::DstUnreachable),
            icmp_code: u8::from(Icmpv4DstUnreachable::PortUnreachable),
            icmp_csum,
        }
    }
}

/// Check an observed buffer against `exp`, layer by layer.
pub fn validate_icmp_reply(
    buf: &[u8],
    exp: &IcmpReplyExpect,
) -> Result<(), TestError> {
    check_field("status code", exp.verdict, status(buf)?)?;
    let frame = frame(buf)?;

    let eth = hdr_at::<EtherHdrRaw>(frame, 0)
        .map_err(|_| TestError::OutOfBounds { what: "l2" })?;
    check_field("l2 dest", exp.eth_dst, eth.dst_mac())?;
    check_field("l2 source", exp.eth_src, eth.src_mac())?;
    check_field("l2 proto", ETHER_TYPE_IPV4, eth.ether_type.get())?;

    let ip = hdr_at::<Ipv4HdrRaw>(frame, ETHER_HDR_SZ)
        .map_err(|_| TestError::OutOfBounds { what: "l3" })?;
    check_field("l3 header length", IPV4_HDR_SZ, ip.hdr_len())?;
    check_field("l3 version", 4, ip.version())?;
    check_field("l3 tos", exp.tos, ip.dscp_ecn)?;
    check_field("l3 ttl", exp.ttl, ip.ttl)?;
    check_field("l3 proto", Protocol::ICMP, ip.proto())?;
    check_field("l3 source", exp.ip_src, ip.src())?;
    check_field("l3 dest", exp.ip_dst, ip.dst())?;
    check_csum("l3 checksum", exp.ip_csum, ip.csum().value())?;

    let l4_off = ETHER_HDR_SZ + ip.hdr_len();
    let icmp = hdr_at::<IcmpHdrRaw>(frame, l4_off)
        .map_err(|_| TestError::OutOfBounds { what: "l4" })?;
    check_field("icmp type", exp.icmp_type, icmp.ty)?;
    check_field("icmp code", exp.icmp_code, icmp.code)?;
    check_csum("icmp checksum", exp.icmp_csum, icmp.csum().value())?;

    // The stored values must also be the right ones for the bytes
    // actually on the wire.
    let ip_end = ETHER_HDR_SZ + usize::from(ip.total_len.get());
    let msg = frame
        .get(l4_off..ip_end)
        .ok_or(TestError::OutOfBounds { what: "l4 payload" })?;
    check_csum(
        "l3 checksum verify",
        0,
        ipv4_hdr_csum(&frame[ETHER_HDR_SZ..l4_off]).value(),
    )?;
    check_csum("icmp checksum verify", 0, icmp_csum(msg).value())?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use nplb::engine::datapath::CTX_ACT_REDIRECT;

    #[test]
    fn short_buffer_is_out_of_bounds() {
        let exp = IcmpReplyExpect::no_backend_tcp(CTX_ACT_REDIRECT);
        assert_eq!(
            validate_icmp_reply(&[7, 0], &exp),
            Err(TestError::OutOfBounds { what: "status code" })
        );

        let mut buf = CTX_ACT_REDIRECT.to_ne_bytes().to_vec();
        buf.extend_from_slice(&[0; 10]);
        assert_eq!(
            validate_icmp_reply(&buf, &exp),
            Err(TestError::OutOfBounds { what: "l2" })
        );
    }

    #[test]
    fn frame_ending_in_ip_header_is_out_of_bounds() {
        let exp = IcmpReplyExpect::no_backend_tcp(CTX_ACT_REDIRECT);
        let mut buf = CTX_ACT_REDIRECT.to_ne_bytes().to_vec();
        buf.extend_from_slice(&CLIENT_MAC.bytes());
        buf.extend_from_slice(&LB_MAC.bytes());
        buf.extend_from_slice(&ETHER_TYPE_IPV4.to_be_bytes());

        // Every length short of a full IPv4 header.
        for ip_len in 0..IPV4_HDR_SZ {
            let mut short = buf.clone();
            short.extend_from_slice(&[0x45; IPV4_HDR_SZ][..ip_len]);
            assert_eq!(
                validate_icmp_reply(&short, &exp),
                Err(TestError::OutOfBounds { what: "l3" }),
                "ip_len {ip_len}"
            );
        }
    }

    #[test]
    fn wrong_verdict_is_mismatch() {
        let exp = IcmpReplyExpect::no_backend_tcp(CTX_ACT_REDIRECT);
        let buf = 0u32.to_ne_bytes();
        assert_eq!(
            validate_icmp_reply(&buf, &exp),
            Err(TestError::Mismatch {
                field: "status code",
                expected: "7".to_string(),
                actual: "0".to_string(),
            })
        );
    }
}
