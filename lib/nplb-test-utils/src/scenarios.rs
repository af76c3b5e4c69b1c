// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The canonical nodeport test cases.
//!
//! All of them send a request from the client to a service which has
//! a backend slot but nothing reachable in it.

use crate::*;
use crate::case::CheckCtx;
use crate::case::SetupCtx;
use crate::case::TailCall;
use crate::validate::IcmpReplyExpect;
use crate::validate::check_field;
use crate::validate::frame;
use crate::validate::status;
use crate::validate::validate_icmp_reply;

fn tcp_syn_pktgen(pkt: &mut PktGen) -> Result<(), BuildError> {
    let tcp = pkt.push_ipv4_tcp_packet(
        CLIENT_MAC,
        LB_MAC,
        CLIENT_IP,
        FRONTEND_IP,
        CLIENT_PORT,
        FRONTEND_PORT,
    )?;
    tcp.seq.set(SYN_SEQ);
    tcp.set_flags(TcpFlags::SYN);
    tcp.win.set(65535);

    pkt.push_data(DEFAULT_DATA)?;
    Ok(())
}

fn udp_pktgen(pkt: &mut PktGen) -> Result<(), BuildError> {
    pkt.push_ipv4_udp_packet(
        CLIENT_MAC,
        LB_MAC,
        CLIENT_IP,
        FRONTEND_IP,
        CLIENT_PORT,
        FRONTEND_PORT,
    )?;
    pkt.push_data(DEFAULT_DATA)?;
    Ok(())
}

/// The stages the last dispatch ran through.
fn check_trail(cctx: &CheckCtx<'_>, want: &[u32]) -> Result<(), TestError> {
    check_field("trail", want, &cctx.outcome.trail[..])
}

fn no_backend_setup(sctx: &mut SetupCtx<'_>) -> Result<TailCall, TestError> {
    seed_no_backend(sctx.maps, Protocol::TCP);
    Ok(sctx.tail_call(FROM_NETDEV))
}

fn no_backend_check(cctx: &CheckCtx<'_>) -> Result<(), TestError> {
    check_trail(cctx, &[FROM_NETDEV, IPV4_NO_SERVICE])?;
    validate_icmp_reply(
        cctx.buf,
        &IcmpReplyExpect::no_backend_tcp(CTX_ACT_REDIRECT),
    )
}

/// The reply generated on ingress is sent back out through egress.
fn no_backend_reply_setup(
    sctx: &mut SetupCtx<'_>,
) -> Result<TailCall, TestError> {
    seed_no_backend(sctx.maps, Protocol::TCP);
    Ok(sctx.tail_call(FROM_NETDEV).then(TO_NETDEV))
}

fn no_backend_reply_check(cctx: &CheckCtx<'_>) -> Result<(), TestError> {
    check_trail(cctx, &[TO_NETDEV])?;
    validate_icmp_reply(cctx.buf, &IcmpReplyExpect::no_backend_tcp(CTX_ACT_OK))
}

fn no_backend_udp_setup(
    sctx: &mut SetupCtx<'_>,
) -> Result<TailCall, TestError> {
    seed_no_backend(sctx.maps, Protocol::UDP);
    Ok(sctx.tail_call(FROM_NETDEV).then(TO_NETDEV))
}

fn no_backend_udp_check(cctx: &CheckCtx<'_>) -> Result<(), TestError> {
    check_trail(cctx, &[TO_NETDEV])?;
    validate_icmp_reply(cctx.buf, &IcmpReplyExpect::no_backend_udp(CTX_ACT_OK))
}

fn no_backend_drop_setup(
    sctx: &mut SetupCtx<'_>,
) -> Result<TailCall, TestError> {
    seed_no_backend(sctx.maps, Protocol::TCP);
    sctx.cfg.no_backend_response = false;
    Ok(sctx.tail_call(FROM_NETDEV))
}

fn no_backend_drop_check(cctx: &CheckCtx<'_>) -> Result<(), TestError> {
    check_trail(cctx, &[FROM_NETDEV])?;
    check_field("status code", CTX_ACT_DROP, status(cctx.buf)?)?;
    check_field("frame", cctx.input, frame(cctx.buf)?)
}

fn backend_setup(sctx: &mut SetupCtx<'_>) -> Result<TailCall, TestError> {
    seed_no_backend(sctx.maps, Protocol::TCP);
    bind_backend(sctx.maps, Protocol::TCP)?;
    Ok(sctx.tail_call(FROM_NETDEV))
}

fn backend_check(cctx: &CheckCtx<'_>) -> Result<(), TestError> {
    use nplb::engine::checksum::ipv4_hdr_csum;
    use nplb::engine::ether::ETHER_HDR_SZ;
    use nplb::engine::nodeport::parse_flow_v4;

    check_trail(cctx, &[FROM_NETDEV])?;
    check_field("status code", CTX_ACT_OK, status(cctx.buf)?)?;
    let ctx = CtxBuff::from_frame(frame(cctx.buf)?, 1)
        .map_err(|_| TestError::OutOfBounds { what: "frame" })?;
    let flow = parse_flow_v4(&ctx)
        .map_err(TestError::Process)?
        .ok_or(TestError::OutOfBounds { what: "l4" })?;
    check_field("l3 dest", BACKEND_IP, flow.dst)?;
    check_field("l4 dest port", BACKEND_PORT, flow.dst_port)?;
    check_field(
        "revnat",
        Some((FRONTEND_IP, FRONTEND_PORT)),
        cctx.maps
            .revnat_for_backend(flow.dst, flow.dst_port, flow.proto)
            .map(|rn| (rn.ip, rn.port)),
    )?;
    check_field(
        "l3 checksum verify",
        0,
        ipv4_hdr_csum(&ctx.bytes()[ETHER_HDR_SZ..flow.l4_off]).value(),
    )
}

/// A TCP SYN to a service without a usable backend is answered with
/// a Port Unreachable redirected back out of the ingress interface.
pub const NODEPORT_NO_BACKEND: TestCase = TestCase {
    name: "tc_nodeport_no_backend",
    pktgen: tcp_syn_pktgen,
    setup: no_backend_setup,
    check: no_backend_check,
};

/// The Port Unreachable leaves through egress untouched.
pub const NODEPORT_NO_BACKEND2_REPLY: TestCase = TestCase {
    name: "tc_nodeport_no_backend2_reply",
    pktgen: tcp_syn_pktgen,
    setup: no_backend_reply_setup,
    check: no_backend_reply_check,
};

pub const NODEPORT_NO_BACKEND_UDP: TestCase = TestCase {
    name: "tc_nodeport_no_backend_udp",
    pktgen: udp_pktgen,
    setup: no_backend_udp_setup,
    check: no_backend_udp_check,
};

/// With replies disabled the request is dropped as it was.
pub const NODEPORT_NO_BACKEND_DROP: TestCase = TestCase {
    name: "tc_nodeport_no_backend_drop",
    pktgen: tcp_syn_pktgen,
    setup: no_backend_drop_setup,
    check: no_backend_drop_check,
};

/// Once the pod is bound to the slot the request reaches it.
pub const NODEPORT_BACKEND: TestCase = TestCase {
    name: "tc_nodeport_backend",
    pktgen: tcp_syn_pktgen,
    setup: backend_setup,
    check: backend_check,
};

pub const ALL: [TestCase; 5] = [
    NODEPORT_NO_BACKEND,
    NODEPORT_NO_BACKEND2_REPLY,
    NODEPORT_NO_BACKEND_UDP,
    NODEPORT_NO_BACKEND_DROP,
    NODEPORT_BACKEND,
];

/// Look a case up by name.
pub fn find(name: &str) -> Option<TestCase> {
    ALL.iter().find(|case| case.name == name).copied()
}
