// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.
//!
//! A test case is generated, set up, dispatched and checked entirely
//! in memory: [`pktgen`] builds the frame, [`case`] seeds a fresh set
//! of tables and drives the programs, and [`validate`] picks the
//! result apart.

pub mod case;
pub mod pcap;
pub mod pktgen;
pub mod scenarios;
pub mod validate;

// Let's make our lives easier and pub use a bunch of stuff.
pub use nplb::ExecCtx;
pub use nplb::api::AddBackendReq;
pub use nplb::api::AddIdentityReq;
pub use nplb::api::AddServiceReq;
pub use nplb::api::Ipv4Addr;
pub use nplb::api::MacAddr;
pub use nplb::api::NodeportCfg;
pub use nplb::api::Protocol;
pub use nplb::engine::CtxBuff;
pub use nplb::engine::Datapath;
pub use nplb::engine::Maps;
pub use nplb::engine::TailCallTable;
pub use nplb::engine::Verdict;
pub use nplb::engine::datapath::CTX_ACT_DROP;
pub use nplb::engine::datapath::CTX_ACT_OK;
pub use nplb::engine::datapath::CTX_ACT_REDIRECT;
pub use nplb::engine::datapath::DropReason;
pub use nplb::engine::tail_call::FROM_NETDEV;
pub use nplb::engine::tail_call::IPV4_NO_SERVICE;
pub use nplb::engine::tail_call::TO_NETDEV;
pub use nplb::engine::tcp::TcpFlags;
pub use nplb::provider::PrintlnLog;

pub use case::Runner;
pub use case::TestCase;
pub use pktgen::BuildError;
pub use pktgen::PktGen;
pub use validate::TestError;

/// The client.
pub const CLIENT_MAC: MacAddr =
    MacAddr::from_const([0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xEF]);
pub const CLIENT_IP: Ipv4Addr = Ipv4Addr::from_const([110, 0, 11, 1]);
pub const CLIENT_PORT: u16 = 111;

/// The service frontend.
pub const FRONTEND_IP: Ipv4Addr = Ipv4Addr::from_const([172, 16, 10, 2]);
pub const FRONTEND_PORT: u16 = 80;
pub const REVNAT_ID: u16 = 1;

/// The pod which would back the service.
pub const BACKEND_IP: Ipv4Addr = Ipv4Addr::from_const([192, 168, 0, 2]);
pub const BACKEND_PORT: u16 = 8080;
pub const BACKEND_ID: u32 = 124;
pub const BACKEND_SEC_ID: u32 = 112233;

/// The node's interface.
pub const LB_MAC: MacAddr = nplb::api::DEFAULT_LB_MAC;

/// Initial sequence number of generated SYNs.
pub const SYN_SEQ: u32 = 2922048129;

/// Payload of generated requests.
pub const DEFAULT_DATA: &[u8] = b"Should not change!!\0";

/// An [`ExecCtx`] which prints to stdout.
pub fn println_ectx() -> ExecCtx {
    ExecCtx { log: Box::new(PrintlnLog) }
}

/// Seed `maps` with the service and identity shared by the canonical
/// scenarios: one declared backend slot, no backend bound to it, and
/// only the pod's address in the identity cache.
pub fn seed_no_backend(maps: &mut Maps, protocol: Protocol) {
    maps.add_service(&AddServiceReq {
        frontend_ip: FRONTEND_IP,
        frontend_port: FRONTEND_PORT,
        protocol,
        backend_count: 1,
        revnat_id: REVNAT_ID,
    });
    maps.add_identity(&AddIdentityReq {
        ip: BACKEND_IP,
        cluster_id: 0,
        security_id: BACKEND_SEC_ID,
        tunnel_endpoint: 0,
        spi: 0,
    });
}

/// Bind the pod to the service seeded by [`seed_no_backend`].
pub fn bind_backend(
    maps: &mut Maps,
    protocol: Protocol,
) -> Result<(), TestError> {
    maps.add_backend(&AddBackendReq {
        frontend_ip: FRONTEND_IP,
        frontend_port: FRONTEND_PORT,
        protocol,
        slot: 1,
        backend_id: BACKEND_ID,
        backend_ip: BACKEND_IP,
        backend_port: BACKEND_PORT,
    })
    .map_err(TestError::Map)
}
