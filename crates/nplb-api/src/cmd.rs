// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Control-plane requests and datapath configuration.

use super::ip::Ipv4Addr;
use super::ip::Protocol;
use super::mac::MacAddr;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// The MAC address the datapath answers with by default. This is the
/// address of the node's external interface.
pub const DEFAULT_LB_MAC: MacAddr =
    MacAddr::from_const([0xCE, 0x72, 0xA7, 0x03, 0x88, 0x56]);

/// Insert or replace a service frontend.
///
/// A `backend_count` of zero is legal: it declares a service which
/// currently has nowhere to send traffic.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddServiceReq {
    pub frontend_ip: Ipv4Addr,
    pub frontend_port: u16,
    pub protocol: Protocol,
    pub backend_count: u16,
    pub revnat_id: u16,
}

/// Bind a backend to one of a service's slots.
///
/// Slots are 1-based, matching the service's `backend_count`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddBackendReq {
    pub frontend_ip: Ipv4Addr,
    pub frontend_port: u16,
    pub protocol: Protocol,
    pub slot: u16,
    pub backend_id: u32,
    pub backend_ip: Ipv4Addr,
    pub backend_port: u16,
}

/// Insert or replace an identity-cache entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddIdentityReq {
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub cluster_id: u32,
    pub security_id: u32,
    #[serde(default)]
    pub tunnel_endpoint: u32,
    #[serde(default)]
    pub spi: u32,
}

/// Configuration of the nodeport datapath.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct NodeportCfg {
    /// The MAC address of the node's interface.
    pub lb_mac: MacAddr,

    /// Answer requests for services without a usable backend with an
    /// ICMP Port Unreachable instead of dropping them.
    pub no_backend_response: bool,

    /// The interface index packets arrive on. Synthesized replies are
    /// redirected back out of it.
    pub ifindex: u32,
}

impl Default for NodeportCfg {
    fn default() -> Self {
        Self { lb_mac: DEFAULT_LB_MAC, no_backend_response: true, ifindex: 1 }
    }
}

/// A complete control-plane fixture, as stored on disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct FixtureCfg {
    pub nodeport: NodeportCfg,
    pub services: Vec<AddServiceReq>,
    pub backends: Vec<AddBackendReq>,
    pub identities: Vec<AddIdentityReq>,
}
