// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The nodeport programs.
//!
//! * [`FromNetdev`]: ingress. Translates requests for a service
//!   frontend to one of its backends. When the service has no usable
//!   backend it tail calls [`NoServiceV4`].
//!
//! * [`NoServiceV4`]: turns the request, in place, into an ICMP
//!   Destination Unreachable / Port Unreachable addressed back to the
//!   client and redirects it out of the interface it arrived on.
//!
//! * [`ToNetdev`]: egress. Translates replies from a backend back to
//!   the service frontend. Anything else, including the ICMP errors
//!   generated above, leaves untouched.

use super::checksum::csum_replace;
use super::datapath::Datapath;
use super::datapath::DropReason;
use super::datapath::ProcessError;
use super::datapath::Verdict;
use super::ether::ETHER_HDR_SZ;
use super::ether::EtherHdrRaw;
use super::ether::EtherType;
use super::icmp;
use super::icmp::ICMP_ERR_SAMPLE_MAX;
use super::icmp::ICMP_HDR_SZ;
use super::icmp::IcmpHdrRaw;
use super::ip4::IPV4_HDR_SZ;
use super::ip4::Ipv4HdrRaw;
use super::maps::ServiceKey;
use super::packet::CtxBuff;
use super::packet::ReadErr;
use super::packet::WriteError;
use super::packet::hdr_at_mut;
use super::tail_call::Program;
use super::tail_call::Stage;
use super::tail_call::Transition;
use super::tcp::TcpHdrRaw;
use super::udp::UdpHdrRaw;
use crate::provider::LogLevel;
use core::cmp::min;
use nplb_api::Ipv4Addr;
use nplb_api::Protocol;

fn oob(hdr: &'static str) -> impl Fn(ReadErr) -> ProcessError {
    move |err| ProcessError::OutOfBounds { hdr, err }
}

/// The L3/L4 addressing of an IPv4 TCP or UDP packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlowV4 {
    pub proto: Protocol,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Offset of the L4 header within the frame.
    pub l4_off: usize,
}

/// Parse the flow of an IPv4 TCP or UDP packet.
///
/// Returns `Ok(None)` for anything else. A frame too short for the
/// headers it claims to carry is an error.
pub fn parse_flow_v4(ctx: &CtxBuff) -> Result<Option<FlowV4>, ProcessError> {
    let eth = ctx.hdr::<EtherHdrRaw>(0).map_err(oob("Ethernet"))?;
    if eth.ether_type() != EtherType::Ipv4 {
        return Ok(None);
    }

    let ip = ctx.hdr::<Ipv4HdrRaw>(ETHER_HDR_SZ).map_err(oob("IPv4"))?;
    if ip.hdr_len() < IPV4_HDR_SZ {
        return Err(ProcessError::OutOfBounds {
            hdr: "IPv4",
            err: ReadErr::BadLayout,
        });
    }

    let l4_off = ETHER_HDR_SZ + ip.hdr_len();
    let (src_port, dst_port) = match ip.proto() {
        Protocol::TCP => {
            let tcp = ctx.hdr::<TcpHdrRaw>(l4_off).map_err(oob("TCP"))?;
            (tcp.src_port.get(), tcp.dst_port.get())
        }

        Protocol::UDP => {
            let udp = ctx.hdr::<UdpHdrRaw>(l4_off).map_err(oob("UDP"))?;
            (udp.src_port.get(), udp.dst_port.get())
        }

        _ => return Ok(None),
    };

    Ok(Some(FlowV4 {
        proto: ip.proto(),
        src: ip.src(),
        dst: ip.dst(),
        src_port,
        dst_port,
        l4_off,
    }))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Side {
    Src,
    Dst,
}

/// Rewrite one side of `flow` to `ip:port`, updating the IPv4 and L4
/// checksums incrementally.
fn rewrite_v4(
    ctx: &mut CtxBuff,
    flow: &FlowV4,
    side: Side,
    ip: Ipv4Addr,
    port: u16,
) -> Result<(), ProcessError> {
    let new_ip = ip.bytes();
    let new_port = port.to_be_bytes();

    let ip4 = ctx.hdr_mut::<Ipv4HdrRaw>(ETHER_HDR_SZ).map_err(oob("IPv4"))?;
    let addr = match side {
        Side::Src => &mut ip4.src,
        Side::Dst => &mut ip4.dst,
    };
    let old_ip = *addr;
    *addr = new_ip;
    csum_replace(&mut ip4.csum, &old_ip, &new_ip);

    let bytes = ctx.bytes_mut();
    match flow.proto {
        Protocol::TCP => {
            let tcp = hdr_at_mut::<TcpHdrRaw>(bytes, flow.l4_off)
                .map_err(oob("TCP"))?;
            let field = match side {
                Side::Src => &mut tcp.src_port,
                Side::Dst => &mut tcp.dst_port,
            };
            let old_port = field.get().to_be_bytes();
            field.set(port);
            csum_replace(&mut tcp.csum, &old_ip, &new_ip);
            csum_replace(&mut tcp.csum, &old_port, &new_port);
        }

        Protocol::UDP => {
            let udp = hdr_at_mut::<UdpHdrRaw>(bytes, flow.l4_off)
                .map_err(oob("UDP"))?;
            let field = match side {
                Side::Src => &mut udp.src_port,
                Side::Dst => &mut udp.dst_port,
            };
            let old_port = field.get().to_be_bytes();
            field.set(port);

            if udp.has_csum() {
                csum_replace(&mut udp.csum, &old_ip, &new_ip);
                csum_replace(&mut udp.csum, &old_port, &new_port);
                // A computed zero is sent as all ones (RFC 768).
                if !udp.has_csum() {
                    udp.csum = [0xFF; 2];
                }
            }
        }

        _ => {}
    }

    Ok(())
}

/// Rewrite the IPv4 request in `ctx` into an ICMP Port Unreachable
/// sent back to its source.
///
/// The reply samples the original L3 packet. The sample is as long
/// as the whole frame, capped at [`ICMP_ERR_SAMPLE_MAX`], and is
/// zero-filled where the packet runs short. MAC and IP addresses are
/// swapped and the TTL is reset. Both checksums are computed fresh.
pub fn no_service_reply_v4(ctx: &mut CtxBuff) -> Result<(), ProcessError> {
    let eth = *ctx.hdr::<EtherHdrRaw>(0).map_err(oob("Ethernet"))?;
    let ip = *ctx.hdr::<Ipv4HdrRaw>(ETHER_HDR_SZ).map_err(oob("IPv4"))?;

    let sample_len = min(ctx.len(), ICMP_ERR_SAMPLE_MAX);
    let needed = ETHER_HDR_SZ + IPV4_HDR_SZ + ICMP_HDR_SZ + sample_len;
    if needed > ctx.capacity() {
        return Err(ProcessError::WriteFailed {
            what: "ICMP headers",
            err: WriteError::NotEnoughBytes {
                available: ctx.capacity(),
                needed,
            },
        });
    }

    ctx.resize(ETHER_HDR_SZ + sample_len).map_err(|err| {
        ProcessError::WriteFailed { what: "ICMP sample", err }
    })?;
    ctx.insert_room(ETHER_HDR_SZ, IPV4_HDR_SZ + ICMP_HDR_SZ).map_err(
        |err| ProcessError::WriteFailed { what: "ICMP headers", err },
    )?;

    let new_eth = ctx.hdr_mut::<EtherHdrRaw>(0).map_err(oob("Ethernet"))?;
    new_eth.dst = eth.src;
    new_eth.src = eth.dst;
    new_eth.set_ether_type(EtherType::Ipv4);

    let total_len = (IPV4_HDR_SZ + ICMP_HDR_SZ + sample_len) as u16;
    *ctx.hdr_mut::<Ipv4HdrRaw>(ETHER_HDR_SZ).map_err(oob("IPv4"))? =
        Ipv4HdrRaw::new_local(
            ip.dscp_ecn,
            Protocol::ICMP,
            ip.dst(),
            ip.src(),
            total_len,
        );

    let icmp_off = ETHER_HDR_SZ + IPV4_HDR_SZ;
    *ctx.hdr_mut::<IcmpHdrRaw>(icmp_off).map_err(oob("ICMP"))? =
        IcmpHdrRaw::port_unreachable();
    icmp::fill_csum(&mut ctx.bytes_mut()[icmp_off..]).ok_or(
        ProcessError::OutOfBounds { hdr: "ICMP", err: ReadErr::NotEnoughBytes },
    )?;

    Ok(())
}

/// Ingress.
pub struct FromNetdev;

impl Program for FromNetdev {
    fn name(&self) -> &'static str {
        "from-netdev"
    }

    fn run(
        &self,
        ctx: &mut CtxBuff,
        dp: &Datapath,
    ) -> Result<Transition, ProcessError> {
        let Some(flow) = parse_flow_v4(ctx)? else {
            dp.log(LogLevel::Note, "from-netdev: not IPv4 TCP/UDP: OK");
            return Ok(Transition::Verdict(Verdict::Ok));
        };

        let key = ServiceKey::new(flow.dst, flow.dst_port, flow.proto);
        let Some(svc) = dp.maps.lookup_service(&key) else {
            dp.log(LogLevel::Note, "from-netdev: no service: OK");
            return Ok(Transition::Verdict(Verdict::Ok));
        };

        if let Some((id, be)) = dp.maps.select_backend(svc, flow.src_port) {
            rewrite_v4(ctx, &flow, Side::Dst, be.ip, be.port)?;
            dp.log(
                LogLevel::Note,
                &format!(
                    "from-netdev: {key} -> backend {id} ({}:{}): OK",
                    be.ip, be.port
                ),
            );
            return Ok(Transition::Verdict(Verdict::Ok));
        }

        if dp.cfg.no_backend_response {
            dp.log(
                LogLevel::Note,
                &format!("from-netdev: {key} has no backend: tail call"),
            );
            Ok(Transition::TailCall(Stage::NoServiceV4.index()))
        } else {
            dp.log(
                LogLevel::Warn,
                &format!("from-netdev: {key} has no backend: DROP"),
            );
            Ok(Transition::Verdict(Verdict::Drop(DropReason::NoService)))
        }
    }
}

/// Reply to a request for a service without a usable backend.
pub struct NoServiceV4;

impl Program for NoServiceV4 {
    fn name(&self) -> &'static str {
        "no-service-v4"
    }

    fn run(
        &self,
        ctx: &mut CtxBuff,
        dp: &Datapath,
    ) -> Result<Transition, ProcessError> {
        no_service_reply_v4(ctx)?;
        let verdict = Verdict::Redirect { ifindex: ctx.ifindex() };
        dp.log(LogLevel::Note, &format!("no-service-v4: {verdict}"));
        Ok(Transition::Verdict(verdict))
    }
}

/// Egress.
pub struct ToNetdev;

impl Program for ToNetdev {
    fn name(&self) -> &'static str {
        "to-netdev"
    }

    fn run(
        &self,
        ctx: &mut CtxBuff,
        dp: &Datapath,
    ) -> Result<Transition, ProcessError> {
        let Some(flow) = parse_flow_v4(ctx)? else {
            dp.log(LogLevel::Note, "to-netdev: not IPv4 TCP/UDP: OK");
            return Ok(Transition::Verdict(Verdict::Ok));
        };

        let revnat =
            dp.maps.revnat_for_backend(flow.src, flow.src_port, flow.proto);
        if let Some(rn) = revnat {
            rewrite_v4(ctx, &flow, Side::Src, rn.ip, rn.port)?;
            dp.log(
                LogLevel::Note,
                &format!(
                    "to-netdev: {}:{} -> {}:{}: OK",
                    flow.src, flow.src_port, rn.ip, rn.port
                ),
            );
        } else {
            dp.log(LogLevel::Note, "to-netdev: OK");
        }

        Ok(Transition::Verdict(Verdict::Ok))
    }
}
