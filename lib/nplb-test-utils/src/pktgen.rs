// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Synthetic packet construction.
//!
//! A [`PktGen`] appends headers to a [`CtxBuff`] one layer at a time.
//! Each `push_*` call zeroes its header, fills in the addressing it
//! was given and hands the header back so the caller can set anything
//! else (sequence numbers, flags). Lengths and checksums are left as
//! placeholders until [`PktGen::finish`] fills them all in one pass.

use nplb::api::Ipv4Addr;
use nplb::api::MacAddr;
use nplb::api::Protocol;
use nplb::engine::CtxBuff;
use nplb::engine::checksum::ulp_csum_v4;
use nplb::engine::ether::EtherHdrRaw;
use nplb::engine::ether::EtherType;
use nplb::engine::ip4::DEF_TTL;
use nplb::engine::ip4::IPV4_VER_IHL;
use nplb::engine::ip4::Ipv4HdrRaw;
use nplb::engine::packet::WriteError;
use nplb::engine::packet::hdr_at_mut;
use nplb::engine::tcp::TCP_DOFF_NO_OPTS;
use nplb::engine::tcp::TcpHdrRaw;
use nplb::engine::udp::UdpHdrRaw;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// The most layers a single frame may be built from.
pub const MAX_LAYERS: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Layer {
    Ether(usize),
    Ipv4(usize),
    Tcp(usize),
    Udp(usize),
    Data(usize),
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BuildError {
    #[error("no room for {layer}: {err}")]
    NoRoom { layer: &'static str, err: WriteError },

    #[error("more than {MAX_LAYERS} layers")]
    TooManyLayers,

    #[error("{layer} pushed without an IPv4 header before it")]
    MissingIpv4 { layer: &'static str },

    #[error("{len} byte {layer} does not fit its length field")]
    TooLong { layer: &'static str, len: usize },
}

pub struct PktGen {
    ctx: CtxBuff,
    layers: heapless::Vec<Layer, MAX_LAYERS>,
}

impl PktGen {
    /// Build into `ctx`, which should be empty.
    pub fn new(ctx: CtxBuff) -> Self {
        Self { ctx, layers: heapless::Vec::new() }
    }

    fn push<T>(
        &mut self,
        layer: &'static str,
        mk: fn(usize) -> Layer,
    ) -> Result<&mut T, BuildError>
    where
        T: FromBytes + IntoBytes + KnownLayout + Unaligned,
    {
        let off = self.ctx.len();
        self.layers.push(mk(off)).map_err(|_| BuildError::TooManyLayers)?;
        self.ctx
            .append(size_of::<T>())
            .map_err(|err| BuildError::NoRoom { layer, err })?;
        // The bytes were just appended, so the view always fits.
        let len = self.ctx.len();
        let bytes = &mut self.ctx.bytes_mut()[off..len];
        let (hdr, _) = T::mut_from_prefix(bytes).map_err(|_| {
            BuildError::NoRoom {
                layer,
                err: WriteError::OutOfRange { off, len },
            }
        })?;
        Ok(hdr)
    }

    pub fn push_ethhdr(
        &mut self,
        src: MacAddr,
        dst: MacAddr,
    ) -> Result<&mut EtherHdrRaw, BuildError> {
        let eth = self.push::<EtherHdrRaw>("Ethernet", Layer::Ether)?;
        eth.src = src.bytes();
        eth.dst = dst.bytes();
        eth.set_ether_type(EtherType::Ipv4);
        Ok(eth)
    }

    pub fn push_ipv4hdr(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        proto: Protocol,
    ) -> Result<&mut Ipv4HdrRaw, BuildError> {
        let ip = self.push::<Ipv4HdrRaw>("IPv4", Layer::Ipv4)?;
        ip.ver_hdr_len = IPV4_VER_IHL;
        ip.ttl = DEF_TTL;
        ip.proto = u8::from(proto);
        ip.src = src.bytes();
        ip.dst = dst.bytes();
        Ok(ip)
    }

    pub fn push_tcphdr(
        &mut self,
        src_port: u16,
        dst_port: u16,
    ) -> Result<&mut TcpHdrRaw, BuildError> {
        let tcp = self.push::<TcpHdrRaw>("TCP", Layer::Tcp)?;
        tcp.src_port.set(src_port);
        tcp.dst_port.set(dst_port);
        Ok(tcp)
    }

    pub fn push_udphdr(
        &mut self,
        src_port: u16,
        dst_port: u16,
    ) -> Result<&mut UdpHdrRaw, BuildError> {
        let udp = self.push::<UdpHdrRaw>("UDP", Layer::Udp)?;
        udp.src_port.set(src_port);
        udp.dst_port.set(dst_port);
        Ok(udp)
    }

    /// Push Ethernet, IPv4 and TCP headers.
    pub fn push_ipv4_tcp_packet(
        &mut self,
        src_mac: MacAddr,
        dst_mac: MacAddr,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> Result<&mut TcpHdrRaw, BuildError> {
        self.push_ethhdr(src_mac, dst_mac)?;
        self.push_ipv4hdr(src_ip, dst_ip, Protocol::TCP)?;
        self.push_tcphdr(src_port, dst_port)
    }

    /// Push Ethernet, IPv4 and UDP headers.
    pub fn push_ipv4_udp_packet(
        &mut self,
        src_mac: MacAddr,
        dst_mac: MacAddr,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> Result<&mut UdpHdrRaw, BuildError> {
        self.push_ethhdr(src_mac, dst_mac)?;
        self.push_ipv4hdr(src_ip, dst_ip, Protocol::UDP)?;
        self.push_udphdr(src_port, dst_port)
    }

    /// Append `data` as the payload.
    pub fn push_data(&mut self, data: &[u8]) -> Result<&mut [u8], BuildError> {
        let off = self.ctx.len();
        self.layers
            .push(Layer::Data(off))
            .map_err(|_| BuildError::TooManyLayers)?;
        let buf = self
            .ctx
            .append(data.len())
            .map_err(|err| BuildError::NoRoom { layer: "payload", err })?;
        buf.copy_from_slice(data);
        Ok(buf)
    }

    /// Fill in every length and checksum and return the frame.
    pub fn finish(mut self) -> Result<CtxBuff, BuildError> {
        let total = self.ctx.len();
        let mut ip_off = None;

        // L4 checksums cover the pseudo-header, so IPv4 addressing
        // has to be known before they can be computed.
        for layer in self.layers.iter().copied() {
            match layer {
                Layer::Ipv4(off) => {
                    let len = total_len("IPv4", total - off)?;
                    let ip = ip_mut(&mut self.ctx, off)?;
                    ip.total_len.set(len);
                    ip_off = Some(off);
                }

                Layer::Tcp(off) => {
                    let ip = ip_off
                        .ok_or(BuildError::MissingIpv4 { layer: "TCP" })?;
                    let (src, dst) = addrs(&mut self.ctx, ip)?;
                    let bytes = self.ctx.bytes_mut();
                    let tcp = hdr_at_mut::<TcpHdrRaw>(bytes, off)
                        .map_err(|_| missing("TCP", off, total))?;
                    if tcp.hdr_len() == 0 {
                        tcp.set_doff(TCP_DOFF_NO_OPTS);
                    }
                    tcp.csum = [0; 2];
                    let csum =
                        ulp_csum_v4(src, dst, Protocol::TCP, &bytes[off..]);
                    let tcp = hdr_at_mut::<TcpHdrRaw>(bytes, off)
                        .map_err(|_| missing("TCP", off, total))?;
                    tcp.csum = csum.bytes();
                }

                Layer::Udp(off) => {
                    let ip = ip_off
                        .ok_or(BuildError::MissingIpv4 { layer: "UDP" })?;
                    let len = total_len("UDP", total - off)?;
                    let (src, dst) = addrs(&mut self.ctx, ip)?;
                    let bytes = self.ctx.bytes_mut();
                    let udp = hdr_at_mut::<UdpHdrRaw>(bytes, off)
                        .map_err(|_| missing("UDP", off, total))?;
                    udp.len.set(len);
                    udp.csum = [0; 2];
                    let mut csum =
                        ulp_csum_v4(src, dst, Protocol::UDP, &bytes[off..])
                            .bytes();
                    if csum == [0; 2] {
                        csum = [0xFF; 2];
                    }
                    let udp = hdr_at_mut::<UdpHdrRaw>(bytes, off)
                        .map_err(|_| missing("UDP", off, total))?;
                    udp.csum = csum;
                }

                Layer::Ether(_) | Layer::Data(_) => {}
            }
        }

        if let Some(off) = ip_off {
            ip_mut(&mut self.ctx, off)?.compute_csum();
        }

        Ok(self.ctx)
    }
}

fn missing(layer: &'static str, off: usize, len: usize) -> BuildError {
    BuildError::NoRoom { layer, err: WriteError::OutOfRange { off, len } }
}

fn total_len(layer: &'static str, len: usize) -> Result<u16, BuildError> {
    u16::try_from(len).map_err(|_| BuildError::TooLong { layer, len })
}

fn ip_mut(
    ctx: &mut CtxBuff,
    off: usize,
) -> Result<&mut Ipv4HdrRaw, BuildError> {
    let len = ctx.len();
    ctx.hdr_mut::<Ipv4HdrRaw>(off).map_err(|_| missing("IPv4", off, len))
}

fn addrs(
    ctx: &mut CtxBuff,
    off: usize,
) -> Result<(Ipv4Addr, Ipv4Addr), BuildError> {
    let ip = ip_mut(ctx, off)?;
    Ok((ip.src(), ip.dst()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::*;
    use nplb::engine::packet::DEFAULT_CAPACITY;
    use smoltcp::wire::Ipv4Packet;
    use smoltcp::wire::TcpPacket;
    use smoltcp::wire::UdpPacket;

    #[test]
    fn tcp_syn_is_wire_valid() {
        let mut pkt = PktGen::new(CtxBuff::new(1));
        let tcp = pkt
            .push_ipv4_tcp_packet(
                CLIENT_MAC,
                LB_MAC,
                CLIENT_IP,
                FRONTEND_IP,
                CLIENT_PORT,
                FRONTEND_PORT,
            )
            .unwrap();
        tcp.seq.set(SYN_SEQ);
        tcp.set_flags(TcpFlags::SYN);
        tcp.win.set(65535);
        pkt.push_data(DEFAULT_DATA).unwrap();
        let ctx = pkt.finish().unwrap();

        assert_eq!(ctx.len(), 74);
        let ip = Ipv4Packet::new_checked(&ctx.bytes()[14..]).unwrap();
        assert!(ip.verify_checksum());
        assert_eq!(ip.total_len(), 60);
        assert_eq!(ip.hop_limit(), 64);
        assert_eq!(ip.checksum(), 0x4BA9);

        let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
        assert!(tcp.verify_checksum(
            &ip.src_addr().into(),
            &ip.dst_addr().into()
        ));
        assert_eq!(tcp.header_len(), 20);
        assert!(tcp.syn());
        assert_eq!(tcp.checksum(), 0xAADD);
        assert_eq!(tcp.payload(), DEFAULT_DATA);
    }

    #[test]
    fn udp_is_wire_valid() {
        let mut pkt = PktGen::new(CtxBuff::new(1));
        pkt.push_ipv4_udp_packet(
            CLIENT_MAC,
            LB_MAC,
            CLIENT_IP,
            FRONTEND_IP,
            CLIENT_PORT,
            FRONTEND_PORT,
        )
        .unwrap();
        pkt.push_data(DEFAULT_DATA).unwrap();
        let ctx = pkt.finish().unwrap();

        let ip = Ipv4Packet::new_checked(&ctx.bytes()[14..]).unwrap();
        assert!(ip.verify_checksum());
        let udp = UdpPacket::new_checked(ip.payload()).unwrap();
        assert_eq!(usize::from(udp.len()), 8 + DEFAULT_DATA.len());
        assert!(udp.verify_checksum(
            &ip.src_addr().into(),
            &ip.dst_addr().into()
        ));
    }

    #[test]
    fn capacity_is_a_build_error() {
        let mut pkt = PktGen::new(CtxBuff::with_capacity(40, 1));
        let res = pkt.push_ipv4_tcp_packet(
            CLIENT_MAC,
            LB_MAC,
            CLIENT_IP,
            FRONTEND_IP,
            CLIENT_PORT,
            FRONTEND_PORT,
        );
        assert_eq!(
            res.err(),
            Some(BuildError::NoRoom {
                layer: "TCP",
                err: WriteError::NotEnoughBytes { available: 6, needed: 20 },
            })
        );

        let mut pkt = PktGen::new(CtxBuff::new(1));
        let big = vec![0u8; DEFAULT_CAPACITY + 1];
        assert!(matches!(
            pkt.push_data(&big),
            Err(BuildError::NoRoom { layer: "payload", .. })
        ));
    }

    #[test]
    fn l4_needs_ipv4() {
        let mut pkt = PktGen::new(CtxBuff::new(1));
        pkt.push_ethhdr(CLIENT_MAC, LB_MAC).unwrap();
        pkt.push_tcphdr(CLIENT_PORT, FRONTEND_PORT).unwrap();
        assert_eq!(
            pkt.finish().err(),
            Some(BuildError::MissingIpv4 { layer: "TCP" })
        );
    }
}
