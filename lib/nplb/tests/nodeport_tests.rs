// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests.
//!
//! These drive the nodeport programs end to end: a frame is built
//! with [`PktGen`], the tables are seeded, the frame is dispatched
//! through the tail-call table, and the resulting bytes are picked
//! apart, both by our own validator and by smoltcp.

use common::case::CheckCtx;
use common::case::SetupCtx;
use common::case::TailCall;
use common::case::print_results_into;
use common::pcap::PcapBuilder;
use common::pcap::read_frames;
use common::scenarios;
use common::validate::IcmpReplyExpect;
use common::validate::validate_icmp_reply;
use common::*;
use nplb::engine::datapath::ProcessError;
use nplb::engine::ether::ETHER_HDR_SZ;
use nplb::engine::ether::EtherHdrRaw;
use nplb::engine::ip4::IPV4_HDR_SZ;
use nplb::engine::ip4::Ipv4HdrRaw;
use nplb::engine::packet::ReadErr;
use nplb::engine::tail_call::DispatchError;
use nplb::engine::tcp::TCP_HDR_SZ;
use nplb_test_utils as common;
use smoltcp::wire::Icmpv4DstUnreachable;
use smoltcp::wire::Icmpv4Message;
use smoltcp::wire::Icmpv4Packet;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::IpProtocol;

fn syn(src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) -> CtxBuff {
    let mut pkt = PktGen::new(CtxBuff::new(1));
    let tcp = pkt
        .push_ipv4_tcp_packet(
            CLIENT_MAC, LB_MAC, CLIENT_IP, dst_ip, src_port, dst_port,
        )
        .unwrap();
    tcp.seq.set(SYN_SEQ);
    tcp.set_flags(TcpFlags::SYN);
    tcp.win.set(65535);
    pkt.push_data(DEFAULT_DATA).unwrap();
    pkt.finish().unwrap()
}

fn empty_service(maps: &mut Maps, ip: Ipv4Addr, port: u16, revnat_id: u16) {
    maps.add_service(&AddServiceReq {
        frontend_ip: ip,
        frontend_port: port,
        protocol: Protocol::TCP,
        backend_count: 0,
        revnat_id,
    });
}

// Scenario A: the SYN is answered with a Port Unreachable.
#[test]
fn no_backend_redirects_port_unreachable() {
    let mut runner = Runner::new(println_ectx());
    let res = runner.run_case(&scenarios::NODEPORT_NO_BACKEND);
    assert_eq!(res.result, Ok(()));
    assert_eq!(res.verdict, Some(Verdict::Redirect { ifindex: 1 }));
    assert_eq!(&res.trail.unwrap()[..], &[FROM_NETDEV, IPV4_NO_SERVICE]);
}

// Scenario B: the reply passes egress as it is.
#[test]
fn no_backend_reply_passes_egress() {
    let mut runner = Runner::new(println_ectx());
    let res = runner.run_case(&scenarios::NODEPORT_NO_BACKEND2_REPLY);
    assert_eq!(res.result, Ok(()));
    assert_eq!(res.verdict, Some(Verdict::Ok));
    assert_eq!(&res.trail.unwrap()[..], &[TO_NETDEV]);
}

#[test]
fn all_scenarios_pass() {
    let mut runner = Runner::new(println_ectx());
    let results = runner.run_all(&scenarios::ALL);
    let mut out = Vec::new();
    print_results_into(&mut out, &results).unwrap();
    println!("{}", String::from_utf8_lossy(&out));

    for res in &results {
        assert!(res.passed(), "{}: {:?}", res.name, res.result);
    }
    assert_eq!(
        scenarios::find("tc_nodeport_no_backend").map(|c| c.name),
        Some("tc_nodeport_no_backend")
    );
    assert!(scenarios::find("tc_bogus").is_none());
}

// Any empty service is answered, with the frontend as the source.
#[test]
fn every_empty_service_is_answered() {
    let cfg = NodeportCfg::default();
    let ectx = println_ectx();
    let tbl = TailCallTable::nodeport();

    let frontends = [
        (FRONTEND_IP, 80),
        (FRONTEND_IP, 443),
        (Ipv4Addr::from_const([10, 0, 0, 1]), 8443),
    ];

    let mut maps = Maps::new();
    for (i, (ip, port)) in frontends.iter().enumerate() {
        empty_service(&mut maps, *ip, *port, i as u16 + 1);
    }
    let dp = Datapath::new(&cfg, &maps, &ectx);

    for (ip, port) in frontends {
        for src_port in [1, 111, 40000] {
            let mut ctx = syn(src_port, ip, port);
            let out = tbl.dispatch(&mut ctx, FROM_NETDEV, &dp).unwrap();
            assert_eq!(out.verdict, Verdict::Redirect { ifindex: 1 });

            let ip4 = Ipv4Packet::new_checked(&ctx.bytes()[ETHER_HDR_SZ..])
                .unwrap();
            assert_eq!(ip4.next_header(), IpProtocol::Icmp);
            assert_eq!(Ipv4Addr::from(ip4.src_addr()), ip);
            assert_eq!(Ipv4Addr::from(ip4.dst_addr()), CLIENT_IP);
        }
    }
}

// Addresses are swapped, TTL reset and checksums computed fresh.
#[test]
fn reply_swaps_and_recomputes() {
    let cfg = NodeportCfg::default();
    let ectx = println_ectx();
    let tbl = TailCallTable::nodeport();
    let mut maps = Maps::new();
    seed_no_backend(&mut maps, Protocol::TCP);
    let dp = Datapath::new(&cfg, &maps, &ectx);

    let mut ctx = syn(CLIENT_PORT, FRONTEND_IP, FRONTEND_PORT);
    // Make the request's TTL and checksum distinct from anything the
    // reply should carry.
    {
        let ip = ctx.hdr_mut::<Ipv4HdrRaw>(ETHER_HDR_SZ).unwrap();
        ip.ttl = 3;
        ip.compute_csum();
    }
    let req = ctx.clone();
    let req_eth = *req.hdr::<EtherHdrRaw>(0).unwrap();
    let req_ip = *req.hdr::<Ipv4HdrRaw>(ETHER_HDR_SZ).unwrap();

    tbl.dispatch(&mut ctx, FROM_NETDEV, &dp).unwrap();
    let eth = ctx.hdr::<EtherHdrRaw>(0).unwrap();
    assert_eq!(eth.src, req_eth.dst);
    assert_eq!(eth.dst, req_eth.src);

    let ip = ctx.hdr::<Ipv4HdrRaw>(ETHER_HDR_SZ).unwrap();
    assert_eq!(ip.src, req_ip.dst);
    assert_eq!(ip.dst, req_ip.src);
    assert_eq!(ip.ttl, 64);
    assert_ne!(ip.csum, req_ip.csum);
    assert!(ip.csum_ok());

    // The embedded sample is the original request, TTL and all.
    let sample = &ctx.bytes()[ETHER_HDR_SZ + IPV4_HDR_SZ + 8..];
    let req_l3 = &req.bytes()[ETHER_HDR_SZ..];
    assert_eq!(&sample[..IPV4_HDR_SZ], &req_l3[..IPV4_HDR_SZ]);
}

// Egress leaves the generated reply byte for byte as it was.
#[test]
fn egress_is_transparent_to_reply() {
    let cfg = NodeportCfg::default();
    let ectx = println_ectx();
    let tbl = TailCallTable::nodeport();
    let mut maps = Maps::new();
    seed_no_backend(&mut maps, Protocol::TCP);
    // A bound backend with a revnat entry must not match ICMP.
    bind_backend(&mut maps, Protocol::TCP).unwrap();
    maps.add_service(&AddServiceReq {
        frontend_ip: FRONTEND_IP,
        frontend_port: 443,
        protocol: Protocol::TCP,
        backend_count: 0,
        revnat_id: 2,
    });
    let dp = Datapath::new(&cfg, &maps, &ectx);

    let mut ctx = syn(CLIENT_PORT, FRONTEND_IP, 443);
    assert_eq!(
        tbl.dispatch(&mut ctx, FROM_NETDEV, &dp).unwrap().verdict,
        Verdict::Redirect { ifindex: 1 }
    );
    let reply = ctx.clone();

    let out = tbl.dispatch(&mut ctx, TO_NETDEV, &dp).unwrap();
    assert_eq!(out.verdict, Verdict::Ok);
    assert_eq!(ctx.bytes(), reply.bytes());
}

// Every truncation short of a full TCP header is a bounds error.
#[test]
fn truncation_is_fatal() {
    let cfg = NodeportCfg::default();
    let ectx = println_ectx();
    let tbl = TailCallTable::nodeport();
    let mut maps = Maps::new();
    seed_no_backend(&mut maps, Protocol::TCP);
    let dp = Datapath::new(&cfg, &maps, &ectx);

    let full = syn(CLIENT_PORT, FRONTEND_IP, FRONTEND_PORT);
    for len in 0..ETHER_HDR_SZ + IPV4_HDR_SZ + TCP_HDR_SZ {
        let mut ctx = full.clone();
        ctx.resize(len).unwrap();

        let expected_hdr = if len < ETHER_HDR_SZ {
            "Ethernet"
        } else if len < ETHER_HDR_SZ + IPV4_HDR_SZ {
            "IPv4"
        } else {
            "TCP"
        };

        match tbl.dispatch(&mut ctx, FROM_NETDEV, &dp) {
            Err(DispatchError::Process {
                prog: "from-netdev",
                err: ProcessError::OutOfBounds { hdr, err },
            }) => {
                assert_eq!(hdr, expected_hdr, "len {len}");
                assert!(
                    matches!(
                        err,
                        ReadErr::EndOfPacket | ReadErr::NotEnoughBytes
                    ),
                    "len {len}: {err}"
                );
            }

            res => panic!("len {len}: expected bounds error, got {res:?}"),
        }

        // Nothing was written.
        assert_eq!(ctx.bytes(), &full.bytes()[..len]);
    }
}

// Egress holds frames to the same bounds as ingress, whether they
// come from a local socket or from the no-service reply.
#[test]
fn egress_truncation_is_fatal() {
    let cfg = NodeportCfg::default();
    let ectx = println_ectx();
    let tbl = TailCallTable::nodeport();
    let mut maps = Maps::new();
    seed_no_backend(&mut maps, Protocol::TCP);
    let dp = Datapath::new(&cfg, &maps, &ectx);

    let req = syn(CLIENT_PORT, FRONTEND_IP, FRONTEND_PORT);
    let mut reply = req.clone();
    tbl.dispatch(&mut reply, FROM_NETDEV, &dp).unwrap();

    let cases = [
        (&req, ETHER_HDR_SZ + IPV4_HDR_SZ + TCP_HDR_SZ),
        (&reply, ETHER_HDR_SZ + IPV4_HDR_SZ),
    ];
    for (full, end) in cases {
        for len in 0..end {
            let mut ctx = full.clone();
            ctx.resize(len).unwrap();

            let expected_hdr = if len < ETHER_HDR_SZ {
                "Ethernet"
            } else if len < ETHER_HDR_SZ + IPV4_HDR_SZ {
                "IPv4"
            } else {
                "TCP"
            };

            match tbl.dispatch(&mut ctx, TO_NETDEV, &dp) {
                Err(DispatchError::Process {
                    prog: "to-netdev",
                    err: ProcessError::OutOfBounds { hdr, .. },
                }) => assert_eq!(hdr, expected_hdr, "len {len}"),

                res => {
                    panic!("len {len}: expected bounds error, got {res:?}")
                }
            }

            assert_eq!(ctx.bytes(), &full.bytes()[..len]);
        }
    }
}

// smoltcp agrees with the bytes we produce.
#[test]
fn reply_parses_with_smoltcp() {
    let mut runner = Runner::new(println_ectx());
    let mut ctx = syn(CLIENT_PORT, FRONTEND_IP, FRONTEND_PORT);
    let cfg = NodeportCfg::default();
    let ectx = println_ectx();
    let tbl = TailCallTable::nodeport();
    let mut maps = Maps::new();
    seed_no_backend(&mut maps, Protocol::TCP);
    let dp = Datapath::new(&cfg, &maps, &ectx);
    tbl.dispatch(&mut ctx, FROM_NETDEV, &dp).unwrap();

    let ip = Ipv4Packet::new_checked(&ctx.bytes()[ETHER_HDR_SZ..]).unwrap();
    assert!(ip.verify_checksum());
    assert_eq!(ip.checksum(), 0x4b8e);
    assert_eq!(ip.hop_limit(), 64);
    assert_eq!(ip.total_len(), 92);

    let icmp = Icmpv4Packet::new_checked(ip.payload()).unwrap();
    assert!(icmp.verify_checksum());
    assert_eq!(icmp.checksum(), 0x2c3f);
    assert_eq!(icmp.msg_type(), Icmpv4Message::DstUnreachable);
    assert_eq!(
        icmp.msg_code(),
        u8::from(Icmpv4DstUnreachable::PortUnreachable)
    );

    let inner = Ipv4Packet::new_unchecked(icmp.data());
    assert_eq!(Ipv4Addr::from(inner.src_addr()), CLIENT_IP);
    assert_eq!(Ipv4Addr::from(inner.dst_addr()), FRONTEND_IP);

    // And the canonical case agrees too.
    assert!(runner.run_case(&scenarios::NODEPORT_NO_BACKEND).passed());
}

fn unregistered_setup(
    sctx: &mut SetupCtx<'_>,
) -> Result<TailCall, TestError> {
    seed_no_backend(sctx.maps, Protocol::TCP);
    Ok(sctx.tail_call(5))
}

fn never_check(_: &CheckCtx<'_>) -> Result<(), TestError> {
    panic!("check must not run");
}

fn headers_only_pktgen(pkt: &mut PktGen) -> Result<(), BuildError> {
    pkt.push_ipv4_tcp_packet(
        CLIENT_MAC,
        LB_MAC,
        CLIENT_IP,
        FRONTEND_IP,
        CLIENT_PORT,
        FRONTEND_PORT,
    )?;
    Ok(())
}

fn oversized_pktgen(pkt: &mut PktGen) -> Result<(), BuildError> {
    pkt.push_ipv4_tcp_packet(
        CLIENT_MAC,
        LB_MAC,
        CLIENT_IP,
        FRONTEND_IP,
        CLIENT_PORT,
        FRONTEND_PORT,
    )?;
    pkt.push_data(&[0u8; 1500])?;
    Ok(())
}

fn truncated_pktgen(pkt: &mut PktGen) -> Result<(), BuildError> {
    pkt.push_ethhdr(CLIENT_MAC, LB_MAC)?;
    pkt.push_data(&[0x45, 0x00])?;
    Ok(())
}

fn no_backend_setup(
    sctx: &mut SetupCtx<'_>,
) -> Result<TailCall, TestError> {
    seed_no_backend(sctx.maps, Protocol::TCP);
    Ok(sctx.tail_call(FROM_NETDEV))
}

#[test]
fn harness_failures_are_reported() {
    let fell_through = TestCase {
        name: "fell_through",
        pktgen: headers_only_pktgen,
        setup: unregistered_setup,
        check: never_check,
    };

    let oversized = TestCase {
        name: "oversized",
        pktgen: oversized_pktgen,
        setup: unregistered_setup,
        check: never_check,
    };

    let truncated = TestCase {
        name: "truncated",
        pktgen: truncated_pktgen,
        setup: no_backend_setup,
        check: never_check,
    };

    let mut runner = Runner::new(println_ectx());
    let results = runner.run_all(&[
        fell_through,
        oversized,
        truncated,
        scenarios::NODEPORT_NO_BACKEND,
    ]);

    assert_eq!(results[0].result, Err(TestError::FellThrough { idx: 5 }));
    assert!(matches!(results[1].result, Err(TestError::Build(_))));
    assert_eq!(
        results[2].result,
        Err(TestError::Process(ProcessError::OutOfBounds {
            hdr: "IPv4",
            err: ReadErr::NotEnoughBytes,
        }))
    );
    assert!(results[2].verdict.is_none());

    // A failing case doesn't stop the ones after it.
    assert!(results[3].passed());
}

#[test]
fn validator_catches_corruption() {
    let mut ctx = syn(CLIENT_PORT, FRONTEND_IP, FRONTEND_PORT);
    let cfg = NodeportCfg::default();
    let ectx = println_ectx();
    let tbl = TailCallTable::nodeport();
    let mut maps = Maps::new();
    seed_no_backend(&mut maps, Protocol::TCP);
    let dp = Datapath::new(&cfg, &maps, &ectx);
    let out = tbl.dispatch(&mut ctx, FROM_NETDEV, &dp).unwrap();

    let exp = IcmpReplyExpect::no_backend_tcp(CTX_ACT_REDIRECT);
    let buf = ctx.to_status_frame(out.verdict.code());
    assert_eq!(validate_icmp_reply(&buf, &exp), Ok(()));

    // Flip a sample byte: the stored checksum no longer verifies.
    let mut bad = buf.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    assert!(matches!(
        validate_icmp_reply(&bad, &exp),
        Err(TestError::Mismatch { field: "icmp checksum verify", .. })
    ));

    // Chop the ICMP header.
    let short = &buf[..4 + ETHER_HDR_SZ + IPV4_HDR_SZ + 4];
    assert_eq!(
        validate_icmp_reply(short, &exp),
        Err(TestError::OutOfBounds { what: "l4" })
    );
}

#[test]
fn runner_writes_pcap() {
    let path = std::env::temp_dir()
        .join(format!("nplb-runner-{}.pcap", std::process::id()));
    let pcap = PcapBuilder::new(&path).unwrap();
    let mut runner = Runner::new(println_ectx()).with_pcap(pcap);
    let res = runner.run_case(&scenarios::NODEPORT_NO_BACKEND);
    assert!(res.passed());
    drop(runner);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    let frames = read_frames(&bytes).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].len(), 74);
    assert_eq!(frames[1].len(), 106);
}
