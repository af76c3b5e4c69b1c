// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print datapath state in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both nplbadm and integration tests.

use crate::engine::Maps;
use crate::engine::tail_call::DispatchOutcome;
use crate::engine::tail_call::Stage;
use std::io::Write;
use tabwriter::TabWriter;

/// Print the contents of `maps`.
pub fn print_maps(maps: &Maps) -> std::io::Result<()> {
    print_maps_into(&mut std::io::stdout(), maps)
}

/// Print the contents of `maps`.
pub fn print_maps_into(
    writer: &mut impl Write,
    maps: &Maps,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Services")?;
    write_hr(&mut t)?;
    writeln!(t, "FRONTEND\tPROTO\tBACKENDS\tREVNAT\tSLOTS")?;
    for (key, svc) in maps.services() {
        let slots: Vec<String> = svc
            .bound_slots()
            .map(|(slot, id)| format!("{slot}={id}"))
            .collect();
        let slots = if slots.is_empty() {
            String::from("-")
        } else {
            slots.join(",")
        };
        writeln!(
            t,
            "{}:{}\t{}\t{}\t{}\t{}",
            key.frontend_ip,
            key.frontend_port,
            key.proto,
            svc.backend_count,
            svc.revnat_id,
            slots,
        )?;
    }
    t.flush()?;

    writeln!(t, "\nBackends")?;
    write_hr(&mut t)?;
    writeln!(t, "ID\tADDRESS\tPROTO\tKNOWN")?;
    for (id, be) in maps.backends() {
        let known = maps.lookup_identity(&be.ip).is_some();
        writeln!(t, "{id}\t{}:{}\t{}\t{known}", be.ip, be.port, be.proto)?;
    }
    t.flush()?;

    writeln!(t, "\nIdentities")?;
    write_hr(&mut t)?;
    writeln!(t, "IP\tSEC ID\tCLUSTER\tTUNNEL EP\tSPI")?;
    for (ip, id) in maps.identities() {
        writeln!(
            t,
            "{ip}\t{}\t{}\t{}\t{}",
            id.security_id, id.cluster_id, id.tunnel_endpoint, id.spi,
        )?;
    }
    t.flush()?;

    writeln!(t)?;
    t.flush()
}

/// Print the result of a dispatch: the programs it ran and the
/// verdict it reached.
pub fn print_dispatch_into(
    writer: &mut impl Write,
    out: &DispatchOutcome,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    let trail: Vec<String> = out
        .trail
        .iter()
        .map(|&idx| match Stage::from_index(idx) {
            Some(stage) => stage.to_string(),
            None => idx.to_string(),
        })
        .collect();
    writeln!(t, "TRAIL\tVERDICT\tCODE")?;
    writeln!(
        t,
        "{}\t{}\t{}",
        trail.join(" -> "),
        out.verdict,
        out.verdict.code(),
    )?;
    t.flush()
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::Verdict;
    use crate::engine::tail_call::FROM_NETDEV;
    use crate::engine::tail_call::IPV4_NO_SERVICE;
    use crate::engine::tail_call::Trail;
    use nplb_api::AddServiceReq;
    use nplb_api::Protocol;

    #[test]
    fn maps_table() {
        let mut maps = Maps::new();
        maps.add_service(&AddServiceReq {
            frontend_ip: "172.16.10.2".parse().unwrap(),
            frontend_port: 80,
            protocol: Protocol::TCP,
            backend_count: 0,
            revnat_id: 1,
        });

        let mut out = Vec::new();
        print_maps_into(&mut out, &maps).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("172.16.10.2:80"));
        assert!(out.contains("TCP"));
    }

    #[test]
    fn dispatch_trail_names_stages() {
        let mut trail = Trail::new();
        trail.push(FROM_NETDEV).unwrap();
        trail.push(IPV4_NO_SERVICE).unwrap();
        trail.push(5).unwrap();
        let res = DispatchOutcome {
            verdict: Verdict::Redirect { ifindex: 1 },
            trail,
        };

        let mut out = Vec::new();
        print_dispatch_into(&mut out, &res).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("from-netdev -> no-service-v4 -> 5"));
    }
}
