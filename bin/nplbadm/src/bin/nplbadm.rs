// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

use nplb::api::API_VERSION;
use nplb::api::Protocol;
use nplb::api::SocketAddrV4;
use nplb::print::print_dispatch_into;
use nplb::print::print_maps;
use nplb_test_utils::Runner;
use nplb_test_utils::case::print_results_into;
use nplb_test_utils::pcap::PcapBuilder;
use nplb_test_utils::scenarios;

/// Drive the nodeport load-balancer datapath
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Show datapath notes as well as warnings and errors.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the built-in test cases.
    List,

    /// Run the built-in test cases.
    Run {
        /// Only run the case with this name.
        #[arg(long)]
        case: Option<String>,

        /// Write every generated and final frame to this pcap file.
        #[arg(long)]
        pcap: Option<PathBuf>,
    },

    /// Send a single request through a datapath loaded from a fixture.
    Probe {
        /// The fixture file (TOML).
        #[arg(long)]
        fixture: PathBuf,

        /// The client, as IP:PORT.
        #[arg(long)]
        src: SocketAddrV4,

        /// The service frontend, as IP:PORT.
        #[arg(long)]
        dst: SocketAddrV4,

        /// Send UDP instead of a TCP SYN.
        #[arg(long)]
        udp: bool,

        /// Write the request and the resulting frame to this pcap file.
        #[arg(long)]
        pcap: Option<PathBuf>,
    },

    /// Dump the tables a fixture produces.
    Dump {
        /// The fixture file (TOML).
        #[arg(long)]
        fixture: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log = nplbadm::logger(cli.verbose);

    match cli.cmd {
        Command::List => {
            for case in scenarios::ALL {
                println!("{}", case.name);
            }
        }

        Command::Run { case, pcap } => {
            let cases = match case {
                Some(name) => match scenarios::find(&name) {
                    Some(case) => vec![case],
                    None => anyhow::bail!("no such case: {name}"),
                },
                None => scenarios::ALL.to_vec(),
            };

            let mut runner = Runner::new(nplbadm::ectx(&log));
            if let Some(path) = pcap {
                runner = runner.with_pcap(PcapBuilder::new(path)?);
            }

            let results = runner.run_all(&cases);
            print_results_into(&mut io::stdout(), &results)?;

            let failed = results.iter().filter(|r| !r.passed()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} cases failed", results.len());
            }
        }

        Command::Probe { fixture, src, dst, udp, pcap } => {
            let fx = nplbadm::load_fixture(&fixture)?;
            let proto = if udp { Protocol::UDP } else { Protocol::TCP };
            let ectx = nplbadm::ectx(&log);
            let probe = nplbadm::probe(&fx, src, dst, proto, &ectx)?;

            println!("{proto} {src} -> {dst} (API {API_VERSION})");
            println!("\nfrom-netdev");
            print_dispatch_into(&mut io::stdout(), &probe.ingress)?;
            if let Some(egress) = &probe.egress {
                println!("\nto-netdev");
                print_dispatch_into(&mut io::stdout(), egress)?;
            }

            if let Some(path) = pcap {
                let mut pcap = PcapBuilder::new(path)?;
                pcap.add_pkt(&probe.request)?;
                pcap.add_pkt(probe.result.bytes())?;
            }
        }

        Command::Dump { fixture } => {
            let fx = nplbadm::load_fixture(&fixture)?;
            print_maps(&nplbadm::build_maps(&fx)?)?;
        }
    }

    Ok(())
}
