// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for building packet capture files.

use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;

fn ser_err<E: std::fmt::Debug>(e: E) -> io::Error {
    io::Error::other(format!("pcap serialize: {e:?}"))
}

/// Build a packet capture file from a series of frames.
pub struct PcapBuilder {
    file: File,
}

impl PcapBuilder {
    /// Create a new pcap builder, writing all captures to `path`.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut file = File::create(path)?;

        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 1514,
            network: Linktype::ETHERNET,
        };

        file.write_all(&hdr.to_vec().map_err(ser_err)?)?;
        Ok(Self { file })
    }

    /// Add a frame to the capture.
    pub fn add_pkt(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut block = LegacyPcapBlock {
            ts_sec: 7777,
            ts_usec: 7777,
            caplen: frame.len() as u32,
            origlen: frame.len() as u32,
            data: frame,
        };

        self.file.write_all(&block.to_vec().map_err(ser_err)?)
    }
}

/// Read back every frame of a capture.
pub fn read_frames(bytes: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let (mut rest, _hdr) = pcap::parse_pcap_header(bytes).map_err(ser_err)?;
    let mut frames = Vec::new();
    while !rest.is_empty() {
        let (next, block) = pcap::parse_pcap_frame(rest).map_err(ser_err)?;
        frames.push(block.data.to_vec());
        rest = next;
    }
    Ok(frames)
}
