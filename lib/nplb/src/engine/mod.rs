// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The nodeport engine.

pub mod checksum;
pub mod datapath;
pub mod ether;
pub mod icmp;
pub mod ip4;
pub mod maps;
pub mod nodeport;
pub mod packet;
pub mod tail_call;
pub mod tcp;
pub mod udp;

pub use datapath::Datapath;
pub use datapath::Verdict;
pub use maps::Maps;
pub use packet::CtxBuff;
pub use tail_call::TailCallTable;
