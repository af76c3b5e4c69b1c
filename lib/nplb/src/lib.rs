// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The nodeport datapath.
//!
//! This crate models the node-facing half of an L4 load balancer: a
//! pair of programs chained by tail calls which see every packet
//! arriving from, and leaving towards, the network. The interesting
//! part is what happens when a packet targets a service that has no
//! usable backend: rather than dropping it on the floor, the ingress
//! program rewrites it in place into an ICMP Port Unreachable and
//! redirects it back to the sender.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

pub use nplb_api as api;

pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
pub mod provider;

use alloc::boxed::Box;
use provider::LogProvider;

/// The execution context handed to every program.
///
/// This carries the platform services the datapath relies on; see
/// [`provider`].
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}
