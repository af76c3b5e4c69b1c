// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the nodeport datapath, its control plane
//! fixtures, and the tooling that drives them.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod cmd;
pub mod ip;
pub mod mac;

pub use cmd::*;
pub use ip::*;
pub use mac::*;

/// The version of the control-plane request types. Bump this any
/// time a request or configuration type changes shape.
pub const API_VERSION: u64 = 1;
