// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The load-balancer tables.
//!
//! [`Maps`] holds the service table, the backend table, the
//! reverse-NAT table and the identity cache. It is written by the
//! control plane (a test's setup phase) before any packet is
//! processed, and only read by the datapath programs afterwards. An
//! instance is owned by whoever drives the programs; there is no
//! global table.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use nplb_api::AddBackendReq;
use nplb_api::AddIdentityReq;
use nplb_api::AddServiceReq;
use nplb_api::FixtureCfg;
use nplb_api::Ipv4Addr;
use nplb_api::Protocol;

/// Key of the service table.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct ServiceKey {
    pub frontend_ip: Ipv4Addr,
    pub frontend_port: u16,
    pub proto: Protocol,
}

impl ServiceKey {
    pub fn new(
        frontend_ip: Ipv4Addr,
        frontend_port: u16,
        proto: Protocol,
    ) -> Self {
        Self { frontend_ip, frontend_port, proto }
    }
}

impl Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}/{}", self.frontend_ip, self.frontend_port, self.proto)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Service {
    pub backend_count: u16,
    pub revnat_id: u16,
    // Index `n` holds slot `n + 1`.
    slots: Vec<Option<u32>>,
}

impl Service {
    /// The backend id bound to the 1-based `slot`, if any.
    pub fn slot(&self, slot: u16) -> Option<u32> {
        let idx = usize::from(slot.checked_sub(1)?);
        self.slots.get(idx).copied().flatten()
    }

    /// Iterate the bound `(slot, backend_id)` pairs.
    pub fn bound_slots(&self) -> impl Iterator<Item = (u16, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.map(|id| (i as u16 + 1, id)))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backend {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub proto: Protocol,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RevNat {
    pub ip: Ipv4Addr,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Identity {
    pub cluster_id: u32,
    pub security_id: u32,
    pub tunnel_endpoint: u32,
    pub spi: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MapError {
    NoService { key: ServiceKey },
    SlotOutOfRange { key: ServiceKey, slot: u16, backend_count: u16 },
}

impl Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoService { key } => write!(f, "no service {key}"),
            Self::SlotOutOfRange { key, slot, backend_count } => write!(
                f,
                "slot {slot} out of range for service {key} \
                 with {backend_count} backends",
            ),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Maps {
    services: BTreeMap<ServiceKey, Service>,
    backends: BTreeMap<u32, Backend>,
    revnat: BTreeMap<u16, RevNat>,
    ipcache: BTreeMap<Ipv4Addr, Identity>,
}

impl Maps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a service.
    ///
    /// Replacing a service keeps the slot bindings which still fall
    /// within the new `backend_count`.
    pub fn add_service(&mut self, req: &AddServiceReq) {
        let key =
            ServiceKey::new(req.frontend_ip, req.frontend_port, req.protocol);
        let count = usize::from(req.backend_count);

        let svc = self.services.entry(key).or_insert_with(|| Service {
            backend_count: 0,
            revnat_id: 0,
            slots: Vec::new(),
        });
        svc.backend_count = req.backend_count;
        svc.revnat_id = req.revnat_id;
        svc.slots.resize(count, None);

        self.revnat.insert(
            req.revnat_id,
            RevNat { ip: req.frontend_ip, port: req.frontend_port },
        );
    }

    /// Register a backend and bind it to a slot of its service.
    pub fn add_backend(&mut self, req: &AddBackendReq) -> Result<(), MapError> {
        let key =
            ServiceKey::new(req.frontend_ip, req.frontend_port, req.protocol);
        let svc = self
            .services
            .get_mut(&key)
            .ok_or(MapError::NoService { key })?;

        if req.slot == 0 || req.slot > svc.backend_count {
            return Err(MapError::SlotOutOfRange {
                key,
                slot: req.slot,
                backend_count: svc.backend_count,
            });
        }

        svc.slots[usize::from(req.slot - 1)] = Some(req.backend_id);
        self.backends.insert(
            req.backend_id,
            Backend {
                ip: req.backend_ip,
                port: req.backend_port,
                proto: req.protocol,
            },
        );
        Ok(())
    }

    /// Insert or replace an identity-cache entry.
    pub fn add_identity(&mut self, req: &AddIdentityReq) {
        self.ipcache.insert(
            req.ip,
            Identity {
                cluster_id: req.cluster_id,
                security_id: req.security_id,
                tunnel_endpoint: req.tunnel_endpoint,
                spi: req.spi,
            },
        );
    }

    /// Load every entry of `fixture`, services first.
    pub fn apply_fixture(
        &mut self,
        fixture: &FixtureCfg,
    ) -> Result<(), MapError> {
        for svc in &fixture.services {
            self.add_service(svc);
        }

        for be in &fixture.backends {
            self.add_backend(be)?;
        }

        for id in &fixture.identities {
            self.add_identity(id);
        }

        Ok(())
    }

    pub fn lookup_service(&self, key: &ServiceKey) -> Option<&Service> {
        self.services.get(key)
    }

    pub fn lookup_revnat(&self, id: u16) -> Option<&RevNat> {
        self.revnat.get(&id)
    }

    pub fn lookup_identity(&self, ip: &Ipv4Addr) -> Option<&Identity> {
        self.ipcache.get(ip)
    }

    /// Pick the backend for a flow with source port `src_port`.
    ///
    /// Returns `None` unless the chosen slot is bound to a known
    /// backend whose address is in the identity cache.
    pub fn select_backend(
        &self,
        svc: &Service,
        src_port: u16,
    ) -> Option<(u32, &Backend)> {
        if svc.backend_count == 0 {
            return None;
        }

        let slot = (src_port % svc.backend_count) + 1;
        let id = svc.slot(slot)?;
        let be = self.backends.get(&id)?;
        self.ipcache.get(&be.ip)?;
        Some((id, be))
    }

    /// Find the frontend to translate return traffic from a backend
    /// back to.
    pub fn revnat_for_backend(
        &self,
        ip: Ipv4Addr,
        port: u16,
        proto: Protocol,
    ) -> Option<&RevNat> {
        let want = Backend { ip, port, proto };
        self.services.values().find_map(|svc| {
            svc.bound_slots()
                .any(|(_, id)| self.backends.get(&id) == Some(&want))
                .then(|| self.revnat.get(&svc.revnat_id))
                .flatten()
        })
    }

    pub fn services(&self) -> impl Iterator<Item = (&ServiceKey, &Service)> {
        self.services.iter()
    }

    pub fn backends(&self) -> impl Iterator<Item = (&u32, &Backend)> {
        self.backends.iter()
    }

    pub fn identities(&self) -> impl Iterator<Item = (&Ipv4Addr, &Identity)> {
        self.ipcache.iter()
    }
}
