//! Upstream registry: the services this one calls, and their local ports
//!
//! Ports come from a rolling allocator starting at 3001. Explicitly requested
//! ports bypass the allocator and do not advance it; the allocator skips any
//! port already taken, by an upstream or by something else in the task.
//! Nothing is ever removed or renumbered.

use std::collections::BTreeSet;
use std::fmt;

use ecsmesh_common::{Error, Result};

use crate::mesh::BASE_UPSTREAM_PORT;

/// One declared upstream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upstream {
    /// Catalog name of the called service
    pub service_name: String,
    /// Local port the proxy listens on for it
    pub local_port: u16,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_name, self.local_port)
    }
}

/// A port picked for an upstream but not yet recorded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    upstream: Upstream,
    allocated: bool,
}

impl Reservation {
    /// Reserved port
    pub fn port(&self) -> u16 {
        self.upstream.local_port
    }
}

/// Ordered upstream list plus the next allocator port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamRegistry {
    upstreams: Vec<Upstream>,
    reserved: BTreeSet<u16>,
    next_port: u32,
}

impl Default for UpstreamRegistry {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            reserved: BTreeSet::new(),
            next_port: u32::from(BASE_UPSTREAM_PORT),
        }
    }
}

impl UpstreamRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry that never hands out `ports`
    ///
    /// Used for ports other containers in the task already listen on.
    pub fn with_reserved_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            reserved: ports.into_iter().filter(|port| *port != 0).collect(),
            ..Self::default()
        }
    }

    /// Pick a port for `service_name` without recording it
    ///
    /// `owner` is the calling service, used for error attribution.
    pub fn reserve(&self, owner: &str, service_name: &str, requested: Option<u16>) -> Result<Reservation> {
        let (local_port, allocated) = match requested {
            Some(port) => {
                if self.is_taken(port) {
                    return Err(Error::PortConflict {
                        service: owner.to_string(),
                        port,
                    });
                }
                (port, false)
            }
            None => (self.allocate(owner)?, true),
        };

        Ok(Reservation {
            upstream: Upstream {
                service_name: service_name.to_string(),
                local_port,
            },
            allocated,
        })
    }

    /// Record a reservation
    pub fn commit(&mut self, reservation: Reservation) {
        if reservation.allocated {
            self.next_port = u32::from(reservation.port()) + 1;
        }
        self.upstreams.push(reservation.upstream);
    }

    fn allocate(&self, owner: &str) -> Result<u16> {
        (self.next_port..=u32::from(u16::MAX))
            .filter_map(|port| u16::try_from(port).ok())
            .find(|port| !self.is_taken(*port))
            .ok_or_else(|| {
                Error::resource_limit(
                    owner,
                    "upstream ports",
                    usize::from(u16::MAX - BASE_UPSTREAM_PORT) + 1,
                    self.upstreams.len() + 1,
                )
            })
    }

    fn is_taken(&self, port: u16) -> bool {
        self.reserved.contains(&port) || self.upstreams.iter().any(|u| u.local_port == port)
    }

    /// Upstreams in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Upstream> {
        self.upstreams.iter()
    }

    /// Number of upstreams
    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    /// Whether no upstream is declared
    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// `name:port,name:port` in declaration order
    pub fn flag_value(&self) -> String {
        self.upstreams
            .iter()
            .map(Upstream::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}
