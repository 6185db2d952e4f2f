#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(unexpected_cfgs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! Link-local mDNS and DNS-SD service discovery.
//!
//! Five components carry the weight: the interface watcher ([`iface`]), the
//! multicast transport ([`transport`]), the message pump ([`pump`]), the
//! record catalog and name server ([`catalog`]), and the service discovery
//! layer ([`service`]). [`Engine`] wires all five together into the single
//! entry point most callers need.

use std::{io, net::Ipv4Addr, net::Ipv6Addr, sync::Arc};

use smol_str::{format_smolstr, SmolStr};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::debug;

pub mod catalog;
/// Engine-wide configuration.
pub mod config;
/// Error types raised by the wire codec, transport, and service layers.
pub mod error;
pub mod iface;
/// Domain name type.
pub mod name;
pub mod pump;
pub mod service;
pub mod wire;

mod transport;
mod utils;

pub use catalog::{Catalog, CatalogEntry, Status};
pub use config::Config;
pub use error::{ProtoError, ServiceError, TransportError};
pub use iface::{InterfaceChange, InterfaceInfo, Watcher};
pub use name::DomainName;
pub use pump::{Pump, PumpEvent};
pub use service::{Discovery, DiscoveryEvent, ProfileState, ServiceProfile, ServiceProfileBuilder};
pub use wire::{Header, Message, OpCode, Question, RecordData, RecordType, ResourceRecord, ResponseCode, CLASS_IN};

const IPV4_MDNS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const IPV6_MDNS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
const MDNS_PORT: u16 = 5353;
// See RFC 6762, https://datatracker.ietf.org/doc/rfc6762/
const MAX_PAYLOAD_SIZE: usize = 9000;

/// Wires the transport, pump, catalog and discovery layer together, and owns
/// the background tasks that drive them.
///
/// This is the component the teacher has no single counterpart for: it
/// generalizes the construction sequence scattered across the teacher's
/// `Server::new`/`Client::new` (bind sockets, spawn the processor loop) into
/// one entry point that also starts the interface watcher and the discovery
/// event loop.
pub struct Engine {
  catalog: Arc<Catalog>,
  pump: Arc<Pump>,
  discovery: Arc<Discovery>,
  tasks: Vec<JoinHandle<()>>,
}

impl Engine {
  /// Binds the transport on every usable interface, then starts the pump's
  /// receive loop, the discovery event loop, and the interface-change
  /// watcher as background tasks.
  pub async fn new(config: Config) -> Result<Self, TransportError> {
    let interfaces = iface::list_usable(config.use_ipv4(), config.use_ipv6());
    let transport = transport::Transport::new(config.use_ipv4(), config.use_ipv6(), &interfaces).await?;

    let pump = Arc::new(Pump::new(transport, config.clone()));
    let catalog = Arc::new(Catalog::new());
    let discovery = Arc::new(Discovery::new(catalog.clone(), pump.clone(), config.clone()));

    let mut tasks = Vec::new();
    tasks.push({
      let pump = pump.clone();
      tokio::spawn(async move { pump.start().await })
    });
    tasks.push({
      let discovery = discovery.clone();
      tokio::spawn(async move { discovery.start().await })
    });
    tasks.push({
      let pump = pump.clone();
      tokio::spawn(async move {
        let mut watcher = iface::Watcher::new(config.use_ipv4(), config.use_ipv6());
        loop {
          let change = watcher.poll().await;
          if !change.is_empty() {
            debug!(added = change.added.len(), removed = change.removed.len(), "rebinding transport for interface change");
            pump.handle_interface_change(&watcher.current()).await;
          }
        }
      })
    });

    Ok(Self {
      catalog,
      pump,
      discovery,
      tasks,
    })
  }

  /// The authoritative record catalog, for direct lookups outside the
  /// discovery layer's own query helpers.
  #[inline]
  pub fn catalog(&self) -> &Arc<Catalog> {
    &self.catalog
  }

  /// The message pump, for issuing raw queries outside the discovery
  /// layer's own helpers.
  #[inline]
  pub fn pump(&self) -> &Arc<Pump> {
    &self.pump
  }

  /// Subscribes to discovery events (`service_discovered`,
  /// `service_instance_discovered`, `service_instance_shutdown`,
  /// `network_interface_discovered`).
  #[inline]
  pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
    self.discovery.subscribe()
  }

  /// Inserts a profile's records into the catalog. Sends no traffic.
  #[inline]
  pub async fn advertise(&self, profile: ServiceProfile) -> Arc<ServiceProfile> {
    self.discovery.advertise(profile).await
  }

  /// Runs RFC 6762 §8.1 probing for `profile`. Returns `true` on conflict.
  #[inline]
  pub async fn probe(&self, profile: &Arc<ServiceProfile>) -> bool {
    self.discovery.probe(profile).await
  }

  /// Announces `profile`'s records, twice, one second apart.
  #[inline]
  pub async fn announce(&self, profile: &Arc<ServiceProfile>) {
    self.discovery.announce(profile).await
  }

  /// Sends goodbye records for `profile` and removes it from the catalog.
  #[inline]
  pub async fn unadvertise(&self, profile: &Arc<ServiceProfile>) {
    self.discovery.unadvertise(profile).await
  }

  /// Goodbyes every advertised profile, in registration order.
  #[inline]
  pub async fn unadvertise_all(&self) {
    self.discovery.unadvertise_all().await
  }

  /// Sends a PTR query for `_services._dns-sd._udp.local`.
  #[inline]
  pub async fn query_all_services(&self) {
    self.discovery.query_all_services().await
  }

  /// Sends a PTR query for `service.local` or `subtype._sub.service.local`.
  #[inline]
  pub async fn query_service_instances(&self, service: &str, subtype: Option<&str>) {
    self.discovery.query_service_instances(service, subtype).await
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}

/// Returns the hostname of the current machine.
///
/// ## Examples
///
/// ```
/// let hostname = mdns_discovery::hostname();
/// println!("hostname: {hostname:?}");
/// ```
pub fn hostname() -> io::Result<SmolStr> {
  #[cfg(not(any(windows, target_os = "wasi")))]
  {
    let name = rustix::system::uname();
    let name = name.nodename().to_string_lossy();
    return Ok(SmolStr::from(name.as_ref()));
  }

  #[cfg(windows)]
  {
    return match ::hostname::get() {
      Ok(name) => Ok(SmolStr::from(name.to_string_lossy().as_ref())),
      Err(e) => Err(e),
    };
  }

  #[allow(unreachable_code)]
  Err(io::Error::new(
    io::ErrorKind::Unsupported,
    "hostname is not supported on this platform",
  ))
}

fn hostname_fqdn() -> io::Result<SmolStr> {
  #[cfg(not(any(windows, target_os = "wasi")))]
  {
    let name = rustix::system::uname();
    let name = name.nodename().to_string_lossy();
    return Ok(format_smolstr!("{}.", name.as_ref()));
  }

  #[cfg(windows)]
  {
    return match ::hostname::get() {
      Ok(name) => Ok(format_smolstr!("{}.", name.to_string_lossy().as_ref())),
      Err(e) => Err(e),
    };
  }

  #[allow(unreachable_code)]
  Err(io::Error::new(
    io::ErrorKind::Unsupported,
    "hostname is not supported on this platform",
  ))
}
