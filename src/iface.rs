//! Interface watcher: periodically snapshots the host's network interfaces
//! and reports which ones are usable for multicast, and what changed since
//! the last snapshot.
//!
//! Grounded in the `if_addrs::get_if_addrs` usage pattern seen throughout the
//! pack (`tom-code-rust-matc/src/mdns2/mod.rs`, `WilliamVenner-searchlight`),
//! generalized here into a standalone poller since the teacher has no
//! interface-watching code of its own — `utils.rs` takes an already-resolved
//! interface address/index as a plain argument.

use std::{
  collections::HashSet,
  net::{IpAddr, Ipv6Addr},
  time::Duration,
};

use tracing::{debug, warn};

/// An interface usable for multicast: has a link-local-reachable address,
/// is up, and is not loopback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceInfo {
  /// OS interface name, e.g. `"eth0"`.
  pub name: String,
  /// The interface's usable address.
  pub addr: IpAddr,
  /// OS interface index, used for IPv6 scope ids and `IPV6_MULTICAST_IF`.
  /// Always `Some` on platforms `if-addrs` can report it for; IPv4 sockets
  /// don't need it.
  pub index: Option<u32>,
}

impl InterfaceInfo {
  /// Whether this interface's usable address is IPv4.
  #[inline]
  pub fn is_ipv4(&self) -> bool {
    self.addr.is_ipv4()
  }

  /// Whether this interface's usable address is IPv6.
  #[inline]
  pub fn is_ipv6(&self) -> bool {
    self.addr.is_ipv6()
  }
}

/// The minimum interval between two interface-change polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Returns every interface currently usable for the enabled IP families.
///
/// Filters out loopback interfaces and, for IPv6, anything that is not
/// link-local scoped (mDNS over IPv6 only ever uses link-local addresses,
/// RFC 6762 §2). `if-addrs` only reports interfaces that carry an address,
/// which in practice excludes administratively-down interfaces; there is no
/// separate `IFF_UP` flag to check here.
pub fn list_usable(use_ipv4: bool, use_ipv6: bool) -> Vec<InterfaceInfo> {
  let interfaces = match if_addrs::get_if_addrs() {
    Ok(interfaces) => interfaces,
    Err(err) => {
      warn!(error = %err, "failed to enumerate network interfaces");
      return Vec::new();
    }
  };

  interfaces
    .into_iter()
    .filter(|iface| !iface.is_loopback())
    .filter(|iface| {
      let ip = iface.ip();
      (use_ipv4 && ip.is_ipv4()) || (use_ipv6 && ip.is_ipv6() && is_usable_ipv6(&ip))
    })
    .map(|iface| InterfaceInfo {
      name: iface.name,
      addr: iface.ip(),
      index: iface.index,
    })
    .collect()
}

fn is_usable_ipv6(ip: &IpAddr) -> bool {
  match ip {
    IpAddr::V6(v6) => is_link_local_v6(v6),
    IpAddr::V4(_) => false,
  }
}

#[inline]
fn is_link_local_v6(addr: &Ipv6Addr) -> bool {
  (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// A snapshot-diff between two successive polls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceChange {
  /// Interfaces present now that were not in the previous snapshot.
  pub added: Vec<InterfaceInfo>,
  /// Interfaces in the previous snapshot no longer present.
  pub removed: Vec<InterfaceInfo>,
}

impl InterfaceChange {
  /// Whether nothing was added or removed.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty()
  }
}

/// Polls [`list_usable`] at a fixed interval and yields what changed.
///
/// The teacher has no analogous component; this is new machinery required
/// by the spec's interface-watcher leaf, built from plain `tokio::time`
/// polling rather than a platform netlink/route-socket listener, since no
/// example in the pack wires one up and a poll loop is the simplest
/// cross-platform substitute.
pub struct Watcher {
  use_ipv4: bool,
  use_ipv6: bool,
  interval: Duration,
  known: HashSet<InterfaceInfo>,
}

impl Watcher {
  /// Builds a watcher polling at [`MIN_POLL_INTERVAL`].
  pub fn new(use_ipv4: bool, use_ipv6: bool) -> Self {
    Self::with_interval(use_ipv4, use_ipv6, MIN_POLL_INTERVAL)
  }

  /// Builds a watcher polling at `interval`, clamped to at least
  /// [`MIN_POLL_INTERVAL`].
  pub fn with_interval(use_ipv4: bool, use_ipv6: bool, interval: Duration) -> Self {
    let interval = interval.max(MIN_POLL_INTERVAL);
    let known: HashSet<_> = list_usable(use_ipv4, use_ipv6).into_iter().collect();
    Self {
      use_ipv4,
      use_ipv6,
      interval,
      known,
    }
  }

  /// The interfaces known at construction or the last [`Watcher::poll`] call.
  pub fn current(&self) -> Vec<InterfaceInfo> {
    self.known.iter().cloned().collect()
  }

  /// Sleeps for the configured interval, then re-lists interfaces and
  /// returns what changed. Never returns an error: a failed enumeration is
  /// logged and treated as "nothing changed" so the watcher keeps running.
  pub async fn poll(&mut self) -> InterfaceChange {
    tokio::time::sleep(self.interval).await;

    let latest: HashSet<_> = list_usable(self.use_ipv4, self.use_ipv6).into_iter().collect();
    let added: Vec<_> = latest.difference(&self.known).cloned().collect();
    let removed: Vec<_> = self.known.difference(&latest).cloned().collect();

    if !added.is_empty() || !removed.is_empty() {
      debug!(added = added.len(), removed = removed.len(), "interface set changed");
      self.known = latest;
    }

    InterfaceChange { added, removed }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn link_local_v6_detection() {
    assert!(is_link_local_v6(&"fe80::1".parse().unwrap()));
    assert!(!is_link_local_v6(&"2001:db8::1".parse().unwrap()));
    assert!(!is_link_local_v6(&"::1".parse().unwrap()));
  }

  #[test]
  fn list_usable_does_not_panic() {
    let _ = list_usable(true, true);
  }
}
