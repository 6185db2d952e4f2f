//! Multicast transport: per-family sockets that join the mDNS groups on
//! every usable interface and fan datagrams out to/in from the pump.
//!
//! Grounded in the teacher's `utils.rs` socket-construction functions and
//! `server.rs`'s per-family `Processor` receive loop, collapsed from the
//! teacher's `agnostic-net`-generic sockets down to `tokio::net::UdpSocket`
//! directly since this crate commits to a single async runtime. Unlike the
//! teacher's one-task-per-`Processor` loop reading a single socket, each
//! interface sender here also runs its own receive loop (so loopback and
//! unicast replies arriving on that socket are observed) and all of them
//! funnel into one channel, which is what `recv` drains.

use std::{
  collections::HashMap,
  io,
  net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6},
  sync::Arc,
};

use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{
  error::TransportError,
  iface::InterfaceInfo,
  utils::{multicast_udp4_socket, multicast_udp6_socket},
  IPV4_MDNS, IPV6_MDNS, MAX_PAYLOAD_SIZE, MDNS_PORT,
};

/// A datagram delivered by a receiver, tagged with where it came from.
#[derive(Debug)]
pub struct Inbound {
  pub data: Vec<u8>,
  pub from: SocketAddr,
  /// The local address the datagram was received on, used to send unicast
  /// replies back out the same interface they arrived on.
  pub local: SocketAddr,
}

/// A sender bound to one local interface address, with its multicast group
/// already joined.
struct Sender {
  socket: Arc<UdpSocket>,
  local: SocketAddr,
  group: SocketAddr,
  recv_task: JoinHandle<()>,
}

impl Drop for Sender {
  fn drop(&mut self) {
    self.recv_task.abort();
  }
}

/// Owns the receiver and per-interface senders for one IP family.
struct FamilyTransport {
  receiver: Arc<UdpSocket>,
  senders: HashMap<IpAddr, Sender>,
  group: SocketAddr,
}

impl FamilyTransport {
  fn send_all(&self, data: &[u8]) {
    for sender in self.senders.values() {
      let socket = sender.socket.clone();
      let group = sender.group;
      let local = sender.local;
      let data = data.to_vec();
      tokio::spawn(async move {
        if let Err(err) = socket.send_to(&data, group).await {
          warn!(%local, error = %err, "multicast send failed on interface, continuing with others");
        }
      });
    }
  }
}

fn spawn_recv_loop(socket: Arc<UdpSocket>, local: SocketAddr, tx: mpsc::UnboundedSender<Inbound>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut buf = vec![0u8; MAX_PAYLOAD_SIZE];
    loop {
      match socket.recv_from(&mut buf).await {
        Ok((len, from)) => {
          if len == 0 {
            continue;
          }
          debug!(%from, %local, len, "received datagram");
          if tx
            .send(Inbound {
              data: buf[..len].to_vec(),
              from,
              local,
            })
            .is_err()
          {
            return;
          }
        }
        Err(err) => {
          error!(%local, error = %err, "multicast receive loop exiting after socket error");
          return;
        }
      }
    }
  })
}

/// The IPv4/IPv6 family state, guarded separately from the inbound channel
/// so a long-idle `recv` never blocks a concurrent `send` or interface-change
/// behind the same lock.
struct TransportCore {
  v4: Option<FamilyTransport>,
  v6: Option<FamilyTransport>,
  tasks: Vec<JoinHandle<()>>,
}

impl Drop for TransportCore {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}

/// The multicast transport: owns the IPv4 and/or IPv6 receivers and their
/// per-interface senders, and exposes a single send/receive surface to the
/// message pump.
pub struct Transport {
  core: tokio::sync::RwLock<TransportCore>,
  inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
  inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl Transport {
  /// Builds receivers for every enabled, available family and senders for
  /// every interface address [`crate::iface::list_usable`] currently
  /// reports. Fails only if neither family could bind a receiver at all.
  pub async fn new(
    use_ipv4: bool,
    use_ipv6: bool,
    interfaces: &[InterfaceInfo],
  ) -> Result<Self, TransportError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut tasks = Vec::new();

    let v4 = if use_ipv4 {
      Self::bind_family_v4(interfaces, &tx, &mut tasks).await
    } else {
      None
    };
    let v6 = if use_ipv6 {
      Self::bind_family_v6(interfaces, &tx, &mut tasks).await
    } else {
      None
    };

    if v4.is_none() && v6.is_none() {
      return Err(TransportError::NoListeners);
    }

    Ok(Self {
      core: tokio::sync::RwLock::new(TransportCore { v4, v6, tasks }),
      inbound: tokio::sync::Mutex::new(rx),
      inbound_tx: tx,
    })
  }

  async fn bind_family_v4(
    interfaces: &[InterfaceInfo],
    tx: &mpsc::UnboundedSender<Inbound>,
    tasks: &mut Vec<JoinHandle<()>>,
  ) -> Option<FamilyTransport> {
    let group = SocketAddr::new(IpAddr::V4(IPV4_MDNS), MDNS_PORT);

    let receiver = match multicast_udp4_socket(None, MDNS_PORT) {
      Ok(std_sock) => match UdpSocket::from_std(std_sock) {
        Ok(sock) => Arc::new(sock),
        Err(err) => {
          error!(error = %err, "failed to hand IPv4 multicast receiver to tokio");
          return None;
        }
      },
      Err(err) => {
        error!(error = %err, "failed to bind IPv4 multicast receiver");
        return None;
      }
    };
    tasks.push(spawn_recv_loop(receiver.clone(), group, tx.clone()));

    let mut senders = HashMap::new();
    for iface in interfaces.iter().filter(|i| i.is_ipv4()) {
      let IpAddr::V4(addr) = iface.addr else { continue };
      match multicast_udp4_socket(Some(addr), 0) {
        Ok(std_sock) => match UdpSocket::from_std(std_sock) {
          Ok(sock) => {
            let sock = Arc::new(sock);
            let local = SocketAddr::V4(SocketAddrV4::new(addr, 0));
            let recv_task = spawn_recv_loop(sock.clone(), local, tx.clone());
            senders.insert(
              iface.addr,
              Sender {
                socket: sock,
                local,
                group,
                recv_task,
              },
            );
          }
          Err(err) => warn!(%addr, error = %err, "failed to hand IPv4 sender to tokio"),
        },
        Err(err) => warn!(%addr, error = %err, "failed to bind IPv4 sender on interface"),
      }
    }

    Some(FamilyTransport {
      receiver,
      senders,
      group,
    })
  }

  async fn bind_family_v6(
    interfaces: &[InterfaceInfo],
    tx: &mpsc::UnboundedSender<Inbound>,
    tasks: &mut Vec<JoinHandle<()>>,
  ) -> Option<FamilyTransport> {
    let group = SocketAddr::V6(SocketAddrV6::new(IPV6_MDNS, MDNS_PORT, 0, 0));

    let receiver = match multicast_udp6_socket(None, MDNS_PORT) {
      Ok(std_sock) => match UdpSocket::from_std(std_sock) {
        Ok(sock) => Arc::new(sock),
        Err(err) => {
          error!(error = %err, "failed to hand IPv6 multicast receiver to tokio");
          return None;
        }
      },
      Err(err) => {
        error!(error = %err, "failed to bind IPv6 multicast receiver");
        return None;
      }
    };
    tasks.push(spawn_recv_loop(receiver.clone(), group, tx.clone()));

    let mut senders = HashMap::new();
    for iface in interfaces.iter().filter(|i| i.is_ipv6()) {
      let IpAddr::V6(addr) = iface.addr else { continue };
      let scope = iface.index.unwrap_or(0);
      match multicast_udp6_socket(Some(scope), 0) {
        Ok(std_sock) => match UdpSocket::from_std(std_sock) {
          Ok(sock) => {
            let sock = Arc::new(sock);
            let local = SocketAddr::V6(SocketAddrV6::new(addr, 0, 0, scope));
            let sender_group = SocketAddr::V6(SocketAddrV6::new(IPV6_MDNS, MDNS_PORT, 0, scope));
            let recv_task = spawn_recv_loop(sock.clone(), local, tx.clone());
            senders.insert(
              iface.addr,
              Sender {
                socket: sock,
                local,
                group: sender_group,
                recv_task,
              },
            );
          }
          Err(err) => warn!(iface = %iface.name, error = %err, "failed to hand IPv6 sender to tokio"),
        },
        Err(err) => warn!(iface = %iface.name, error = %err, "failed to bind IPv6 sender on interface"),
      }
    }

    Some(FamilyTransport {
      receiver,
      senders,
      group,
    })
  }

  /// Sends `data` out every sender on every enabled family. Per-sender
  /// failures are logged and swallowed.
  pub async fn send(&self, data: &[u8]) {
    let core = self.core.read().await;
    if let Some(v4) = &core.v4 {
      v4.send_all(data);
    }
    if let Some(v6) = &core.v6 {
      v6.send_all(data);
    }
  }

  /// Sends `data` unicast to `to`, using the sender on the matching family
  /// (any sender will do: the OS routes a unicast datagram by destination,
  /// not by which multicast group the socket joined).
  pub async fn send_to(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
    let core = self.core.read().await;
    let family = match &to {
      SocketAddr::V4(_) => &core.v4,
      SocketAddr::V6(_) => &core.v6,
    };
    let Some(family) = family else {
      return Err(io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        "no transport bound for destination address family",
      ));
    };
    if let Some(sender) = family.senders.values().next() {
      sender.socket.send_to(data, to).await
    } else {
      family.receiver.send_to(data, to).await
    }
  }

  /// Awaits the next inbound datagram posted by any receive loop. Returns
  /// `None` only if every receive loop has exited (all sockets errored).
  ///
  /// Locks only the inbound channel, never `core`, so a long idle wait here
  /// never blocks a concurrent [`Transport::send`] or
  /// [`Transport::handle_interface_change`].
  pub async fn recv(&self) -> Option<Inbound> {
    let mut inbound = self.inbound.lock().await;
    inbound.recv().await
  }

  /// Rebuilds senders (and their receive loops) to match a new interface
  /// list, per the spec's interface-change handling: new addresses get a
  /// sender and a join, departed addresses have their sender dropped (which
  /// aborts its receive task), the shared receivers are left as-is since
  /// they already listen on the wildcard address.
  pub async fn handle_interface_change(&self, interfaces: &[InterfaceInfo]) {
    let mut core = self.core.write().await;
    if let Some(v4) = &mut core.v4 {
      Self::resync_family(v4, interfaces, true, &self.inbound_tx).await;
    }
    if let Some(v6) = &mut core.v6 {
      Self::resync_family(v6, interfaces, false, &self.inbound_tx).await;
    }
  }

  async fn resync_family(
    family: &mut FamilyTransport,
    interfaces: &[InterfaceInfo],
    is_v4: bool,
    tx: &mpsc::UnboundedSender<Inbound>,
  ) {
    let current: HashMap<IpAddr, &InterfaceInfo> = interfaces
      .iter()
      .filter(|i| i.is_ipv4() == is_v4)
      .map(|i| (i.addr, i))
      .collect();

    family.senders.retain(|addr, _| current.contains_key(addr));

    for (addr, iface) in current {
      if family.senders.contains_key(&addr) {
        continue;
      }
      let bound = if is_v4 {
        let IpAddr::V4(v4) = addr else { continue };
        multicast_udp4_socket(Some(v4), 0).map(|s| (s, SocketAddr::V4(SocketAddrV4::new(v4, 0)), family.group))
      } else {
        let IpAddr::V6(v6) = addr else { continue };
        let scope = iface.index.unwrap_or(0);
        multicast_udp6_socket(Some(scope), 0).map(|s| {
          (
            s,
            SocketAddr::V6(SocketAddrV6::new(v6, 0, 0, scope)),
            SocketAddr::V6(SocketAddrV6::new(IPV6_MDNS, MDNS_PORT, 0, scope)),
          )
        })
      };

      match bound {
        Ok((std_sock, local, group)) => match UdpSocket::from_std(std_sock) {
          Ok(sock) => {
            let sock = Arc::new(sock);
            let recv_task = spawn_recv_loop(sock.clone(), local, tx.clone());
            family.senders.insert(
              addr,
              Sender {
                socket: sock,
                local,
                group,
                recv_task,
              },
            );
          }
          Err(err) => warn!(%addr, error = %err, "failed to hand new-interface sender to tokio"),
        },
        Err(err) => warn!(%addr, error = %err, "failed to bind sender on newly discovered interface"),
      }
    }
  }
}
