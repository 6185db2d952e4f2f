//! Message pump: the single point through which every outbound message is
//! encoded/deduplicated/sent, and every inbound datagram is decoded and
//! classified into a query or answer event.
//!
//! Grounded in the teacher's `server.rs` receive-classify-respond loop
//! (`Processor::process`/`handle_query`) for the receive side and
//! `client.rs`'s `query_with`/`Client::query_in` for the query-send side. The
//! outbound duplicate-suppression LRU is new: the teacher has no send
//! throttling of its own, only the RFC 6762 §18.12 TODO comment carried over
//! in `handle_query_message` gesturing at the same unicast/multicast
//! decision this crate's query handler now makes correctly.

use std::{
  num::NonZeroUsize,
  sync::Mutex,
  time::{Duration, Instant},
};

use lru::LruCache;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::{
  config::Config,
  iface::InterfaceInfo,
  name::DomainName,
  transport::Transport,
  wire::{Header, Message, OpCode, Question, RecordType},
};

const DEDUPE_TTL: Duration = Duration::from_secs(1);
const DEDUPE_CAPACITY: usize = 256;

/// Fingerprint used for outbound duplicate suppression: the question or
/// answer's name/type/class plus whether it's a response (`qr`), per the
/// spec's `(name, type, class, qr)` key.
type Fingerprint = (DomainName, RecordType, u16, bool);

/// An event raised by the pump for every classified inbound message.
#[derive(Debug, Clone)]
pub enum PumpEvent {
  /// A query (`QR=0`) was received.
  QueryReceived {
    /// The decoded message.
    message: Message,
    /// The sender's address.
    remote: std::net::SocketAddr,
    /// The local address the datagram arrived on.
    local: std::net::SocketAddr,
  },
  /// A response (`QR=1`) was received.
  AnswerReceived {
    /// The decoded message.
    message: Message,
    /// The sender's address.
    remote: std::net::SocketAddr,
    /// The local address the datagram arrived on.
    local: std::net::SocketAddr,
  },
  /// The transport rebuilt its senders after an interface-set change.
  NetworkInterfaceDiscovered(Vec<InterfaceInfo>),
}

/// The message pump. Owns the transport and drives its receive loop on a
/// background task; exposes typed send operations and a broadcast channel
/// of [`PumpEvent`]s for everything above it (the catalog/name-server and
/// service-discovery layers) to subscribe to.
pub struct Pump {
  config: Config,
  transport: Transport,
  recent_sends: Mutex<LruCache<Fingerprint, Instant>>,
  events: broadcast::Sender<PumpEvent>,
}

impl Pump {
  /// Wraps a bound transport with the pump's send dedupe and event fan-out.
  pub fn new(transport: Transport, config: Config) -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      config,
      transport,
      recent_sends: Mutex::new(LruCache::new(NonZeroUsize::new(DEDUPE_CAPACITY).unwrap())),
      events,
    }
  }

  /// Subscribes to pump events (queries, answers, interface changes).
  pub fn subscribe(&self) -> broadcast::Receiver<PumpEvent> {
    self.events.subscribe()
  }

  /// Begins the receive loop. Runs until the transport's receivers all
  /// exit (every socket errored); intended to be spawned as a background
  /// task by the owner of the [`Pump`].
  pub async fn start(&self) {
    loop {
      let inbound = self.transport.recv().await;
      let Some(inbound) = inbound else {
        warn!("message pump receive loop ending: transport has no live sockets");
        return;
      };

      let message = match Message::decode(&inbound.data) {
        Ok(message) => message,
        Err(err) => {
          trace!(from = %inbound.from, error = %err, "dropping malformed inbound mDNS packet");
          continue;
        }
      };

      if !matches!(message.header.opcode, OpCode::Query) {
        trace!(opcode = ?message.header.opcode, "ignoring message with non-zero opcode");
        continue;
      }
      if message.header.tc {
        trace!("ignoring message with truncated bit set (known-answer continuation unsupported)");
        continue;
      }

      // Questions carry the QU bit already normalized into `unicast_response`
      // by Message::decode; nothing further to strip here.
      let event = if message.header.qr {
        PumpEvent::AnswerReceived {
          message,
          remote: inbound.from,
          local: inbound.local,
        }
      } else {
        PumpEvent::QueryReceived {
          message,
          remote: inbound.from,
          local: inbound.local,
        }
      };
      let _ = self.events.send(event);
    }
  }

  /// Notifies subscribers that the interface set changed, and rebuilds the
  /// transport's senders to match.
  pub async fn handle_interface_change(&self, interfaces: &[InterfaceInfo]) {
    self.transport.handle_interface_change(interfaces).await;
    let _ = self
      .events
      .send(PumpEvent::NetworkInterfaceDiscovered(interfaces.to_vec()));
  }

  /// Builds and sends a standard (multicast-response) query.
  pub async fn send_query(&self, name: &DomainName, ty: RecordType) {
    self.send_query_inner(0, name, ty, false, false).await;
  }

  /// Builds and sends a query with the QU bit set on every question.
  pub async fn send_unicast_query(&self, name: &DomainName, ty: RecordType) {
    self.send_query_inner(0, name, ty, true, false).await;
  }

  /// As [`Pump::send_query`], but with an explicit transaction id and an
  /// override of the duplicate-suppression check; used by the probing state
  /// machine, which needs a distinguishable id to match its own replies and
  /// must not have its three probe queries suppressed as duplicates of each
  /// other.
  pub async fn send_query_with_id(&self, id: u16, name: &DomainName, ty: RecordType, unicast: bool) {
    self.send_query_inner(id, name, ty, unicast, true).await;
  }

  async fn send_query_inner(&self, id: u16, name: &DomainName, ty: RecordType, unicast: bool, force: bool) {
    let question = Question::new(name.clone(), ty).with_unicast_response(unicast);
    let fingerprint = (name.clone(), ty, question.class, false);
    if !force && !self.should_send(fingerprint) {
      trace!(%name, ?ty, "suppressing duplicate outbound query");
      return;
    }

    let message = Message {
      header: Header {
        id,
        opcode: OpCode::Query,
        ..Header::default()
      },
      questions: vec![question],
      ..Message::default()
    };

    self.transmit(&message, None).await;
  }

  /// Sends a response message. Clears the question section (mDNS responses
  /// conventionally carry none) and sets QR before encoding. Sends
  /// multicast unless `to` is given, in which case it is sent unicast to
  /// that endpoint — this is the fixed unicast/multicast decision: the
  /// teacher's `Server::send_response` accepted an `_unicast` flag it never
  /// consulted, always sending via the multicast-bound socket regardless.
  pub async fn send_answer(&self, mut message: Message, to: Option<std::net::SocketAddr>, force: bool) {
    message.header.opcode = OpCode::Query;
    message.header.qr = true;
    message.questions.clear();

    if !force {
      let mut suppressed = true;
      for answer in &message.answers {
        let fingerprint = (answer.name.clone(), answer.ty(), answer.class, true);
        if self.should_send(fingerprint) {
          suppressed = false;
        }
      }
      if suppressed && !message.answers.is_empty() {
        trace!("suppressing duplicate outbound answer");
        return;
      }
    }

    self.transmit(&message, to).await;
  }

  async fn transmit(&self, message: &Message, to: Option<std::net::SocketAddr>) {
    let bytes = match message.encode(self.config.mtu()) {
      Ok(bytes) => bytes,
      Err(err) => {
        warn!(error = %err, "failed to encode outbound mDNS message");
        return;
      }
    };

    match to {
      Some(to) => {
        if let Err(err) = self.transport.send_to(&bytes, to).await {
          warn!(%to, error = %err, "unicast send failed");
        }
      }
      None => self.transport.send(&bytes).await,
    }
  }

  fn should_send(&self, fingerprint: Fingerprint) -> bool {
    let mut cache = self.recent_sends.lock().unwrap();
    let now = Instant::now();
    if let Some(last) = cache.get(&fingerprint) {
      if now.duration_since(*last) < DEDUPE_TTL {
        return false;
      }
    }
    cache.put(fingerprint, now);
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dedupe_suppresses_within_ttl() {
    let cache = Mutex::new(LruCache::new(NonZeroUsize::new(DEDUPE_CAPACITY).unwrap()));
    let fp: Fingerprint = (DomainName::new("x.local."), RecordType::A, 1, false);

    let mut guard = cache.lock().unwrap();
    assert!(guard.get(&fp).is_none());
    guard.put(fp.clone(), Instant::now());
    let last = *guard.get(&fp).unwrap();
    assert!(Instant::now().duration_since(last) < DEDUPE_TTL);
  }
}
