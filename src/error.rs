use std::{io, net::SocketAddr};

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while decoding or encoding a DNS wire message.
///
/// Mostly a thin wrapper over `dns-protocol`'s own error type, the codec
/// this crate depends on for header/label/message encode-decode (see
/// `wire/mod.rs`); the remaining variants cover the RDATA composition this
/// layer still does itself (TXT character-strings, UTF-8 validation).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtoError {
  /// The underlying wire codec failed to decode or encode a message,
  /// resource record, or label.
  #[error(transparent)]
  Codec(#[from] dns_protocol::Error),
  /// Resource record data did not match its declared type/length.
  #[error("invalid resource record data")]
  InvalidRdata,
  /// A TXT record's encoded character-strings exceeded 255 bytes.
  #[error("TXT record data exceeds 255 bytes")]
  TxtTooLong,
  /// A label contained bytes that are not valid UTF-8 once unescaped.
  #[error(transparent)]
  Utf8(#[from] std::str::Utf8Error),
}

/// Errors raised while constructing or operating the multicast transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
  /// Neither IPv4 nor IPv6 could bind a multicast listener.
  #[error("no multicast listener could be bound for any enabled IP family")]
  NoListeners,
  /// Binding the family-wildcard receiver failed.
  #[error("failed to bind {family} multicast receiver on port {port}")]
  Bind {
    /// `"IPv4"` or `"IPv6"`.
    family: &'static str,
    /// The port that failed to bind.
    port: u16,
    /// The underlying OS error.
    #[source]
    source: io::Error,
  },
  /// Joining the multicast group on a specific interface address failed.
  #[error("failed to join multicast group on {addr}")]
  Join {
    /// The interface address the join was attempted on.
    addr: SocketAddr,
    /// The underlying OS error.
    #[source]
    source: io::Error,
  },
}

/// Errors raised while building a [`crate::service::ServiceProfile`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
  /// No port was set on the builder.
  #[error("missing service port")]
  PortMissing,
  /// A name passed to the builder was not fully qualified (did not end in `.`).
  #[error("{0} is not a fully qualified domain name")]
  NotFqdn(SmolStr),
  /// Resolving the host's own address records failed.
  #[error("could not determine host addresses for {hostname}")]
  HostResolution {
    /// The hostname that could not be resolved.
    hostname: SmolStr,
    /// The underlying OS error.
    #[source]
    source: io::Error,
  },
  /// The records derived for the profile could not be encoded.
  #[error(transparent)]
  Proto(#[from] ProtoError),
}
