/// Engine-wide configuration.
///
/// Mirrors the builder-struct convention the rest of this crate uses
/// (`ServerOptions`, `QueryParam`, `ServiceProfileBuilder`): plain fields,
/// `with_*` setters returning `Self`, and a `Default` impl instead of a
/// file-backed configuration layer.
#[derive(Debug, Clone)]
pub struct Config {
  use_ipv4: bool,
  use_ipv6: bool,
  answers_contain_additional_records: bool,
  mtu: usize,
  ttl_default: u32,
  negative_responses: bool,
}

/// Default outbound datagram size cap, matching common Ethernet MTU.
pub const DEFAULT_MTU: usize = 1500;
/// Default TTL (seconds) stamped on records this engine derives itself
/// (reverse-PTR, sub-PTR) rather than copying from a caller-supplied record.
pub const DEFAULT_TTL: u32 = 120;

impl Default for Config {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl Config {
  /// Returns a new [`Config`] with every option at its documented default.
  #[inline]
  pub const fn new() -> Self {
    Self {
      use_ipv4: true,
      use_ipv6: true,
      answers_contain_additional_records: false,
      mtu: DEFAULT_MTU,
      ttl_default: DEFAULT_TTL,
      negative_responses: false,
    }
  }

  /// Whether the transport should bind and join the IPv4 multicast group.
  ///
  /// Default `true`.
  #[inline]
  pub const fn use_ipv4(&self) -> bool {
    self.use_ipv4
  }

  /// Sets whether the transport should bind and join the IPv4 multicast group.
  #[inline]
  pub fn with_use_ipv4(mut self, use_ipv4: bool) -> Self {
    self.use_ipv4 = use_ipv4;
    self
  }

  /// Whether the transport should bind and join the IPv6 multicast group.
  ///
  /// Default `true`.
  #[inline]
  pub const fn use_ipv6(&self) -> bool {
    self.use_ipv6
  }

  /// Sets whether the transport should bind and join the IPv6 multicast group.
  #[inline]
  pub fn with_use_ipv6(mut self, use_ipv6: bool) -> Self {
    self.use_ipv6 = use_ipv6;
    self
  }

  /// Compatibility toggle: when `true`, the query handler promotes the
  /// additional section into the answer section before sending (for peers
  /// that ignore additional records). Default `false`.
  #[inline]
  pub const fn answers_contain_additional_records(&self) -> bool {
    self.answers_contain_additional_records
  }

  /// Sets the additional-records compatibility toggle.
  #[inline]
  pub fn with_answers_contain_additional_records(mut self, value: bool) -> Self {
    self.answers_contain_additional_records = value;
    self
  }

  /// Cap, in bytes, on outbound datagram size. Default `1500`.
  #[inline]
  pub const fn mtu(&self) -> usize {
    self.mtu
  }

  /// Sets the outbound datagram size cap.
  #[inline]
  pub fn with_mtu(mut self, mtu: usize) -> Self {
    self.mtu = mtu;
    self
  }

  /// Default TTL (seconds) stamped on records the engine derives itself
  /// (reverse-PTR, sub-PTR). Default `120`.
  #[inline]
  pub const fn ttl_default(&self) -> u32 {
    self.ttl_default
  }

  /// Sets the default derived-record TTL.
  #[inline]
  pub fn with_ttl_default(mut self, ttl: u32) -> Self {
    self.ttl_default = ttl;
    self
  }

  /// Whether the name server asserts nonexistence with an RFC 4034 §4.1
  /// NSEC record (listing the types actually present at a matched name)
  /// instead of silently dropping a question whose type wasn't found.
  /// Optional per `spec.md` §4.D; most mDNS responders don't bother.
  /// Default `false`.
  #[inline]
  pub const fn negative_responses(&self) -> bool {
    self.negative_responses
  }

  /// Sets whether the name server emits NSEC negative responses.
  #[inline]
  pub fn with_negative_responses(mut self, value: bool) -> Self {
    self.negative_responses = value;
    self
  }
}
