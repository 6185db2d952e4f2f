use std::net::{Ipv4Addr, Ipv6Addr};

use dns_protocol::{Label, ResourceType};
use smol_str::SmolStr;

use crate::{error::ProtoError, name::DomainName};

use super::{
  name::{deserialize_rdata_name, from_label, serialize_rdata_name, to_label},
  CACHE_FLUSH_BIT,
};

const IPV4_LEN: usize = 4;
const IPV6_LEN: usize = 16;

/// The `IN` (Internet) DNS class, the only one mDNS uses.
pub const CLASS_IN: u16 = 1;

/// A subset of the DNS record types relevant to mDNS, plus `NSEC` for the
/// optional negative-response path.
///
/// Mirrors the teacher's `types::DNSClass` pattern of a `repr(u16)` enum with
/// one data-carrying fallback variant, applied here to record types instead
/// so that decode never has to fail on an unrecognized on-wire type: the
/// resolver should skip what it doesn't know about, not reject the packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum RecordType {
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) IPv4 address record.
  A = 1,
  /// [RFC 3596](https://tools.ietf.org/html/rfc3596) IPv6 address record.
  Aaaa = 28,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) all cached records.
  Any = 255,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) pointer record.
  Ptr = 12,
  /// [RFC 2782](https://tools.ietf.org/html/rfc2782) service locator.
  Srv = 33,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) text record.
  Txt = 16,
  /// [RFC 4034](https://tools.ietf.org/html/rfc4034) next-secure record,
  /// used only for the optional negative-response path.
  Nsec = 47,
  /// Any other on-wire value.
  Unknown(u16),
}

impl RecordType {
  /// Returns whether `self` satisfies a query of type `query_ty` per the
  /// usual DNS `ANY` wildcard rule.
  #[inline]
  pub fn matches(self, query_ty: RecordType) -> bool {
    query_ty == RecordType::Any || self == query_ty
  }
}

impl From<RecordType> for u16 {
  #[inline]
  fn from(value: RecordType) -> u16 {
    match value {
      RecordType::A => 1,
      RecordType::Aaaa => 28,
      RecordType::Any => 255,
      RecordType::Ptr => 12,
      RecordType::Srv => 33,
      RecordType::Txt => 16,
      RecordType::Nsec => 47,
      RecordType::Unknown(v) => v,
    }
  }
}

impl From<u16> for RecordType {
  #[inline]
  fn from(value: u16) -> Self {
    match value {
      1 => RecordType::A,
      28 => RecordType::Aaaa,
      255 => RecordType::Any,
      12 => RecordType::Ptr,
      33 => RecordType::Srv,
      16 => RecordType::Txt,
      47 => RecordType::Nsec,
      other => RecordType::Unknown(other),
    }
  }
}

impl From<RecordType> for ResourceType {
  #[inline]
  fn from(value: RecordType) -> Self {
    ResourceType::from(u16::from(value))
  }
}

impl From<ResourceType> for RecordType {
  #[inline]
  fn from(value: ResourceType) -> Self {
    RecordType::from(u16::from(value))
  }
}

/// The data carried by a [`ResourceRecord`], tagged by record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RecordData {
  /// RFC 1035 §3.4.1 A RDATA.
  A(Ipv4Addr),
  /// RFC 1886 §2.2 AAAA RDATA.
  Aaaa(Ipv6Addr),
  /// RFC 1035 §3.3.12 PTR RDATA.
  Ptr(DomainName),
  /// RFC 2782 SRV RDATA.
  Srv {
    /// Lower values are preferred.
    priority: u16,
    /// Relative weight among records of the same priority.
    weight: u16,
    /// Port the service listens on.
    port: u16,
    /// Hostname of the machine providing the service.
    target: DomainName,
  },
  /// RFC 1035 §3.3.14 TXT RDATA: one or more character-strings.
  Txt(Vec<SmolStr>),
  /// RFC 4034 §4.1 NSEC RDATA, encode-only: the next owner name and the set
  /// of record types present at this name. Used only to assert a negative
  /// answer when `Config::answers_contain_additional_records`-style negative
  /// responses are enabled; this engine never needs to decode one.
  Nsec {
    /// The next owner name in canonical order (unused here; always the
    /// owner name itself since this engine never chains NSEC records).
    next: DomainName,
    /// The record types that exist at this name.
    types: Vec<RecordType>,
  },
  /// RDATA for a type this codec doesn't otherwise model, carried verbatim
  /// so the record round-trips and reports its real [`RecordType`] instead
  /// of being mistaken for one of the known kinds above.
  Unknown {
    /// The on-wire type this RDATA belongs to.
    ty: u16,
    /// The raw RDATA bytes, unparsed.
    raw: Vec<u8>,
  },
}

impl RecordData {
  /// Returns the record type this data encodes as.
  pub fn ty(&self) -> RecordType {
    match self {
      Self::A(_) => RecordType::A,
      Self::Aaaa(_) => RecordType::Aaaa,
      Self::Ptr(_) => RecordType::Ptr,
      Self::Srv { .. } => RecordType::Srv,
      Self::Txt(_) => RecordType::Txt,
      Self::Nsec { .. } => RecordType::Nsec,
      Self::Unknown { ty, .. } => RecordType::from(*ty),
    }
  }

  /// Pre-serializes this RDATA into owned bytes, the way the teacher's
  /// `PTR`/`SRV` wrappers build the `data: &[u8]` argument to
  /// `dns_protocol::ResourceRecord::new`.
  fn serialize(&self) -> Result<Vec<u8>, ProtoError> {
    match self {
      Self::A(ip) => Ok(ip.octets().to_vec()),
      Self::Aaaa(ip) => Ok(ip.octets().to_vec()),
      Self::Ptr(name) => serialize_rdata_name(name),
      Self::Srv {
        priority,
        weight,
        port,
        target,
      } => {
        let mut buf = Vec::with_capacity(6);
        buf.extend_from_slice(&priority.to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(&serialize_rdata_name(target)?);
        Ok(buf)
      }
      Self::Txt(strings) => {
        let mut buf = Vec::new();
        if strings.is_empty() {
          buf.push(0);
        }
        for s in strings {
          let bytes = s.as_bytes();
          if bytes.len() > 255 {
            return Err(ProtoError::TxtTooLong);
          }
          buf.push(bytes.len() as u8);
          buf.extend_from_slice(bytes);
        }
        Ok(buf)
      }
      Self::Nsec { next, types } => {
        let mut buf = serialize_rdata_name(next)?;
        let mut window = [0u8; 32];
        let mut highest = 0usize;
        for ty in types {
          let v = u16::from(*ty) as usize;
          if v > 255 {
            continue;
          }
          window[v / 8] |= 0x80 >> (v % 8);
          highest = highest.max(v / 8);
        }
        buf.push(0); // window block 0
        buf.push((highest + 1) as u8);
        buf.extend_from_slice(&window[..=highest]);
        Ok(buf)
      }
      Self::Unknown { raw, .. } => Ok(raw.clone()),
    }
  }

  /// Parses RDATA bytes for `ty` as decoded by `dns_protocol::ResourceRecord`.
  fn deserialize(ty: RecordType, raw: &[u8]) -> Result<Self, ProtoError> {
    match ty {
      RecordType::A => {
        if raw.len() < IPV4_LEN {
          return Err(ProtoError::InvalidRdata);
        }
        let octets: [u8; IPV4_LEN] = raw[..IPV4_LEN].try_into().unwrap();
        Ok(Self::A(Ipv4Addr::from(octets)))
      }
      RecordType::Aaaa => {
        if raw.len() < IPV6_LEN {
          return Err(ProtoError::InvalidRdata);
        }
        let octets: [u8; IPV6_LEN] = raw[..IPV6_LEN].try_into().unwrap();
        Ok(Self::Aaaa(Ipv6Addr::from(octets)))
      }
      RecordType::Ptr => Ok(Self::Ptr(deserialize_rdata_name(raw)?)),
      RecordType::Srv => {
        if raw.len() < 6 {
          return Err(ProtoError::InvalidRdata);
        }
        let priority = u16::from_be_bytes([raw[0], raw[1]]);
        let weight = u16::from_be_bytes([raw[2], raw[3]]);
        let port = u16::from_be_bytes([raw[4], raw[5]]);
        let target = deserialize_rdata_name(&raw[6..])?;
        Ok(Self::Srv {
          priority,
          weight,
          port,
          target,
        })
      }
      RecordType::Txt => Ok(Self::Txt(decode_txt(raw)?)),
      // NSEC decode is intentionally unsupported: this engine only emits it.
      // Everything else (including NSEC on the wire) is carried verbatim so
      // the record still reports its real type and round-trips untouched.
      _ => Ok(Self::Unknown {
        ty: u16::from(ty),
        raw: raw.to_vec(),
      }),
    }
  }
}

/// A single DNS resource record: owner name, class, TTL and typed data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRecord {
  /// The owner name this record is attached to.
  pub name: DomainName,
  /// Class with the cache-flush bit already stripped; see `cache_flush`.
  pub class: u16,
  /// RFC 6762 §10.2: set on unique records once this responder has verified
  /// (via probing) that it is the sole owner, so receivers flush stale
  /// cached copies.
  pub cache_flush: bool,
  /// Seconds until expiry; `0` denotes a goodbye record.
  pub ttl: u32,
  /// The typed record data.
  pub data: RecordData,
}

impl ResourceRecord {
  /// Builds a record with class `IN` and the cache-flush bit unset.
  #[inline]
  pub fn new(name: DomainName, ttl: u32, data: RecordData) -> Self {
    Self {
      name,
      class: CLASS_IN,
      cache_flush: false,
      ttl,
      data,
    }
  }

  /// Sets the cache-flush bit.
  #[inline]
  pub fn with_cache_flush(mut self, cache_flush: bool) -> Self {
    self.cache_flush = cache_flush;
    self
  }

  /// Returns the record type this data encodes as.
  #[inline]
  pub fn ty(&self) -> RecordType {
    self.data.ty()
  }

  /// Whether this is a goodbye record (`ttl == 0`).
  #[inline]
  pub fn is_goodbye(&self) -> bool {
    self.ttl == 0
  }

  /// Converts a `dns_protocol`-decoded record into this crate's owned form.
  pub(super) fn from_wire(rr: &dns_protocol::ResourceRecord<'_>) -> Result<Self, ProtoError> {
    let ty = RecordType::from(rr.ty());
    let raw_class = rr.class();
    Ok(Self {
      name: from_label(rr.name()),
      class: raw_class & !CACHE_FLUSH_BIT,
      cache_flush: raw_class & CACHE_FLUSH_BIT != 0,
      ttl: rr.ttl(),
      data: RecordData::deserialize(ty, rr.data())?,
    })
  }

  /// Pre-serializes this record's RDATA into `rdata_buf`, then returns a
  /// borrowed `dns_protocol::ResourceRecord` over both this record's name
  /// and that buffer, ready to hand to `dns_protocol::Message::new`.
  pub(super) fn to_wire<'a>(
    &'a self,
    rdata_buf: &'a mut Vec<u8>,
  ) -> Result<dns_protocol::ResourceRecord<'a>, ProtoError> {
    *rdata_buf = self.data.serialize()?;
    let class = if self.cache_flush {
      self.class | CACHE_FLUSH_BIT
    } else {
      self.class
    };
    Ok(dns_protocol::ResourceRecord::new(
      to_label(&self.name),
      ResourceType::from(self.ty()),
      class,
      self.ttl,
      rdata_buf,
    ))
  }
}

fn decode_txt(mut src: &[u8]) -> Result<Vec<SmolStr>, ProtoError> {
  let mut out = Vec::new();
  while !src.is_empty() {
    let len = src[0] as usize;
    src = &src[1..];
    if len > src.len() {
      return Err(ProtoError::InvalidRdata);
    }
    let s = core::str::from_utf8(&src[..len])?;
    out.push(SmolStr::new(s));
    src = &src[len..];
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn a_record_round_trip() {
    let rr = ResourceRecord::new(
      DomainName::new("x.local."),
      120,
      RecordData::A(Ipv4Addr::new(192, 0, 2, 5)),
    );
    let mut buf = Vec::new();
    let wire = rr.to_wire(&mut buf).unwrap();
    let decoded = ResourceRecord::from_wire(&wire).unwrap();
    assert_eq!(decoded.name, rr.name);
    assert_eq!(decoded.data, rr.data);
    assert_eq!(decoded.ttl, 120);
  }

  #[test]
  fn srv_round_trip() {
    let rr = ResourceRecord::new(
      DomainName::new("x._foo._tcp.local."),
      120,
      RecordData::Srv {
        priority: 10,
        weight: 1,
        port: 1024,
        target: DomainName::new("x.local."),
      },
    );
    let mut buf = Vec::new();
    let wire = rr.to_wire(&mut buf).unwrap();
    let decoded = ResourceRecord::from_wire(&wire).unwrap();
    assert_eq!(decoded.data, rr.data);
  }

  #[test]
  fn cache_flush_bit_round_trips() {
    let rr = ResourceRecord::new(DomainName::new("x.local."), 120, RecordData::Txt(vec![]))
      .with_cache_flush(true);
    let mut buf = Vec::new();
    let wire = rr.to_wire(&mut buf).unwrap();
    let decoded = ResourceRecord::from_wire(&wire).unwrap();
    assert!(decoded.cache_flush);
    assert_eq!(decoded.class, CLASS_IN);
  }

  #[test]
  fn unknown_type_round_trips_and_reports_real_type() {
    let rr = ResourceRecord::new(
      DomainName::new("x.local."),
      120,
      RecordData::Unknown {
        ty: 6, // SOA, unmodeled by this codec
        raw: vec![1, 2, 3, 4],
      },
    );
    let mut buf = Vec::new();
    let wire = rr.to_wire(&mut buf).unwrap();
    let decoded = ResourceRecord::from_wire(&wire).unwrap();
    assert_eq!(decoded.ty(), RecordType::Unknown(6));
    assert_eq!(decoded.data, rr.data);
  }
}
