use dns_protocol::{Cursor, Deserialize, Label, Serialize};

use crate::{error::ProtoError, name::DomainName};

/// Borrows `name` as a `dns_protocol` label for use in a `Question` or
/// `ResourceRecord` passed to `dns_protocol::Message::new`; the message-level
/// compression and header bit layout are entirely `dns_protocol`'s job from
/// here on.
pub(crate) fn to_label(name: &DomainName) -> Label<'_> {
  Label::from(name.as_str())
}

/// Builds an owned [`DomainName`] from a decoded label, restoring the
/// trailing-dot FQDN form this crate uses everywhere else.
pub(crate) fn from_label(label: Label<'_>) -> DomainName {
  let s = label.to_string();
  if s.is_empty() || s.ends_with('.') {
    DomainName::from(s)
  } else {
    DomainName::from(format!("{s}."))
  }
}

/// Pre-serializes `name` into an isolated RDATA byte buffer, the way the
/// teacher's `PTR`/`SRV` RDATA wrappers build their stored bytes: size the
/// buffer with `Label::serialized_len`, then `Label::serialize` into it.
pub(crate) fn serialize_rdata_name(name: &DomainName) -> Result<Vec<u8>, ProtoError> {
  let label = to_label(name);
  let mut buf = vec![0u8; label.serialized_len()];
  let written = label.serialize(&mut buf)?;
  buf.truncate(written);
  Ok(buf)
}

/// Decodes a name from an isolated RDATA byte slice (PTR target, SRV target,
/// NSEC next-name). These never carry compression pointers — SRV targets are
/// explicitly exempted by RFC 2782, and this codec never emits or expects
/// one for PTR/NSEC rdata either — so a plain `Label` deserialize over the
/// rdata slice alone (not the whole message buffer) is exactly what the
/// teacher's `Srv::from_bytes` does.
pub(crate) fn deserialize_rdata_name(buf: &[u8]) -> Result<DomainName, ProtoError> {
  let cursor = Cursor::new(buf);
  let mut label = Label::default();
  label.deserialize(cursor)?;
  Ok(from_label(label))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip_simple() {
    let name = DomainName::new("foo.example.com.");
    let bytes = serialize_rdata_name(&name).unwrap();
    let decoded = deserialize_rdata_name(&bytes).unwrap();
    assert_eq!(decoded, name);
  }

  #[test]
  fn root_label_round_trips() {
    let name = DomainName::new(".");
    let bytes = serialize_rdata_name(&name).unwrap();
    let decoded = deserialize_rdata_name(&bytes).unwrap();
    assert_eq!(decoded.as_str(), ".");
  }
}
