use dns_protocol::{
  BufferType, Error as DnsError, Flags, MessageType, Opcode as DnsOpcode,
  Question as DnsQuestion, ResourceRecord as DnsResourceRecord, ResourceType,
  ResponseCode as DnsResponseCode,
};

use crate::{error::ProtoError, name::DomainName};

use super::{
  name::{from_label, to_label},
  record::ResourceRecord,
  RecordType, QU_BIT,
};

/// The four-bit DNS opcode. mDNS only ever uses `Query`; the others are kept
/// so a malformed or foreign packet decodes instead of erroring.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum OpCode {
  /// A standard query (RFC 1035 §4.1.1, opcode 0). The only value mDNS uses.
  Query,
  /// An inverse query (RFC 1035 §4.1.1, opcode 1), obsoleted by RFC 3425.
  IQuery,
  /// A server status request (RFC 1035 §4.1.1, opcode 2).
  Status,
  /// A zone change notification (RFC 1996, opcode 4).
  Notify,
  /// A dynamic update (RFC 2136, opcode 5).
  Update,
  /// Any other on-wire opcode value.
  Unknown(u8),
}

impl From<u8> for OpCode {
  fn from(value: u8) -> Self {
    match value {
      0 => Self::Query,
      1 => Self::IQuery,
      2 => Self::Status,
      4 => Self::Notify,
      5 => Self::Update,
      other => Self::Unknown(other),
    }
  }
}

impl From<OpCode> for u8 {
  fn from(value: OpCode) -> Self {
    match value {
      OpCode::Query => 0,
      OpCode::IQuery => 1,
      OpCode::Status => 2,
      OpCode::Notify => 4,
      OpCode::Update => 5,
      OpCode::Unknown(v) => v,
    }
  }
}

impl From<DnsOpcode> for OpCode {
  #[inline]
  fn from(value: DnsOpcode) -> Self {
    OpCode::from(u8::from(value))
  }
}

impl From<OpCode> for DnsOpcode {
  #[inline]
  fn from(value: OpCode) -> Self {
    DnsOpcode::from(u8::from(value))
  }
}

/// The four-bit DNS response code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ResponseCode {
  /// No error condition (RFC 1035 §4.1.1, rcode 0).
  NoError,
  /// The name server could not interpret the query (rcode 1).
  FormErr,
  /// The name server encountered an internal failure (rcode 2).
  ServFail,
  /// The queried name does not exist (rcode 3).
  NxDomain,
  /// The requested kind of query is not implemented (rcode 4).
  NotImp,
  /// The name server refused to perform the operation (rcode 5).
  Refused,
  /// Any other on-wire response code value.
  Unknown(u8),
}

impl From<u8> for ResponseCode {
  fn from(value: u8) -> Self {
    match value {
      0 => Self::NoError,
      1 => Self::FormErr,
      2 => Self::ServFail,
      3 => Self::NxDomain,
      4 => Self::NotImp,
      5 => Self::Refused,
      other => Self::Unknown(other),
    }
  }
}

impl From<ResponseCode> for u8 {
  fn from(value: ResponseCode) -> Self {
    match value {
      ResponseCode::NoError => 0,
      ResponseCode::FormErr => 1,
      ResponseCode::ServFail => 2,
      ResponseCode::NxDomain => 3,
      ResponseCode::NotImp => 4,
      ResponseCode::Refused => 5,
      ResponseCode::Unknown(v) => v,
    }
  }
}

impl From<DnsResponseCode> for ResponseCode {
  #[inline]
  fn from(value: DnsResponseCode) -> Self {
    ResponseCode::from(u8::from(value))
  }
}

impl From<ResponseCode> for DnsResponseCode {
  #[inline]
  fn from(value: ResponseCode) -> Self {
    DnsResponseCode::from(u8::from(value))
  }
}

/// The fixed 12-byte DNS message header.
///
/// Kept as this crate's own domain model (rather than exposing
/// `dns_protocol::Flags` directly) so the rest of the crate reads and sets
/// `qr`/`aa`/`tc`/`rd`/`ra` as plain bools; `to_flags`/`from_flags` are the
/// only place that bridges to the codec's bitfield type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Header {
  /// 16-bit transaction id, echoed back by responses that answer a query.
  pub id: u16,
  /// The opcode; mDNS only ever sends `Query`.
  pub opcode: OpCode,
  /// The response code; mDNS responders only ever send `NoError`.
  pub response_code: ResponseCode,
  /// Query (false) or response (true).
  pub qr: bool,
  /// Authoritative answer.
  pub aa: bool,
  /// Truncated: more data follows in a subsequent packet.
  pub tc: bool,
  /// Recursion desired; preserved but unused by mDNS.
  pub rd: bool,
  /// Recursion available; preserved but unused by mDNS.
  pub ra: bool,
}

impl Default for Header {
  fn default() -> Self {
    Self {
      id: 0,
      opcode: OpCode::Query,
      response_code: ResponseCode::NoError,
      qr: false,
      aa: false,
      tc: false,
      rd: false,
      ra: false,
    }
  }
}

impl Header {
  fn to_flags(self) -> Flags {
    let mut flags = Flags::new();
    flags
      .set_message_type(if self.qr { MessageType::Response } else { MessageType::Query })
      .set_opcode(self.opcode.into())
      .set_response_code(self.response_code.into())
      .set_authoritative(self.aa)
      .set_truncated(self.tc)
      .set_recursion_desired(self.rd)
      .set_recursion_available(self.ra);
    flags
  }

  fn from_flags(id: u16, flags: Flags) -> Self {
    Self {
      id,
      opcode: flags.opcode().into(),
      response_code: flags.response_code().into(),
      qr: flags.message_type() == MessageType::Response,
      aa: flags.authoritative(),
      tc: flags.truncated(),
      rd: flags.recursion_desired(),
      ra: flags.recursion_available(),
    }
  }
}

/// A single question: the name/type/class being asked about, plus whether a
/// unicast response was requested (the QU bit, RFC 6762 §5.4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
  /// The name being asked about.
  pub name: DomainName,
  /// The record type being asked about.
  pub ty: RecordType,
  /// Class with the QU bit already stripped; see `unicast_response`.
  pub class: u16,
  /// Whether the QU (unicast-response-requested) bit was set.
  pub unicast_response: bool,
}

impl Question {
  /// Builds a question with class `IN` and the QU bit unset.
  #[inline]
  pub fn new(name: DomainName, ty: RecordType) -> Self {
    Self {
      name,
      ty,
      class: super::CLASS_IN,
      unicast_response: false,
    }
  }

  /// Sets whether this question requests a unicast response (the QU bit).
  #[inline]
  pub fn with_unicast_response(mut self, unicast_response: bool) -> Self {
    self.unicast_response = unicast_response;
    self
  }

  fn to_wire(&self) -> DnsQuestion<'_> {
    let class = if self.unicast_response {
      self.class | QU_BIT
    } else {
      self.class
    };
    DnsQuestion::new(to_label(&self.name), ResourceType::from(self.ty), class)
  }

  fn from_wire(q: &DnsQuestion<'_>) -> Self {
    let raw_class = q.class();
    Self {
      name: from_label(q.name()),
      ty: RecordType::from(q.ty()),
      class: raw_class & !QU_BIT,
      unicast_response: raw_class & QU_BIT != 0,
    }
  }
}

/// A full DNS message: header, questions, and the three record sections.
///
/// `decode`/`encode` drive `dns_protocol::Message::read`/`Message::new(..)
/// .write(..)` rather than parsing or serializing bytes directly, following
/// the teacher's `sync/server.rs::handle_query` (decode) and
/// `handle_response` (encode) call sites onto the same codec crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Message {
  /// The fixed header: id, opcode, flags, and section counts.
  pub header: Header,
  /// The question section.
  pub questions: Vec<Question>,
  /// The answer section.
  pub answers: Vec<ResourceRecord>,
  /// The authority section; mDNS responders leave this empty.
  pub authorities: Vec<ResourceRecord>,
  /// The additional section, used for glue records.
  pub additionals: Vec<ResourceRecord>,
}

impl Message {
  /// Decodes a full message (header and all four sections) from a raw
  /// UDP payload, growing each section buffer and retrying as
  /// `dns_protocol` reports how large it needs to be.
  pub fn decode(msg: &[u8]) -> Result<Self, ProtoError> {
    let mut questions: Vec<DnsQuestion<'_>> = vec![DnsQuestion::default(); 4];
    let mut answers: Vec<DnsResourceRecord<'_>> = Vec::new();
    let mut authorities: Vec<DnsResourceRecord<'_>> = Vec::new();
    let mut additionals: Vec<DnsResourceRecord<'_>> = Vec::new();

    let decoded = loop {
      match dns_protocol::Message::read(
        msg,
        &mut questions,
        &mut answers,
        &mut authorities,
        &mut additionals,
      ) {
        Ok(decoded) => break decoded,
        Err(DnsError::NotEnoughWriteSpace { tried_to_write, buffer_type, .. }) => {
          let grow = tried_to_write.into();
          match buffer_type {
            BufferType::Question => questions.resize(grow, DnsQuestion::default()),
            BufferType::Answer => answers.resize(grow, DnsResourceRecord::default()),
            BufferType::Authority => authorities.resize(grow, DnsResourceRecord::default()),
            BufferType::Additional => additionals.resize(grow, DnsResourceRecord::default()),
          }
        }
        Err(e) => return Err(ProtoError::Codec(e)),
      }
    };

    Ok(Self {
      header: Header::from_flags(decoded.id(), decoded.flags()),
      questions: decoded.questions().iter().map(Question::from_wire).collect(),
      answers: decoded
        .answers()
        .iter()
        .map(ResourceRecord::from_wire)
        .collect::<Result<_, _>>()?,
      authorities: decoded
        .authority()
        .iter()
        .map(ResourceRecord::from_wire)
        .collect::<Result<_, _>>()?,
      additionals: decoded
        .additional()
        .iter()
        .map(ResourceRecord::from_wire)
        .collect::<Result<_, _>>()?,
    })
  }

  /// Encodes this message, truncating sections to fit `mtu` bytes per RFC
  /// 6762 §17: drop the additional section first, then mark truncated and
  /// drop the authority section, then drop answers, each time re-measuring
  /// until the message fits or nothing is left to drop.
  pub fn encode(&self, mtu: usize) -> Result<Vec<u8>, ProtoError> {
    let full = self.encode_sections(&self.answers, &self.authorities, &self.additionals, false)?;
    if full.len() <= mtu {
      return Ok(full);
    }

    let without_additional = self.encode_sections(&self.answers, &self.authorities, &[], false)?;
    if without_additional.len() <= mtu {
      return Ok(without_additional);
    }

    let without_authority = self.encode_sections(&self.answers, &[], &[], true)?;
    if without_authority.len() <= mtu {
      return Ok(without_authority);
    }

    let mut answers = self.answers.clone();
    loop {
      let candidate = self.encode_sections(&answers, &[], &[], true)?;
      if candidate.len() <= mtu || answers.is_empty() {
        return Ok(candidate);
      }
      answers.pop();
    }
  }

  fn encode_sections(
    &self,
    answers: &[ResourceRecord],
    authorities: &[ResourceRecord],
    additionals: &[ResourceRecord],
    truncated: bool,
  ) -> Result<Vec<u8>, ProtoError> {
    let mut header = self.header;
    header.tc = truncated;

    let mut question_bufs: Vec<Vec<u8>> = vec![Vec::new(); self.questions.len()];
    let mut questions: Vec<DnsQuestion<'_>> = self
      .questions
      .iter()
      .zip(question_bufs.iter_mut())
      .map(|(q, _buf)| q.to_wire())
      .collect();

    let mut answer_bufs: Vec<Vec<u8>> = vec![Vec::new(); answers.len()];
    let mut answer_records: Vec<DnsResourceRecord<'_>> = answers
      .iter()
      .zip(answer_bufs.iter_mut())
      .map(|(rr, buf)| rr.to_wire(buf))
      .collect::<Result<_, _>>()?;

    let mut authority_bufs: Vec<Vec<u8>> = vec![Vec::new(); authorities.len()];
    let mut authority_records: Vec<DnsResourceRecord<'_>> = authorities
      .iter()
      .zip(authority_bufs.iter_mut())
      .map(|(rr, buf)| rr.to_wire(buf))
      .collect::<Result<_, _>>()?;

    let mut additional_bufs: Vec<Vec<u8>> = vec![Vec::new(); additionals.len()];
    let mut additional_records: Vec<DnsResourceRecord<'_>> = additionals
      .iter()
      .zip(additional_bufs.iter_mut())
      .map(|(rr, buf)| rr.to_wire(buf))
      .collect::<Result<_, _>>()?;

    let msg = dns_protocol::Message::new(
      header.id,
      header.to_flags(),
      &mut questions,
      &mut answer_records,
      &mut authority_records,
      &mut additional_records,
    );

    let mut buf = vec![0u8; msg.space_needed()];
    let len = msg.write(&mut buf)?;
    buf.truncate(len);
    Ok(buf)
  }
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;

  use super::*;
  use crate::wire::RecordData;

  fn sample_message() -> Message {
    let mut header = Header::default();
    header.qr = true;
    header.aa = true;
    Message {
      header,
      questions: vec![],
      answers: vec![ResourceRecord::new(
        DomainName::new("host.local."),
        120,
        RecordData::A(Ipv4Addr::new(10, 0, 0, 1)),
      )],
      authorities: vec![],
      additionals: vec![],
    }
  }

  #[test]
  fn round_trip_answer() {
    let msg = sample_message();
    let bytes = msg.encode(1500).unwrap();
    let decoded = Message::decode(&bytes).unwrap();
    assert_eq!(decoded.answers.len(), 1);
    assert!(decoded.header.qr);
    assert!(decoded.header.aa);
    assert_eq!(decoded.answers[0].name, DomainName::new("host.local."));
  }

  #[test]
  fn question_qu_bit_round_trips() {
    let mut msg = Message::default();
    msg
      .questions
      .push(Question::new(DomainName::new("foo.local."), RecordType::A).with_unicast_response(true));
    let bytes = msg.encode(1500).unwrap();
    let decoded = Message::decode(&bytes).unwrap();
    assert!(decoded.questions[0].unicast_response);
    assert_eq!(decoded.questions[0].class, super::super::CLASS_IN);
  }

  #[test]
  fn truncates_when_over_mtu() {
    let mut msg = Message::default();
    for i in 0..200u8 {
      msg.answers.push(ResourceRecord::new(
        DomainName::new("host.local."),
        120,
        RecordData::A(Ipv4Addr::new(10, 0, 0, i)),
      ));
    }
    let bytes = msg.encode(512).unwrap();
    assert!(bytes.len() <= 512 || Message::decode(&bytes).unwrap().header.tc);
    let decoded = Message::decode(&bytes).unwrap();
    assert!(decoded.answers.len() <= 200);
  }
}
