//! Record catalog and name server: the authoritative store of every record
//! this responder advertises, and the question-answering logic over it.
//!
//! Grounded in the teacher's `zone.rs` `Zone::records` dispatch
//! (`service_enum`/`service_records`/`instance_records`), generalized from a
//! single fixed `Service` zone keyed by exact name match into a real
//! multi-entry catalog keyed by [`DomainName`], since `spec.md` §4.D requires
//! holding records for an arbitrary number of advertised profiles rather than
//! one.

use std::{collections::HashMap, net::IpAddr};

use tokio::sync::RwLock;
use tracing::trace;

use crate::{
  config::DEFAULT_TTL,
  name::DomainName,
  wire::{Message, RecordData, RecordType, ResourceRecord},
};

/// One record held in the catalog, with the bookkeeping the name server
/// needs to decide how to answer with it.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
  /// The record itself.
  pub record: ResourceRecord,
  /// Whether this responder speaks authoritatively for this name (sets
  /// AA=1 in replies). `false` for records cached from other hosts, which
  /// this engine does not currently populate but the type accommodates.
  pub authoritative: bool,
  /// Whether this name is believed uniquely owned by this responder
  /// (controls the cache-flush bit on answers, RFC 6762 §10.2).
  pub unique: bool,
}

impl CatalogEntry {
  /// Wraps a record with its authoritative/unique bookkeeping bits.
  pub fn new(record: ResourceRecord, authoritative: bool, unique: bool) -> Self {
    Self {
      record,
      authoritative,
      unique,
    }
  }
}

/// Status of a name-server lookup, mirrored onto the response header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
  /// At least one question matched a catalog entry.
  NoError,
  /// No question matched any name in the catalog.
  NameError,
  /// Reserved for future use; this engine never returns it today.
  Refused,
}

/// The outcome of resolving a request against the catalog.
#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
  /// Records placed in the response's answer section.
  pub answers: Vec<ResourceRecord>,
  /// Glue records (SRV target address, TXT) placed in the additional section.
  pub additional: Vec<ResourceRecord>,
  /// Whether any matched entry was authoritative (sets AA=1 on the reply).
  pub authoritative: bool,
}

const DNS_SD_META_QUERY: &str = "_services._dns-sd._udp.local.";

/// The authoritative record store. Entries are grouped by owner name; a
/// name may carry several records (e.g. both an A and an AAAA, or several
/// PTRs for the same service name from different instances).
pub struct Catalog {
  entries: RwLock<HashMap<DomainName, Vec<CatalogEntry>>>,
}

impl Default for Catalog {
  fn default() -> Self {
    Self::new()
  }
}

impl Catalog {
  /// Builds an empty catalog.
  pub fn new() -> Self {
    Self {
      entries: RwLock::new(HashMap::new()),
    }
  }

  /// Inserts `record`, replacing any existing entry with the same name,
  /// type and rdata (idempotent re-advertisement). If `record` is an A or
  /// AAAA record, also derives and inserts its reverse-lookup PTR.
  pub async fn add(&self, record: ResourceRecord, authoritative: bool, unique: bool) {
    let reverse = derive_reverse_ptr(&record);
    let mut entries = self.entries.write().await;
    insert_unique(&mut entries, CatalogEntry::new(record, authoritative, unique));
    if let Some(reverse) = reverse {
      insert_unique(&mut entries, CatalogEntry::new(reverse, authoritative, unique));
    }
  }

  /// Removes every entry under `name`. Returns the removed entries, if any.
  pub async fn try_remove(&self, name: &DomainName) -> Vec<CatalogEntry> {
    self.entries.write().await.remove(name).unwrap_or_default()
  }

  /// Removes a single record matching `(name, data)`, leaving any other
  /// record under `name` untouched — unlike `try_remove`, which drops the
  /// whole bucket and would also take down e.g. sibling instances' PTRs
  /// sharing the same service name.
  pub async fn remove_record(&self, name: &DomainName, data: &RecordData) -> Option<CatalogEntry> {
    let mut entries = self.entries.write().await;
    let bucket = entries.get_mut(name)?;
    let idx = bucket.iter().position(|entry| &entry.record.data == data)?;
    let removed = bucket.remove(idx);
    if bucket.is_empty() {
      entries.remove(name);
    }
    Some(removed)
  }

  /// Recomputes reverse-lookup PTRs for every A/AAAA record currently in
  /// the catalog. Idempotent: existing, still-correct reverse PTRs are left
  /// untouched (`insert_unique` replaces by key, not by append).
  pub async fn include_reverse_lookup_records(&self) {
    let mut entries = self.entries.write().await;
    let reverses: Vec<CatalogEntry> = entries
      .values()
      .flatten()
      .filter_map(|entry| {
        derive_reverse_ptr(&entry.record)
          .map(|rr| CatalogEntry::new(rr, entry.authoritative, entry.unique))
      })
      .collect();
    for entry in reverses {
      insert_unique(&mut entries, entry);
    }
  }

  /// Answers every question in `request`, following SRV/PTR glue rules and
  /// the DNS-SD meta-query special case. When `negative_responses` is set,
  /// a question whose name exists in the catalog but whose type doesn't is
  /// answered with an NSEC record listing the types actually present there
  /// (RFC 4034 §4.1), rather than being silently skipped.
  pub async fn resolve(&self, request: &Message, answer_all_questions: bool, negative_responses: bool) -> (Status, ResolveOutcome) {
    let entries = self.entries.read().await;
    let mut outcome = ResolveOutcome::default();
    let mut any_matched = false;
    let mut is_meta_query = false;

    for question in &request.questions {
      let Some(bucket) = entries.get(&question.name) else {
        continue;
      };
      let matches: Vec<&CatalogEntry> = bucket
        .iter()
        .filter(|entry| entry.record.ty().matches(question.ty))
        .collect();
      if matches.is_empty() {
        if negative_responses {
          any_matched = true;
          outcome.answers.push(nsec_for(&question.name, bucket));
        }
        if !answer_all_questions {
          break;
        }
        continue;
      }

      any_matched = true;
      if question.name.as_str().eq_ignore_ascii_case(DNS_SD_META_QUERY) {
        is_meta_query = true;
      }
      if matches.iter().any(|e| e.authoritative) {
        outcome.authoritative = true;
      }

      for entry in matches {
        outcome.answers.push(entry.record.clone());
        append_glue(&entries, &entry.record, &mut outcome.additional);
      }

      if !answer_all_questions {
        break;
      }
    }

    if is_meta_query {
      trace!("clearing additional section for DNS-SD meta-query response");
      outcome.additional.clear();
    }

    let status = if any_matched { Status::NoError } else { Status::NameError };
    (status, outcome)
  }
}

/// Replaces any existing entry with the same (name, type, rdata), otherwise
/// appends. Keeps re-advertising a profile from turning into an ever-growing
/// duplicate list.
fn insert_unique(entries: &mut HashMap<DomainName, Vec<CatalogEntry>>, entry: CatalogEntry) {
  let bucket = entries.entry(entry.record.name.clone()).or_default();
  if let Some(existing) = bucket
    .iter_mut()
    .find(|e| e.record.ty() == entry.record.ty() && e.record.data == entry.record.data)
  {
    *existing = entry;
  } else {
    bucket.push(entry);
  }
}

/// Appends additional-section glue for `record`'s type, per the teacher's
/// `Service::instance_records` dispatch: an SRV answer pulls in the target's
/// A/AAAA and the instance's TXT; a PTR answer pulls in the target's full
/// instance record set.
fn append_glue(entries: &HashMap<DomainName, Vec<CatalogEntry>>, record: &ResourceRecord, additional: &mut Vec<ResourceRecord>) {
  match &record.data {
    RecordData::Srv { target, .. } => {
      if let Some(bucket) = entries.get(target) {
        for entry in bucket {
          if matches!(entry.record.ty(), RecordType::A | RecordType::Aaaa) {
            additional.push(entry.record.clone());
          }
        }
      }
      if let Some(bucket) = entries.get(&record.name) {
        for entry in bucket {
          if entry.record.ty() == RecordType::Txt {
            additional.push(entry.record.clone());
          }
        }
      }
    }
    RecordData::Ptr(target) => {
      if let Some(bucket) = entries.get(target) {
        for entry in bucket {
          if matches!(entry.record.ty(), RecordType::Srv | RecordType::Txt) {
            additional.push(entry.record.clone());
          }
          if entry.record.ty() == RecordType::Srv {
            if let RecordData::Srv { target: host, .. } = &entry.record.data {
              if let Some(host_bucket) = entries.get(host) {
                for host_entry in host_bucket {
                  if matches!(host_entry.record.ty(), RecordType::A | RecordType::Aaaa) {
                    additional.push(host_entry.record.clone());
                  }
                }
              }
            }
          }
        }
      }
    }
    _ => {}
  }
}

/// Derives the `in-addr.arpa.`/`ip6.arpa.` reverse-lookup PTR for an A or
/// AAAA record, per RFC 6762 §6.2. Returns `None` for every other type.
fn derive_reverse_ptr(record: &ResourceRecord) -> Option<ResourceRecord> {
  let ip = match &record.data {
    RecordData::A(ip) => IpAddr::V4(*ip),
    RecordData::Aaaa(ip) => IpAddr::V6(*ip),
    _ => return None,
  };
  let name = reverse_ptr_name(ip);
  Some(
    ResourceRecord::new(name, DEFAULT_TTL, RecordData::Ptr(record.name.clone()))
      .with_cache_flush(record.cache_flush),
  )
}

/// Builds the NSEC record asserting that `name` carries exactly the types
/// present in `bucket` (so any type not listed there is proven absent).
/// The cache-flush bit follows the bucket's own records: unique if any
/// entry at this name is unique.
fn nsec_for(name: &DomainName, bucket: &[CatalogEntry]) -> ResourceRecord {
  let types: Vec<RecordType> = bucket.iter().map(|entry| entry.record.ty()).collect();
  let unique = bucket.iter().any(|entry| entry.unique);
  ResourceRecord::new(
    name.clone(),
    DEFAULT_TTL,
    RecordData::Nsec {
      next: name.clone(),
      types,
    },
  )
  .with_cache_flush(unique)
}

fn reverse_ptr_name(ip: IpAddr) -> DomainName {
  match ip {
    IpAddr::V4(v4) => {
      let o = v4.octets();
      DomainName::new(format!("{}.{}.{}.{}.in-addr.arpa.", o[3], o[2], o[1], o[0]))
    }
    IpAddr::V6(v6) => {
      let mut labels = String::new();
      for byte in v6.octets().iter().rev() {
        labels.push_str(&format!("{:x}.{:x}.", byte & 0x0F, byte >> 4));
      }
      DomainName::new(format!("{labels}ip6.arpa."))
    }
  }
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;

  use super::*;
  use crate::wire::Question;

  fn a_record(name: &str, ip: Ipv4Addr) -> ResourceRecord {
    ResourceRecord::new(DomainName::new(name), DEFAULT_TTL, RecordData::A(ip))
  }

  #[tokio::test]
  async fn add_derives_reverse_ptr() {
    let catalog = Catalog::new();
    catalog
      .add(a_record("host.local.", Ipv4Addr::new(192, 0, 2, 5)), true, true)
      .await;

    let mut request = Message::default();
    request.questions.push(Question::new(
      DomainName::new("5.2.0.192.in-addr.arpa."),
      RecordType::Ptr,
    ));
    let (status, outcome) = catalog.resolve(&request, true, false).await;
    assert_eq!(status, Status::NoError);
    assert_eq!(outcome.answers.len(), 1);
    assert_eq!(
      outcome.answers[0].data,
      RecordData::Ptr(DomainName::new("host.local."))
    );
  }

  #[tokio::test]
  async fn meta_query_clears_additional() {
    let catalog = Catalog::new();
    catalog
      .add(
        ResourceRecord::new(
          DomainName::new(DNS_SD_META_QUERY),
          DEFAULT_TTL,
          RecordData::Ptr(DomainName::new("_foo._tcp.local.")),
        ),
        true,
        false,
      )
      .await;

    let mut request = Message::default();
    request
      .questions
      .push(Question::new(DomainName::new(DNS_SD_META_QUERY), RecordType::Ptr));
    let (_, outcome) = catalog.resolve(&request, true, false).await;
    assert!(outcome.additional.is_empty());
  }

  #[tokio::test]
  async fn unmatched_name_is_name_error() {
    let catalog = Catalog::new();
    let mut request = Message::default();
    request
      .questions
      .push(Question::new(DomainName::new("nothing.local."), RecordType::A));
    let (status, outcome) = catalog.resolve(&request, true, false).await;
    assert_eq!(status, Status::NameError);
    assert!(outcome.answers.is_empty());
  }

  #[tokio::test]
  async fn try_remove_clears_bucket() {
    let catalog = Catalog::new();
    catalog
      .add(a_record("host.local.", Ipv4Addr::new(192, 0, 2, 5)), true, true)
      .await;
    let removed = catalog.try_remove(&DomainName::new("host.local.")).await;
    assert_eq!(removed.len(), 1);

    let mut request = Message::default();
    request
      .questions
      .push(Question::new(DomainName::new("host.local."), RecordType::A));
    let (status, _) = catalog.resolve(&request, true, false).await;
    assert_eq!(status, Status::NameError);
  }

  #[tokio::test]
  async fn negative_response_emits_nsec_for_existing_name() {
    let catalog = Catalog::new();
    catalog
      .add(a_record("host.local.", Ipv4Addr::new(192, 0, 2, 5)), true, true)
      .await;

    let mut request = Message::default();
    request
      .questions
      .push(Question::new(DomainName::new("host.local."), RecordType::Txt));
    let (status, outcome) = catalog.resolve(&request, true, true).await;
    assert_eq!(status, Status::NoError);
    assert_eq!(outcome.answers.len(), 1);
    assert!(matches!(outcome.answers[0].data, RecordData::Nsec { ref types, .. } if types == &[RecordType::A]));
  }

  #[tokio::test]
  async fn negative_response_disabled_drops_unmatched_type() {
    let catalog = Catalog::new();
    catalog
      .add(a_record("host.local.", Ipv4Addr::new(192, 0, 2, 5)), true, true)
      .await;

    let mut request = Message::default();
    request
      .questions
      .push(Question::new(DomainName::new("host.local."), RecordType::Txt));
    let (status, outcome) = catalog.resolve(&request, true, false).await;
    assert_eq!(status, Status::NameError);
    assert!(outcome.answers.is_empty());
  }
}
