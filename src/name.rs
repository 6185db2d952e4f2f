use core::{
  fmt,
  hash::{Hash, Hasher},
  str::FromStr,
};

use smol_str::{format_smolstr, SmolStr};

/// A fully- or partially-qualified DNS domain name.
///
/// Backed by [`SmolStr`], matching the teacher's use of `SmolStr` for names
/// throughout `zone.rs`/`client.rs`. Unlike the teacher's bare `SmolStr`
/// comparisons, equality and hashing here are case-insensitive over labels,
/// while the original case is preserved for on-wire encoding — per the
/// invariant that comparison/hashing is case-insensitive but the wire form
/// preserves case.
#[derive(Debug, Clone, Default)]
pub struct DomainName(SmolStr);

impl DomainName {
  /// The "local." domain every mDNS-reachable name lives under.
  pub const LOCAL: &'static str = "local.";

  /// Wraps a string as a [`DomainName`] without validation.
  #[inline]
  pub fn new(s: impl AsRef<str>) -> Self {
    Self(SmolStr::new(s.as_ref()))
  }

  /// Returns the `local.` domain.
  #[inline]
  pub fn local() -> Self {
    Self(SmolStr::new(Self::LOCAL))
  }

  /// Returns the on-wire string form, case preserved.
  #[inline]
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Returns whether this name ends in a trailing dot.
  #[inline]
  pub fn is_fqdn(&self) -> bool {
    self.0.ends_with('.')
  }

  /// Iterates the name's labels, root label excluded, in on-wire order.
  #[inline]
  pub fn labels(&self) -> impl Iterator<Item = &str> + Clone {
    self
      .0
      .trim_end_matches('.')
      .split('.')
      .filter(|label| !label.is_empty())
  }

  /// Returns whether `self` is `other` or a descendant of `other`, e.g.
  /// `x._foo._tcp.local.` `.is_subdomain_of` `_foo._tcp.local.`.
  pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
    let mine: Vec<&str> = self.labels().collect();
    let theirs: Vec<&str> = other.labels().collect();
    if theirs.len() > mine.len() {
      return false;
    }
    let offset = mine.len() - theirs.len();
    mine[offset..]
      .iter()
      .zip(theirs.iter())
      .all(|(a, b)| a.eq_ignore_ascii_case(b))
  }

  /// Joins `label` onto the front of this name, e.g.
  /// `DomainName::new("_foo._tcp.local.").prepend("x")` yields
  /// `x._foo._tcp.local.`.
  pub fn prepend(&self, label: &str) -> DomainName {
    DomainName(format_smolstr!(
      "{}.{}",
      label.trim_matches('.'),
      self.0.trim_start_matches('.')
    ))
  }

  /// Joins two names into one FQDN, e.g. `_foo._tcp` joined with `local.`
  /// yields `_foo._tcp.local.`.
  pub fn join(&self, domain: &DomainName) -> DomainName {
    DomainName(format_smolstr!(
      "{}.{}.",
      self.0.trim_matches('.'),
      domain.0.trim_matches('.')
    ))
  }
}

impl PartialEq for DomainName {
  fn eq(&self, other: &Self) -> bool {
    let mut a = self.labels();
    let mut b = other.labels();
    loop {
      match (a.next(), b.next()) {
        (Some(x), Some(y)) if x.eq_ignore_ascii_case(y) => continue,
        (None, None) => return true,
        _ => return false,
      }
    }
  }
}

impl Eq for DomainName {}

impl Hash for DomainName {
  fn hash<H: Hasher>(&self, state: &mut H) {
    for label in self.labels() {
      for b in label.bytes() {
        state.write_u8(b.to_ascii_lowercase());
      }
      state.write_u8(b'.');
    }
  }
}

impl fmt::Display for DomainName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for DomainName {
  #[inline]
  fn from(s: &str) -> Self {
    Self::new(s)
  }
}

impl From<SmolStr> for DomainName {
  #[inline]
  fn from(s: SmolStr) -> Self {
    Self(s)
  }
}

impl From<String> for DomainName {
  #[inline]
  fn from(s: String) -> Self {
    Self(SmolStr::new(s))
  }
}

impl FromStr for DomainName {
  type Err = core::convert::Infallible;

  #[inline]
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self::new(s))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn case_insensitive_eq() {
    assert_eq!(DomainName::new("Foo.Local."), DomainName::new("foo.local."));
    assert_ne!(DomainName::new("foo.local."), DomainName::new("bar.local."));
  }

  #[test]
  fn subdomain() {
    let parent = DomainName::new("_foo._tcp.local.");
    let child = DomainName::new("x._foo._tcp.local.");
    assert!(child.is_subdomain_of(&parent));
    assert!(!parent.is_subdomain_of(&child));
    assert!(parent.is_subdomain_of(&parent));
  }

  #[test]
  fn join_and_prepend() {
    let service = DomainName::new("_foo._tcp");
    let domain = DomainName::local();
    let qualified = service.join(&domain);
    assert_eq!(qualified, DomainName::new("_foo._tcp.local."));
    let instance = qualified.prepend("x");
    assert_eq!(instance, DomainName::new("x._foo._tcp.local."));
  }
}
