//! Query keys: ordered tuples identifying a logical query.

use std::fmt;

/// Key of a cached query, e.g. `["leaves", "requests", "confirm", "5"]`.
///
/// Prefix matching is element-wise, so `["leave"]` is not a prefix of `["leaves"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  pub fn new<I, S>(parts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(parts.into_iter().map(Into::into).collect())
  }

  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.0.join(", "))
  }
}

/// Build a [`QueryKey`] from anything `Display`: `query_key!("leaves", "requests", limit)`.
macro_rules! query_key {
  ($($part:expr),+ $(,)?) => {
    $crate::cache::QueryKey::new([$($part.to_string()),+])
  };
}

pub(crate) use query_key;
