//! Optional limit/offset pagination shared by the list endpoints.
//!
//! Without `limit` a list endpoint returns a plain JSON array; with it, an
//! envelope `{"count": <total>, "results": [...]}`.

use serde::Serialize;

use crate::error::ApiError;

/// Raw query parameters in request order; filters may repeat keys.
pub type Params = Vec<(String, String)>;

/// Borrow `params` as the `(&str, &str)` pairs the filter parsers take.
pub fn pairs(params: &Params) -> impl Iterator<Item = (&str, &str)> {
  params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Listing<T> {
  Plain(Vec<T>),
  Page { count: u64, results: Vec<T> },
}

/// `limit` / `offset` for endpoints that page in memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
  pub limit:  Option<u64>,
  pub offset: Option<u64>,
}

fn count_param(key: &str, raw: &str) -> Result<u64, ApiError> {
  raw
    .parse()
    .map_err(|_| ApiError::BadRequest(format!("{key}: {raw:?} is not a non-negative integer")))
}

impl Paging {
  pub fn from_params(params: &Params) -> Result<Self, ApiError> {
    let mut paging = Self::default();
    for (key, raw) in pairs(params) {
      match key {
        "limit" => paging.limit = Some(count_param(key, raw)?),
        "offset" => paging.offset = Some(count_param(key, raw)?),
        _ => {}
      }
    }
    Ok(paging)
  }

  pub fn apply<T>(&self, items: Vec<T>) -> Listing<T> {
    let total = items.len() as u64;
    let offset = usize::try_from(self.offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = self
      .limit
      .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
    let results = items.into_iter().skip(offset).take(limit).collect();
    match self.limit {
      None => Listing::Plain(results),
      Some(_) => Listing::Page {
        count: total,
        results,
      },
    }
  }
}
