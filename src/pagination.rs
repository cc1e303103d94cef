use serde::Serialize;
use std::cmp::{max, min};

const DEFAULT_LIMIT: i64 = 50;
const MAXIMUM_LIMIT: i64 = 100;

/// Limit/offset window over an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
  pub limit: i64,
  pub offset: i64,
}

impl Page {
  pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
    Page {
      limit: limit.map(|l| max(min(MAXIMUM_LIMIT, l), 1)).unwrap_or(DEFAULT_LIMIT),
      offset: max(offset.unwrap_or(0), 0),
    }
  }
}

#[derive(Serialize, Debug)]
pub struct PaginatedResult<T> {
  pub items: Vec<T>,
  pub limit: i64,
  pub offset: i64,
}

impl<T> PaginatedResult<T> {
  pub fn new(items: Vec<T>, page: Page) -> Self {
    PaginatedResult { items, limit: page.limit, offset: page.offset }
  }
}
