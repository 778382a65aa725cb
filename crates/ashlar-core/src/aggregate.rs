//! Aggregations over filtered records.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Day of week with Sunday = 1 through Saturday = 7.
pub fn day_of_week(at: DateTime<Utc>) -> u32 { at.weekday().number_from_sunday() }

/// Number of records sharing one (hour of day, day of week) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToddowBucket {
  /// Hour of `occurred_from`, 0-23, UTC.
  pub tod:   u32,
  /// See [`day_of_week`].
  pub dow:   u32,
  pub count: u64,
}

/// Bucket records by hour and weekday of `occurred_from`, ordered by
/// `(tod, dow)`. Pairs with no records are omitted.
pub fn toddow<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<ToddowBucket> {
  let mut buckets = BTreeMap::<(u32, u32), u64>::new();
  for record in records {
    let at = record.occurred_from;
    *buckets.entry((at.hour(), day_of_week(at))).or_default() += 1;
  }
  buckets
    .into_iter()
    .map(|((tod, dow), count)| ToddowBucket { tod, dow, count })
    .collect()
}

/// The trailing windows reported by recent counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecentWindow {
  Month,
  Quarter,
  Year,
}

impl RecentWindow {
  pub const ALL: [RecentWindow; 3] = [Self::Month, Self::Quarter, Self::Year];

  pub fn days(&self) -> i64 {
    match self {
      Self::Month => 30,
      Self::Quarter => 90,
      Self::Year => 365,
    }
  }

  /// Earliest `occurred_from` inside the window ending at `now`.
  pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> { now - Duration::days(self.days()) }
}

/// Records of one type whose `occurred_from` falls in `[now - window, now]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentCounts {
  pub month:   u64,
  pub quarter: u64,
  pub year:    u64,
}

impl RecentCounts {
  pub fn get(&self, window: RecentWindow) -> u64 {
    match window {
      RecentWindow::Month => self.month,
      RecentWindow::Quarter => self.quarter,
      RecentWindow::Year => self.year,
    }
  }

  pub fn set(&mut self, window: RecentWindow, count: u64) {
    match window {
      RecentWindow::Month => self.month = count,
      RecentWindow::Quarter => self.quarter = count,
      RecentWindow::Year => self.year = count,
    }
  }

  /// Count in memory over records of a single type.
  pub fn tally<'a>(records: impl IntoIterator<Item = &'a Record>, now: DateTime<Utc>) -> Self {
    let mut counts = Self::default();
    for record in records {
      for window in RecentWindow::ALL {
        if (window.start(now)..=now).contains(&record.occurred_from) {
          counts.set(window, counts.get(window) + 1);
        }
      }
    }
    counts
  }
}
