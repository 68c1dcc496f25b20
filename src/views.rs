// Derived, read-only views over document collections
//
// Everything here is a pure function of its inputs; nothing mutates or
// caches. Callers pass slices borrowed from `Store::list`.

use crate::error::{Refusal, ValidationError};
use crate::record::{Amount, Record};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Label shown for a reference whose target no longer exists
pub const UNKNOWN: &str = "Unknown";

// ============================================================================
// Period filter
// ============================================================================

/// A calendar month, keyed as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, ValidationError> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(ValidationError::BadPeriod(format!("{}-{}", year, month)));
        }
        Ok(Self { year, month })
    }

    /// The month containing today's local date
    pub fn current() -> Self {
        Self::of(Local::now().date_naive())
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// `YYYY-MM`
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// Whether an ISO-8601 date or date-time string falls in this month
    pub fn contains(&self, date: &str) -> bool {
        date.get(..7).is_some_and(|prefix| prefix == self.key())
    }

    /// First through last day of the month
    pub fn range(&self) -> DateRange {
        let start = NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN);
        let next = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        };
        let end = next.and_then(|d| d.pred_opt()).unwrap_or(start);
        DateRange { start, end }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValidationError::BadPeriod(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(bad)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(bad());
        }
        let year: i32 = year.parse().map_err(|_| bad())?;
        let month: u32 = month.parse().map_err(|_| bad())?;
        Period::new(year, month).map_err(|_| bad())
    }
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Whether the date part of an ISO-8601 string lies inside the range.
    /// Unparsable dates are outside every range.
    pub fn contains(&self, date: &str) -> bool {
        date.get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .is_some_and(|d| self.start <= d && d <= self.end)
    }
}

/// Records whose date field falls in `period`
pub fn in_period<'a, T>(records: &'a [T], period: &Period, date: impl Fn(&T) -> &str) -> Vec<&'a T> {
    records.iter().filter(|r| period.contains(date(*r))).collect()
}

/// Records whose date field falls in `range`
pub fn in_range<'a, T>(records: &'a [T], range: &DateRange, date: impl Fn(&T) -> &str) -> Vec<&'a T> {
    records.iter().filter(|r| range.contains(date(*r))).collect()
}

// ============================================================================
// Group aggregate
// ============================================================================

/// Per-group sums, kept in the order groups were first seen
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTotals {
    entries: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl GroupTotals {
    pub fn add(&mut self, key: &str, amount: f64) {
        let amount = Amount::new(amount).value();
        match self.index.get(key) {
            Some(&i) => self.entries[i].1 += amount,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), amount));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Groups in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Sum of every group
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v).sum()
    }

    /// Largest `n` groups, descending; equal totals keep first-seen order
    pub fn top(&self, n: usize) -> Vec<(&str, f64)> {
        let mut rows: Vec<(&str, f64)> = self.iter().collect();
        rows.sort_by(|a, b| b.1.total_cmp(&a.1));
        rows.truncate(n);
        rows
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        self.entries.iter().cloned().collect()
    }
}

/// Partition records by `key` and sum `amount` per partition
pub fn group_sum<'a, T: 'a>(
    records: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&T) -> &str,
    amount: impl Fn(&T) -> f64,
) -> GroupTotals {
    let mut totals = GroupTotals::default();
    for record in records {
        totals.add(key(record), amount(record));
    }
    totals
}

/// Sum `amount` over records, treating non-finite values as zero
pub fn sum<'a, T: 'a>(records: impl IntoIterator<Item = &'a T>, amount: impl Fn(&T) -> f64) -> f64 {
    records.into_iter().map(|r| Amount::new(amount(r)).value()).sum()
}

/// Percentage `amount` makes of `total`; zero when there is no total
pub fn share_pct(amount: f64, total: f64) -> f64 {
    if total == 0.0 { 0.0 } else { amount / total * 100.0 }
}

// ============================================================================
// Cross-reference resolve
// ============================================================================

/// Look up a referenced record; `None` for dangling references
pub fn resolve<'a, T: Record>(records: &'a [T], id: &str) -> Option<&'a T> {
    records.iter().find(|r| r.id() == id)
}

/// Display label of a referenced record, or [`UNKNOWN`]
pub fn label<'a, T: Record>(records: &'a [T], id: &str, name: impl Fn(&'a T) -> &'a str) -> &'a str {
    resolve(records, id).map(name).unwrap_or(UNKNOWN)
}

// ============================================================================
// Duplicate / conflict check
// ============================================================================

/// Trim and collapse internal whitespace
pub fn tidy_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison key for names: whitespace-collapsed and lowercased
pub fn normalize_name(name: &str) -> String {
    tidy_name(name).to_lowercase()
}

/// Existing record whose normalized name equals `candidate`'s
pub fn find_duplicate<'a, T: Record>(existing: &'a [T], candidate: &str, name: impl Fn(&T) -> &str) -> Option<&'a T> {
    let key = normalize_name(candidate);
    existing.iter().find(|r| normalize_name(name(*r)) == key)
}

/// Insert check refusing records whose normalized name already exists
pub fn unique_name<T: Record>(name: fn(&T) -> &str) -> impl Fn(&T, &[T]) -> Option<Refusal> {
    move |candidate: &T, existing: &[T]| {
        find_duplicate(existing, name(candidate), name).map(|found| Refusal::Duplicate {
            collection: T::collection_name().to_string(),
            key: normalize_name(name(candidate)),
            existing_id: found.id().to_string(),
        })
    }
}

/// First record booked on the same `resource` less than `window` away from
/// `candidate`, as a conflict refusal
pub fn schedule_conflict<T: Record>(
    existing: &[T],
    candidate: &T,
    window: Duration,
    resource: impl Fn(&T) -> &str,
    at: impl Fn(&T) -> DateTime<Utc>,
) -> Option<Refusal> {
    let when = at(candidate);
    existing
        .iter()
        .filter(|e| e.id() != candidate.id() || candidate.id().is_empty())
        .filter(|e| resource(*e) == resource(candidate))
        .find(|e| (at(*e) - when).abs() < window)
        .map(|e| Refusal::Conflict {
            collection: T::collection_name().to_string(),
            existing_id: e.id().to_string(),
            reason: format!(
                "{} is booked at {} (within {} minutes)",
                resource(candidate),
                at(e).format("%Y-%m-%d %H:%M"),
                window.num_minutes()
            ),
        })
}

// ============================================================================
// Search
// ============================================================================

/// Case-insensitive substring search; an empty query matches everything
pub fn search<'a, T>(records: &'a [T], query: &str, field: impl Fn(&T) -> &str) -> Vec<&'a T> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return records.iter().collect();
    }
    records.iter().filter(|r| field(*r).to_lowercase().contains(&q)).collect()
}

// ============================================================================
// Progress ratio
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Under,
    Near,
    Over,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Under => write!(f, "under"),
            Tier::Near => write!(f, "near"),
            Tier::Over => write!(f, "over"),
        }
    }
}

/// Tier boundaries and clamp ceiling, in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressScale {
    pub near_pct: f64,
    pub over_pct: f64,
    pub ceiling_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// Clamped to `[0, ceiling]`
    pub percent: f64,
    pub tier: Tier,
}

impl Progress {
    /// Percentage for a bar that cannot overflow
    pub fn bar_percent(&self) -> f64 {
        self.percent.min(100.0)
    }
}

impl ProgressScale {
    pub fn measure(&self, current: f64, limit: f64) -> Progress {
        let current = Amount::new(current).value();
        let limit = Amount::new(limit).value();

        let raw = if limit > 0.0 {
            current / limit * 100.0
        } else if current > 0.0 {
            self.ceiling_pct
        } else {
            0.0
        };
        // f64::max drops NaN, so a NaN ratio or ceiling reads as 0
        let percent = raw.max(0.0).min(self.ceiling_pct.max(0.0));

        let tier = if percent >= self.over_pct {
            Tier::Over
        } else if percent >= self.near_pct {
            Tier::Near
        } else {
            Tier::Under
        };

        Progress { percent, tier }
    }
}
