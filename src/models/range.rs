use crate::error::{AppError, Result};
use chrono::{Duration, NaiveDate};
use std::fmt;

/// Inclusive calendar date range, always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AppError::Range { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// The `days` most recent dates ending at `today`.
    pub fn last_n_days(days: u32, today: NaiveDate) -> Result<Self> {
        if days == 0 {
            return Err(AppError::InvalidInput("--days must be at least 1".into()));
        }
        let start = today
            .checked_sub_signed(Duration::days(i64::from(days) - 1))
            .ok_or_else(|| AppError::InvalidInput(format!("--days {} reaches past the calendar", days)))?;
        Self::new(start, today)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Dates in ascending order.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.len_days())
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} → {}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_range_error_iff_start_after_end() {
        assert!(DateRange::new(d("2025-12-24"), d("2025-12-24")).is_ok());
        assert!(DateRange::new(d("2025-12-01"), d("2025-12-24")).is_ok());

        let err = DateRange::new(d("2025-12-25"), d("2025-12-24")).unwrap_err();
        assert!(matches!(err, AppError::Range { .. }));
    }

    #[test]
    fn test_days_ascending_and_inclusive() {
        let range = DateRange::new(d("2025-12-30"), d("2026-01-02")).unwrap();
        let days: Vec<NaiveDate> = range.days().collect();
        assert_eq!(
            days,
            vec![d("2025-12-30"), d("2025-12-31"), d("2026-01-01"), d("2026-01-02")]
        );
        assert_eq!(range.len_days(), 4);
        assert!(range.contains(d("2026-01-01")));
        assert!(!range.contains(d("2026-01-03")));
    }

    #[test]
    fn test_last_n_days() {
        let range = DateRange::last_n_days(7, d("2025-12-24")).unwrap();
        assert_eq!(range.start(), d("2025-12-18"));
        assert_eq!(range.end(), d("2025-12-24"));
        assert_eq!(range.days().count(), 7);

        assert!(DateRange::last_n_days(0, d("2025-12-24")).is_err());
    }

    #[test]
    fn test_last_n_days_too_large_is_input_error() {
        let err = DateRange::last_n_days(200_000_000, d("2025-12-24")).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let range = DateRange::last_n_days(u32::MAX, NaiveDate::MAX);
        assert!(matches!(range, Err(AppError::InvalidInput(_))));
    }
}
