//! Once-a-day trigger for the today pipeline.

use crate::error::{AppError, Result};
use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
use std::future::Future;
use tracing::{error, info};

/// `HH:MM`, 24-hour clock.
pub fn parse_schedule_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| AppError::InvalidInput(format!("schedule time `{}` is not HH:MM", s)))
}

/// First moment strictly after `now` whose wall-clock time is `at`.
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now { today } else { today + Duration::days(1) }
}

/// Run `job` every day at `at` local time, forever. Failures are logged and
/// the loop keeps going.
pub async fn run_daily<F, Fut>(at: NaiveTime, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        let now = Local::now().naive_local();
        let next = next_run_after(now, at);
        info!("Next scheduled run at {}", next.format("%Y-%m-%d %H:%M"));

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        if let Err(e) = job().await {
            error!("Scheduled run failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(date: &str, hm: &str) -> NaiveDateTime {
        date.parse::<NaiveDate>().unwrap().and_time(parse_schedule_time(hm).unwrap())
    }

    #[test]
    fn test_parse_schedule_time() {
        assert_eq!(parse_schedule_time("08:00").unwrap(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(parse_schedule_time(" 23:59").unwrap(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        assert!(matches!(parse_schedule_time("25:00"), Err(AppError::InvalidInput(_))));
        assert!(matches!(parse_schedule_time("8am"), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_next_run_after() {
        let eight = parse_schedule_time("08:00").unwrap();
        assert_eq!(next_run_after(at("2025-12-24", "07:59"), eight), at("2025-12-24", "08:00"));
        assert_eq!(next_run_after(at("2025-12-24", "08:00"), eight), at("2025-12-25", "08:00"));
        assert_eq!(next_run_after(at("2025-12-31", "21:30"), eight), at("2026-01-01", "08:00"));
    }
}
