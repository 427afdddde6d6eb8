use chrono::{Duration, Local, NaiveDateTime};

use crate::config::Config;
use crate::error::Result;
use crate::pipeline;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Fetch,
    Archive,
}

/// Deadline-based scheduler for the two periodic jobs: fetch on aligned
/// interval boundaries (:00/:30 at the default 30 minutes) and archive
/// once daily at midnight.
///
/// `poll` fires a task when its deadline has been crossed since the last
/// poll, so a late wakeup (suspend, long batch) still runs a missed task
/// once instead of skipping it the way a minute-equality check would.
pub struct Scheduler {
    interval_minutes: u32,
    next_fetch: NaiveDateTime,
    next_archive: NaiveDateTime,
}

impl Scheduler {
    pub fn new(now: NaiveDateTime, fetch_interval_minutes: u32) -> Self {
        let interval_minutes = fetch_interval_minutes.max(1);
        Self {
            interval_minutes,
            next_fetch: next_aligned(now, interval_minutes),
            next_archive: next_midnight(now),
        }
    }

    /// Tasks due at `now`, in execution order. Archive precedes fetch so
    /// a shared midnight boundary folds the day's captures before new
    /// rows land.
    pub fn poll(&mut self, now: NaiveDateTime) -> Vec<Task> {
        let mut due = Vec::new();
        if now >= self.next_archive {
            due.push(Task::Archive);
            self.next_archive = next_midnight(now);
        }
        if now >= self.next_fetch {
            due.push(Task::Fetch);
            self.next_fetch = next_aligned(now, self.interval_minutes);
        }
        due
    }

    pub fn next_deadline(&self) -> NaiveDateTime {
        self.next_fetch.min(self.next_archive)
    }
}

/// Next interval boundary past midnight, strictly after `now`.
fn next_aligned(now: NaiveDateTime, interval_minutes: u32) -> NaiveDateTime {
    let midnight = now.date().and_hms_opt(0, 0, 0).unwrap();
    let interval = i64::from(interval_minutes);
    let elapsed = (now - midnight).num_minutes();
    midnight + Duration::minutes((elapsed / interval + 1) * interval)
}

fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    now.date().and_hms_opt(0, 0, 0).unwrap() + Duration::days(1)
}

/// Run both jobs forever on their schedules. Job failures are logged and
/// the loop keeps going; fetch and archival never overlap because both
/// run from this single loop.
pub async fn run(config: &Config) -> Result<()> {
    let mut scheduler = Scheduler::new(Local::now().naive_local(), config.fetch_interval_minutes);
    tracing::info!(
        "Scheduler started: fetch every {} minutes, archive at midnight",
        config.fetch_interval_minutes.max(1)
    );

    loop {
        let now = Local::now().naive_local();
        for task in scheduler.poll(now) {
            match task {
                Task::Archive => {
                    let date = Local::now().date_naive();
                    if let Err(e) =
                        store::archive_day(&config.capture_dir(), &config.archive_dir(), date)
                    {
                        tracing::error!("Archival failed: {}", e);
                    }
                }
                Task::Fetch => {
                    if let Err(e) = pipeline::run_fetch(config).await {
                        tracing::error!("Fetch batch failed: {}", e);
                    }
                }
            }
        }

        let now = Local::now().naive_local();
        let wait = (scheduler.next_deadline() - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_next_aligned_half_hour_boundaries() {
        assert_eq!(next_aligned(at(10, 0, 0), 30), at(10, 30, 0));
        assert_eq!(next_aligned(at(10, 0, 1), 30), at(10, 30, 0));
        assert_eq!(next_aligned(at(10, 29, 59), 30), at(10, 30, 0));
        assert_eq!(next_aligned(at(10, 30, 0), 30), at(11, 0, 0));
        assert_eq!(
            next_aligned(at(23, 45, 0), 30),
            at(0, 0, 0) + Duration::days(1)
        );
    }

    #[test]
    fn test_next_midnight() {
        assert_eq!(next_midnight(at(0, 0, 0)), at(0, 0, 0) + Duration::days(1));
        assert_eq!(
            next_midnight(at(23, 59, 59)),
            at(0, 0, 0) + Duration::days(1)
        );
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let mut scheduler = Scheduler::new(at(10, 5, 0), 30);
        assert!(scheduler.poll(at(10, 20, 0)).is_empty());
    }

    #[test]
    fn test_fetch_fires_on_boundary() {
        let mut scheduler = Scheduler::new(at(10, 5, 0), 30);
        assert_eq!(scheduler.poll(at(10, 30, 0)), vec![Task::Fetch]);
        // Advanced past the fired deadline.
        assert!(scheduler.poll(at(10, 31, 0)).is_empty());
    }

    #[test]
    fn test_missed_boundary_fires_once_then_realigns() {
        let mut scheduler = Scheduler::new(at(9, 50, 0), 30);
        // Wakeup long after 10:00 and 10:30 both passed: one catch-up
        // fire, realigned to 11:00.
        assert_eq!(scheduler.poll(at(10, 31, 0)), vec![Task::Fetch]);
        assert!(scheduler.poll(at(10, 45, 0)).is_empty());
        assert_eq!(scheduler.poll(at(11, 0, 0)), vec![Task::Fetch]);
    }

    #[test]
    fn test_midnight_fires_archive_before_fetch() {
        let mut scheduler = Scheduler::new(at(23, 40, 0), 30);
        let due = scheduler.poll(at(0, 0, 0) + Duration::days(1));
        assert_eq!(due, vec![Task::Archive, Task::Fetch]);
    }

    #[test]
    fn test_archive_fires_once_per_day() {
        let mut scheduler = Scheduler::new(at(23, 59, 0), 30);
        let tomorrow = at(0, 0, 30) + Duration::days(1);
        let due = scheduler.poll(tomorrow);
        assert!(due.contains(&Task::Archive));
        assert!(!scheduler.poll(tomorrow + Duration::hours(1)).contains(&Task::Archive));
    }

    #[test]
    fn test_next_deadline_is_nearest() {
        let scheduler = Scheduler::new(at(23, 40, 0), 30);
        // Fetch at 00:00 coincides with archive; deadline is midnight.
        assert_eq!(scheduler.next_deadline(), at(0, 0, 0) + Duration::days(1));

        let scheduler = Scheduler::new(at(10, 5, 0), 30);
        assert_eq!(scheduler.next_deadline(), at(10, 30, 0));
    }
}
