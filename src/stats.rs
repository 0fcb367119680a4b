use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counters produced by one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestTally {
    pub images: u64,
    pub videos: u64,
    pub persons: u64,
}

impl RequestTally {
    pub fn image(persons: usize) -> Self {
        Self {
            images: 1,
            videos: 0,
            persons: persons as u64,
        }
    }

    pub fn video(persons: usize) -> Self {
        Self {
            images: 0,
            videos: 1,
            persons: persons as u64,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UsageSnapshot {
    pub total_images: u64,
    pub total_videos: u64,
    pub total_persons_detected: u64,
    pub uptime: Duration,
}

/// Process-wide usage counters. Front ends merge one tally per request.
#[derive(Debug)]
pub struct UsageStats {
    started_at: Instant,
    totals: Mutex<RequestTally>,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            totals: Mutex::new(RequestTally::default()),
        }
    }

    pub fn record(&self, tally: RequestTally) {
        let mut totals = self
            .totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        totals.images += tally.images;
        totals.videos += tally.videos;
        totals.persons += tally.persons;
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let totals = *self
            .totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        UsageSnapshot {
            total_images: totals.images,
            total_videos: totals.videos,
            total_persons_detected: totals.persons,
            uptime: self.started_at.elapsed(),
        }
    }
}

/// `1h 02m 03s` style uptime.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_tallies_all_land() {
        let stats = Arc::new(UsageStats::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let tally = if i % 2 == 0 {
                            RequestTally::image(2)
                        } else {
                            RequestTally::video(1)
                        };
                        stats.record(tally);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_images, 400);
        assert_eq!(snapshot.total_videos, 400);
        assert_eq!(snapshot.total_persons_detected, 1200);
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
