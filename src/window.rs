use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

#[derive(Debug, Clone, Copy, Default)]
pub struct Bounds {
    // Tolerance for inserting out-of-order data points.
    // Given the latest timestamp t seen so far, the insert window
    // accepts a new data point with a timestamp in [t-past, t+future].
    // A past value of 0 means out-of-order inserts are not allowed.
    // Leaving past as None defaults it to whatever the storage allows
    // to be written.
    pub past: Option<u64>,
    pub future: Option<u64>,
}

pub struct InsertWindow {
    bounds: Bounds,
    max_timestamp: AtomicI64,
    // Unset until the first update, so the first point always fits.
    initialized: AtomicBool,
}

fn tolerance(bound: u64) -> i64 {
    i64::try_from(bound).unwrap_or(i64::MAX)
}

impl InsertWindow {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            max_timestamp: AtomicI64::default(),
            initialized: AtomicBool::new(false),
        }
    }

    fn future_contains(&self, timestamp: i64) -> bool {
        match self.bounds.future {
            Some(f) => {
                timestamp.saturating_sub(self.max_timestamp.load(Ordering::SeqCst)) <= tolerance(f)
            }
            None => true,
        }
    }

    fn past_contains(&self, timestamp: i64) -> bool {
        match self.bounds.past {
            Some(p) => {
                self.max_timestamp.load(Ordering::SeqCst).saturating_sub(timestamp) <= tolerance(p)
            }
            None => true,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        if !self.initialized.load(Ordering::SeqCst) {
            return true;
        }
        self.future_contains(timestamp) && self.past_contains(timestamp)
    }

    pub fn update(&self, timestamp: i64) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            self.max_timestamp.fetch_max(timestamp, Ordering::SeqCst);
        } else {
            self.max_timestamp.store(timestamp, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
pub mod tests {
    use crate::window::Bounds;

    use super::InsertWindow;

    #[test]
    fn test_insert_window_strict_past() {
        let window = InsertWindow::new(Bounds {
            past: Some(0),
            future: None,
        });
        assert!(window.contains(0));

        window.update(1000);
        assert!(!window.contains(999));
        assert!(window.contains(1000));
        assert!(window.contains(2000));
    }

    #[test]
    fn test_insert_window_relaxed_past() {
        let window = InsertWindow::new(Bounds {
            past: Some(20),
            future: None,
        });
        assert!(window.contains(0));

        window.update(1000);
        assert!(!window.contains(979));
        assert!(window.contains(999));
        assert!(window.contains(1000));
        assert!(window.contains(2000));
    }

    #[test]
    fn test_insert_window_relaxed_future() {
        let window = InsertWindow::new(Bounds {
            past: Some(20),
            future: Some(20),
        });
        assert!(window.contains(0));

        window.update(1000);
        assert!(!window.contains(1021));
        assert!(window.contains(1020));
        assert!(!window.contains(2000));
    }

    #[test]
    fn test_insert_window_negative_timestamps() {
        let window = InsertWindow::new(Bounds {
            past: Some(10),
            future: Some(10),
        });
        // The first point sets the baseline, wherever it lands.
        assert!(window.contains(-5000));
        window.update(-5000);
        assert!(window.contains(-4995));
        assert!(!window.contains(0));

        // An older point leaves the maximum where it was.
        window.update(-6000);
        assert!(window.contains(-4991));
        assert!(!window.contains(-5011));
    }
}
