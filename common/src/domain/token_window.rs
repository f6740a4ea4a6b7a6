use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW_SECS: u64 = 60;

/// Ordered `(timestamp, input_tokens)` entries backing the Rate Limiter's
/// budget tracking. Entries older than 60s are pruned on every read, so
/// `tokens_in_window` always reflects the true trailing window regardless of
/// how long ago the last write happened.
#[derive(Debug, Default)]
pub struct TokenWindow {
    entries: VecDeque<(Instant, u64)>,
}

impl TokenWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, input_tokens: u64) {
        self.entries.push_back((Instant::now(), input_tokens));
        self.prune();
    }

    pub fn prune(&mut self) {
        let cutoff = Instant::now().checked_sub(Duration::from_secs(WINDOW_SECS));
        let Some(cutoff) = cutoff else { return };
        while let Some((ts, _)) = self.entries.front() {
            if *ts < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn tokens_in_window(&mut self) -> u64 {
        self.prune();
        self.entries.iter().map(|(_, tokens)| tokens).sum()
    }

    /// Earliest timestamp in the window after pruning, used by the rate
    /// limiter to compute how long to sleep before headroom frees up.
    pub fn earliest(&mut self) -> Option<Instant> {
        self.prune();
        self.entries.front().map(|(ts, _)| *ts)
    }

    pub fn len(&mut self) -> usize {
        self.prune();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_within_window() {
        let mut window = TokenWindow::new();
        window.record(100);
        window.record(200);
        assert_eq!(window.tokens_in_window(), 300);
    }

    #[test]
    fn empty_window_has_no_earliest() {
        let mut window = TokenWindow::new();
        assert!(window.earliest().is_none());
        assert!(window.is_empty());
    }
}
