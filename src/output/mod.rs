pub mod raw;
pub mod tui;

use std::time::Duration;

use crate::stats::StatsCollector;

/// Log event after canonicalization, ready for display.
#[derive(Clone, Debug)]
pub struct DisplayEvent {
    pub wall_time: chrono::DateTime<chrono::Local>,
    pub conn_id: u64,
    pub kind: DisplayEventKind,
}

#[derive(Clone, Debug)]
pub enum DisplayEventKind {
    Query {
        sql: String,
        canonical: String,
        duration: Option<Duration>,
        rows: Option<u64>,
    },
    ConnectionOpened,
    ConnectionClosed,
}

impl DisplayEvent {
    /// Whether a query is at least `threshold` slow. Untimed queries only
    /// pass a zero threshold; connection events always pass.
    pub fn meets_threshold(&self, threshold: Duration) -> bool {
        match &self.kind {
            DisplayEventKind::Query { duration, .. } => match duration {
                Some(d) => *d >= threshold,
                None => threshold.is_zero(),
            },
            _ => true,
        }
    }
}

/// Processes display events.
pub trait OutputSink: Send + 'static {
    fn handle_event(&mut self, event: &DisplayEvent);
    fn shutdown(&mut self, stats: &StatsCollector);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(duration: Option<u64>) -> DisplayEvent {
        DisplayEvent {
            wall_time: chrono::Local::now(),
            conn_id: 1,
            kind: DisplayEventKind::Query {
                sql: "SELECT 1".into(),
                canonical: "SELECT ?".into(),
                duration: duration.map(Duration::from_millis),
                rows: None,
            },
        }
    }

    #[test]
    fn test_threshold() {
        let ten = Duration::from_millis(10);
        assert!(event(Some(10)).meets_threshold(ten));
        assert!(!event(Some(9)).meets_threshold(ten));
        assert!(!event(None).meets_threshold(ten));
        assert!(event(None).meets_threshold(Duration::ZERO));

        let closed = DisplayEvent {
            wall_time: chrono::Local::now(),
            conn_id: 1,
            kind: DisplayEventKind::ConnectionClosed,
        };
        assert!(closed.meets_threshold(ten));
    }
}
