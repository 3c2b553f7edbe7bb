use std::fmt::Write as _;
use std::time::Duration;

use tracing::warn;

use super::{DisplayEvent, DisplayEventKind, OutputSink};
use crate::stats::StatsCollector;

/// Simple stdout line-by-line output, pipe-friendly.
pub struct RawSink {
    show_canonical: bool,
    threshold: Duration,
    top: usize,
    json: bool,
}

impl RawSink {
    pub fn new(show_canonical: bool, threshold: Duration, top: usize, json: bool) -> Self {
        Self {
            show_canonical,
            threshold,
            top,
            json,
        }
    }
}

impl OutputSink for RawSink {
    fn handle_event(&mut self, event: &DisplayEvent) {
        if !event.meets_threshold(self.threshold) {
            return;
        }
        println!("{}", format_event(event, self.show_canonical));
    }

    fn shutdown(&mut self, stats: &StatsCollector) {
        if self.top == 0 {
            return;
        }
        if self.json {
            match summary_json(stats, self.top) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("Failed to serialize summary: {e}"),
            }
        } else {
            print!("{}", summary_text(stats, self.top));
        }
    }
}

pub fn format_event(event: &DisplayEvent, show_canonical: bool) -> String {
    let time = event.wall_time.format("%H:%M:%S%.3f");
    let conn = event.conn_id;

    match &event.kind {
        DisplayEventKind::Query {
            sql,
            canonical,
            duration,
            rows,
        } => {
            let latency = duration
                .map(|d| format!("{:>8.1}ms", d.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| format!("{:>10}", "-"));
            let sql = if show_canonical { canonical } else { sql };
            let rows_str = rows.map(|r| format!(" [{r} rows]")).unwrap_or_default();
            format!("{time} [conn:{conn}] {latency}  {sql}{rows_str}")
        }
        DisplayEventKind::ConnectionOpened => {
            format!("{time} [conn:{conn}]            ++ connection opened")
        }
        DisplayEventKind::ConnectionClosed => {
            format!("{time} [conn:{conn}]            -- connection closed")
        }
    }
}

pub fn summary_text(stats: &StatsCollector, top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{} queries, {} distinct",
        stats.total_queries,
        stats.digests.len()
    );
    if let (Some(first), Some(last)) = (stats.first_query_at, stats.last_query_at) {
        let _ = writeln!(
            out,
            "{} .. {}",
            first.format("%Y-%m-%d %H:%M:%S"),
            last.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let queries = stats.top_queries(top);
    if queries.is_empty() {
        return out;
    }

    let _ = writeln!(out, "{:>8} {:>12} {:>10}  QUERY", "COUNT", "TOTAL", "AVG");
    for q in queries {
        let total = q.total_duration.as_secs_f64() * 1000.0;
        let avg = q
            .avg_duration()
            .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:>8} {:>10.1}ms {:>10}  {}", q.count, total, avg, q.canonical);
    }
    out
}

pub fn summary_json(stats: &StatsCollector, top: usize) -> serde_json::Result<String> {
    let summary = serde_json::json!({
        "total_queries": stats.total_queries,
        "distinct_queries": stats.digests.len(),
        "first_query_at": stats.first_query_at.map(|t| t.to_rfc3339()),
        "last_query_at": stats.last_query_at.map(|t| t.to_rfc3339()),
        "top": stats.top_queries(top),
    });
    serde_json::to_string_pretty(&summary)
}
