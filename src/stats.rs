use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use serde::{Serialize, Serializer};

use crate::canonical::MySqlCanonicalQuery;
use crate::output::{DisplayEvent, DisplayEventKind};
use crate::source::LogEvent;

pub struct StatsCollector {
    connections: HashSet<u64>,
    pub digests: HashMap<String, QueryAggregates>,
    pub latency_buckets: [u64; 6], // <1ms, 1-5, 5-10, 10-50, 50-100, 100+
    pub total_queries: u64,
    /// Query times inside the last second, oldest first.
    qps_window: VecDeque<DateTime<Local>>,
    /// Whether the newest query carried a log timestamp.
    log_clock: bool,
    pub first_query_at: Option<DateTime<Local>>,
    pub last_query_at: Option<DateTime<Local>>,
}

/// Everything known about one canonical query.
#[derive(Clone, Debug, Serialize)]
pub struct QueryAggregates {
    pub canonical: String,
    /// First raw statement seen with this shape.
    pub sample: String,
    pub count: u64,
    /// Executions that carried a duration.
    pub timed: u64,
    pub rows: u64,
    #[serde(rename = "total_ms", serialize_with = "millis")]
    pub total_duration: Duration,
    #[serde(rename = "min_ms", serialize_with = "opt_millis")]
    pub min_duration: Option<Duration>,
    #[serde(rename = "max_ms", serialize_with = "opt_millis")]
    pub max_duration: Option<Duration>,
}

impl QueryAggregates {
    pub fn avg_duration(&self) -> Option<Duration> {
        if self.timed == 0 {
            return None;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.timed);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

fn opt_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => millis(d, s),
        None => s.serialize_none(),
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            connections: HashSet::new(),
            digests: HashMap::new(),
            latency_buckets: [0; 6],
            total_queries: 0,
            qps_window: VecDeque::new(),
            log_clock: false,
            first_query_at: None,
            last_query_at: None,
        }
    }

    /// Reset all accumulated stats for a fresh measurement window.
    /// Keeps open connections intact (live state).
    pub fn reset(&mut self) {
        self.digests.clear();
        self.latency_buckets = [0; 6];
        self.total_queries = 0;
        self.qps_window.clear();
        self.log_clock = false;
        self.first_query_at = None;
        self.last_query_at = None;
    }

    pub fn process_event(&mut self, event: LogEvent) -> Option<DisplayEvent> {
        match event {
            LogEvent::Query {
                conn_id,
                sql,
                at,
                duration,
                rows,
            } => {
                let wall_time = at.unwrap_or_else(Local::now);
                self.connections.insert(conn_id);

                self.total_queries += 1;
                if self.first_query_at.is_none() {
                    self.first_query_at = Some(wall_time);
                }
                self.last_query_at = Some(wall_time);
                self.record_rate(wall_time, at.is_some());
                if let Some(duration) = duration {
                    self.record_latency(duration);
                }

                let query = MySqlCanonicalQuery::new(sql);
                let canonical = query.canonical_query().to_string();
                self.record_digest(&query, duration, rows);

                Some(DisplayEvent {
                    wall_time,
                    conn_id,
                    kind: DisplayEventKind::Query {
                        sql: query.query().to_string(),
                        canonical,
                        duration,
                        rows,
                    },
                })
            }

            LogEvent::ConnectionOpened { conn_id } => {
                self.connections.insert(conn_id);
                Some(DisplayEvent {
                    wall_time: Local::now(),
                    conn_id,
                    kind: DisplayEventKind::ConnectionOpened,
                })
            }

            LogEvent::ConnectionClosed { conn_id } => {
                self.connections.remove(&conn_id);
                Some(DisplayEvent {
                    wall_time: Local::now(),
                    conn_id,
                    kind: DisplayEventKind::ConnectionClosed,
                })
            }

            LogEvent::Unknown => None,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    fn record_latency(&mut self, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        let bucket = match ms {
            ms if ms < 1.0 => 0,
            ms if ms < 5.0 => 1,
            ms if ms < 10.0 => 2,
            ms if ms < 50.0 => 3,
            ms if ms < 100.0 => 4,
            _ => 5,
        };
        self.latency_buckets[bucket] += 1;
    }

    fn record_digest(&mut self, query: &MySqlCanonicalQuery, duration: Option<Duration>, rows: Option<u64>) {
        let canonical = query.canonical_query();
        let agg = self
            .digests
            .entry(canonical.to_string())
            .or_insert_with(|| QueryAggregates {
                canonical: canonical.to_string(),
                sample: query.query().to_string(),
                count: 0,
                timed: 0,
                rows: 0,
                total_duration: Duration::ZERO,
                min_duration: None,
                max_duration: None,
            });

        agg.count += 1;
        agg.rows += rows.unwrap_or(0);
        if let Some(duration) = duration {
            agg.timed += 1;
            agg.total_duration += duration;
            agg.min_duration = Some(agg.min_duration.map_or(duration, |d| d.min(duration)));
            agg.max_duration = Some(agg.max_duration.map_or(duration, |d| d.max(duration)));
        }
    }

    fn record_rate(&mut self, at: DateTime<Local>, from_log: bool) {
        self.log_clock = from_log;
        self.qps_window.push_back(at);
        self.expire_rate();
    }

    /// Drop window entries older than one second. Replayed logs are
    /// measured on their own clock, live input on the wall clock.
    fn expire_rate(&mut self) {
        let now = match self.qps_window.back() {
            Some(&newest) if self.log_clock => newest,
            _ => Local::now(),
        };
        let cutoff = now - TimeDelta::seconds(1);
        while self.qps_window.front().is_some_and(|&t| t <= cutoff) {
            self.qps_window.pop_front();
        }
    }

    /// Queries per second over a sliding 1-second window.
    pub fn qps(&mut self) -> u64 {
        self.expire_rate();
        self.qps_window.len() as u64
    }

    /// Heaviest digests: by total time, then by execution count.
    pub fn top_queries(&self, n: usize) -> Vec<QueryAggregates> {
        let mut queries: Vec<_> = self.digests.values().cloned().collect();
        queries.sort_unstable_by(|a, b| {
            b.total_duration
                .cmp(&a.total_duration)
                .then(b.count.cmp(&a.count))
                .then_with(|| a.canonical.cmp(&b.canonical))
        });
        queries.truncate(n);
        queries
    }
}
