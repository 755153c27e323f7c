use std::ops::Range;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rayon::prelude::*;
use tdigest::TDigest;
use tracing::info;

use crate::errors::{CovisError, Result};
use crate::io::{Event, EventType, ItemId, SessionId, Timestamp};

/// Bytes one event row occupies: session (4) + item (4) + timestamp (8) + type (1).
pub const EVENT_ROW_BYTES: u64 = 17;

/// Columnar event log. Rows of one session are expected to be contiguous.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventTable {
    pub sessions: Vec<SessionId>,
    pub items: Vec<ItemId>,
    pub timestamps: Vec<Timestamp>,
    pub types: Vec<EventType>,
}

/// Borrowed rows of a single session.
#[derive(Clone, Copy, Debug)]
pub struct SessionView<'a> {
    pub session: SessionId,
    pub items: &'a [ItemId],
    pub timestamps: &'a [Timestamp],
    pub types: &'a [EventType],
}

impl EventTable {
    pub fn with_capacity(capacity: usize) -> Self {
        EventTable {
            sessions: Vec::with_capacity(capacity),
            items: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
            types: Vec::with_capacity(capacity),
        }
    }

    pub fn from_events<I: IntoIterator<Item = Event>>(events: I) -> Self {
        let mut table = EventTable::default();
        for event in events {
            table.push(event);
        }
        table
    }

    pub fn push(&mut self, event: Event) {
        self.sessions.push(event.session);
        self.items.push(event.item);
        self.timestamps.push(event.ts);
        self.types.push(event.event_type);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn event(&self, row: usize) -> Event {
        Event {
            session: self.sessions[row],
            item: self.items[row],
            ts: self.timestamps[row],
            event_type: self.types[row],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.len()).map(move |row| self.event(row))
    }

    /// Half-open row range of every contiguous run of equal session ids.
    pub fn session_ranges(&self) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut start = 0;
        for row in 1..=self.len() {
            if row == self.len() || self.sessions[row] != self.sessions[start] {
                ranges.push(start..row);
                start = row;
            }
        }
        ranges
    }

    /// Row index of the first event of each session, in table order.
    pub fn session_start_indices(&self) -> Vec<usize> {
        self.session_ranges().into_iter().map(|range| range.start).collect()
    }

    pub fn session_view(&self, rows: Range<usize>) -> SessionView<'_> {
        SessionView {
            session: self.sessions[rows.start],
            items: &self.items[rows.clone()],
            timestamps: &self.timestamps[rows.clone()],
            types: &self.types[rows],
        }
    }

    pub fn sessions(&self) -> impl Iterator<Item = SessionView<'_>> + '_ {
        self.session_ranges()
            .into_iter()
            .map(move |rows| self.session_view(rows))
    }

    /// Checks that item ids are exactly `0..N` and returns `N`.
    pub fn precheck_dense_items(&self) -> Result<usize> {
        if self.is_empty() {
            return Err(CovisError::Precheck(String::from("event table is empty")));
        }
        let mut unique_items = self.items.clone();
        unique_items.par_sort_unstable();
        unique_items.dedup();
        let qty_items = unique_items.len();
        let min_item = unique_items[0];
        let max_item = unique_items[qty_items - 1];
        if min_item != 0 || max_item as usize != qty_items - 1 {
            return Err(CovisError::Precheck(format!(
                "item ids must be dense and zero-based: min={} max={} unique={}",
                min_item, max_item, qty_items
            )));
        }
        Ok(qty_items)
    }

    /// Checks that session ids are non-decreasing, so each session is one contiguous run.
    pub fn precheck_sorted_sessions(&self) -> Result<()> {
        match self
            .sessions
            .iter()
            .tuple_windows()
            .position(|(previous, next)| next < previous)
        {
            Some(row) => Err(CovisError::Precheck(format!(
                "events must be sorted by session, row {} has session {} after {}",
                row + 1,
                self.sessions[row + 1],
                self.sessions[row]
            ))),
            None => Ok(()),
        }
    }

    pub fn time_span(&self) -> Option<(Timestamp, Timestamp)> {
        let min_ts = self.timestamps.par_iter().min()?;
        let max_ts = self.timestamps.par_iter().max()?;
        Some((*min_ts, *max_ts))
    }
}

pub struct EventTableStats {
    pub descriptive_name: String,
    pub qty_records: usize,
    pub qty_unique_session_ids: usize,
    pub qty_unique_item_ids: usize,
    pub min_time_date_time: Option<DateTime<Utc>>,
    pub max_time_date_time: Option<DateTime<Utc>>,
    pub qty_events_p50: u64,
    pub qty_events_p90: u64,
    pub qty_events_p99: u64,
    pub qty_events_p100: u64,
}

impl EventTableStats {
    pub fn from_table(descriptive_name: &str, table: &EventTable) -> EventTableStats {
        let qty_records = table.len();

        let session_ranges = table.session_ranges();
        let mut session_ids = table.sessions.clone();
        session_ids.par_sort_unstable();
        session_ids.dedup();
        let qty_unique_session_ids = session_ids.len();

        let mut item_ids = table.items.clone();
        item_ids.par_sort_unstable();
        item_ids.dedup();
        let qty_unique_item_ids = item_ids.len();

        let (min_time_date_time, max_time_date_time) = match table.time_span() {
            Some((min_ts, max_ts)) => (
                DateTime::<Utc>::from_timestamp_millis(min_ts),
                DateTime::<Utc>::from_timestamp_millis(max_ts),
            ),
            None => (None, None),
        };

        let qty_events = session_ranges
            .iter()
            .map(|rows| rows.len() as f64)
            .collect_vec();
        let (qty_events_p50, qty_events_p90, qty_events_p99, qty_events_p100) =
            if qty_events.is_empty() {
                (0, 0, 0, 0)
            } else {
                let digest = TDigest::new_with_size(100).merge_unsorted(qty_events);
                (
                    digest.estimate_quantile(0.50).round() as u64,
                    digest.estimate_quantile(0.90).round() as u64,
                    digest.estimate_quantile(0.99).round() as u64,
                    digest.estimate_quantile(1.0).round() as u64,
                )
            };

        let stats = EventTableStats {
            descriptive_name: descriptive_name.to_string(),
            qty_records,
            qty_unique_session_ids,
            qty_unique_item_ids,
            min_time_date_time,
            max_time_date_time,
            qty_events_p50,
            qty_events_p90,
            qty_events_p99,
            qty_events_p100,
        };
        stats.log();
        stats
    }

    fn log(&self) {
        let format_time = |time: &Option<DateTime<Utc>>| {
            time.map(|time| time.to_string())
                .unwrap_or_else(|| String::from("-"))
        };
        info!(
            events = self.qty_records,
            sessions = self.qty_unique_session_ids,
            items = self.qty_unique_item_ids,
            "loaded {}",
            self.descriptive_name
        );
        info!(
            "span: {} / {}, session qty event percentiles: p50={} p90={} p99={} p100={}",
            format_time(&self.min_time_date_time),
            format_time(&self.max_time_date_time),
            self.qty_events_p50,
            self.qty_events_p90,
            self.qty_events_p99,
            self.qty_events_p100
        );
    }
}

#[cfg(test)]
pub(crate) mod dataframeutils_test {
    use super::*;

    pub(crate) fn event(session: SessionId, item: ItemId, ts: Timestamp, event_type: EventType) -> Event {
        Event {
            session,
            item,
            ts,
            event_type,
        }
    }

    fn sample_table() -> EventTable {
        EventTable::from_events(vec![
            event(0, 1, 10, EventType::Clicks),
            event(0, 2, 20, EventType::Clicks),
            event(0, 0, 30, EventType::Carts),
            event(4, 3, 5, EventType::Orders),
            event(9, 1, 40, EventType::Clicks),
            event(9, 2, 50, EventType::Clicks),
        ])
    }

    #[test]
    fn should_find_session_starts() {
        let table = sample_table();
        assert_eq!(vec![0, 3, 4], table.session_start_indices());
        let views: Vec<SessionView> = table.sessions().collect();
        assert_eq!(3, views.len());
        assert_eq!(&[1, 2, 0], views[0].items);
        assert_eq!(9, views[2].session);
    }

    #[test]
    fn should_accept_dense_items() {
        assert_eq!(4, sample_table().precheck_dense_items().unwrap());
    }

    #[test]
    fn should_reject_sparse_items() {
        let table = EventTable::from_events(vec![
            event(0, 1, 10, EventType::Clicks),
            event(0, 3, 20, EventType::Clicks),
        ]);
        assert!(matches!(
            table.precheck_dense_items(),
            Err(CovisError::Precheck(_))
        ));
        assert!(matches!(
            EventTable::default().precheck_dense_items(),
            Err(CovisError::Precheck(_))
        ));
    }

    #[test]
    fn should_reject_unsorted_sessions() {
        let table = EventTable::from_events(vec![
            event(2, 0, 10, EventType::Clicks),
            event(1, 1, 20, EventType::Clicks),
        ]);
        assert!(table.precheck_sorted_sessions().is_err());
        assert!(sample_table().precheck_sorted_sessions().is_ok());
    }

    #[test]
    fn should_compute_stats() {
        let stats = EventTableStats::from_table("sample", &sample_table());
        assert_eq!(6, stats.qty_records);
        assert_eq!(3, stats.qty_unique_session_ids);
        assert_eq!(4, stats.qty_unique_item_ids);
        assert_eq!(Some((5, 50)), sample_table().time_span());
    }
}
