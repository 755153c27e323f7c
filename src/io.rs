use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use avro_rs::{from_value, Codec, Reader, Schema, Writer};
use rayon::iter::ParallelBridge;
use rayon::prelude::ParallelIterator;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataframeutils::EventTable;
use crate::errors::{CovisError, Result};

pub type SessionId = u32;
pub type ItemId = u32;
/// Milliseconds since the unix epoch.
pub type Timestamp = i64;

/// Content of an avro artifact with zero rows; the avro writer emits no header without rows.
const EMPTY_AVRO_MARKER: &[u8] = b"covisit:empty\n";

/// Timestamps below this value are interpreted as seconds rather than milliseconds.
const SECONDS_TIMESTAMP_LIMIT: i64 = 100_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Clicks,
    Carts,
    Orders,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Clicks, EventType::Carts, EventType::Orders];

    pub fn code(self) -> u8 {
        match self {
            EventType::Clicks => 0,
            EventType::Carts => 1,
            EventType::Orders => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<EventType> {
        EventType::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            EventType::Clicks => "clicks",
            EventType::Carts => "carts",
            EventType::Orders => "orders",
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, EventType::Carts | EventType::Orders)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventType {
    type Err = String;

    /// Accepts either the type name or its numeric code.
    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim() {
            "clicks" | "0" => Ok(EventType::Clicks),
            "carts" | "1" => Ok(EventType::Carts),
            "orders" | "2" => Ok(EventType::Orders),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub session: SessionId,
    pub item: ItemId,
    pub ts: Timestamp,
    pub event_type: EventType,
}

fn normalize_timestamp(ts: i64) -> Timestamp {
    if ts.abs() < SECONDS_TIMESTAMP_LIMIT {
        ts * 1000
    } else {
        ts
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    aid: ItemId,
    ts: i64,
    #[serde(rename = "type")]
    event_type: String,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    session: SessionId,
    events: Vec<RawEvent>,
}

/// Reads line-delimited session records into a session-grouped event table.
pub fn read_jsonl_events<P: AsRef<Path>>(path: P) -> Result<EventTable> {
    let lines = create_buffered_line_reader(path.as_ref())?;
    let mut sessions: Vec<(usize, RawSession)> = lines
        .enumerate()
        .par_bridge()
        .filter_map(|(line_no, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                serde_json::from_str::<RawSession>(&line)
                    .map(|raw| (line_no, raw))
                    .map_err(|err| CovisError::Parse {
                        line: line_no + 1,
                        reason: err.to_string(),
                    }),
            ),
            Err(err) => Some(Err(CovisError::Io(err))),
        })
        .collect::<Result<Vec<_>>>()?;
    sessions.sort_unstable_by_key(|(line_no, raw)| (raw.session, *line_no));

    let qty_events = sessions.iter().map(|(_, raw)| raw.events.len()).sum();
    let mut table = EventTable::with_capacity(qty_events);
    for (line_no, raw) in sessions {
        for event in raw.events {
            let event_type =
                EventType::from_str(&event.event_type).map_err(|reason| CovisError::Parse {
                    line: line_no + 1,
                    reason,
                })?;
            table.push(Event {
                session: raw.session,
                item: event.aid,
                ts: normalize_timestamp(event.ts),
                event_type,
            });
        }
    }
    debug!("read {} events from {}", table.len(), path.as_ref().display());
    Ok(table)
}

/// Reads a tidy csv with header `session,aid,ts,type`. Rows are expected grouped by session.
pub fn read_events_csv<P: AsRef<Path>>(path: P) -> Result<EventTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut table = EventTable::default();
    for (row, result) in reader.deserialize().enumerate() {
        let (session, item, ts, event_type): (SessionId, ItemId, i64, String) = result?;
        let event_type = EventType::from_str(&event_type).map_err(|reason| CovisError::Parse {
            line: row + 2,
            reason,
        })?;
        table.push(Event {
            session,
            item,
            ts: normalize_timestamp(ts),
            event_type,
        });
    }
    Ok(table)
}

const TIDY_EVENT_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "TidyEvent",
    "fields": [
        {"name": "session", "type": "long"},
        {"name": "aid", "type": "long"},
        {"name": "ts", "type": "long"},
        {"name": "type", "type": "int"}
    ]
}
"#;

#[derive(Debug, Serialize, Deserialize)]
struct TidyEventRecord {
    session: i64,
    aid: i64,
    ts: i64,
    #[serde(rename = "type")]
    event_type: i32,
}

/// Loads the events of a JSONL dump, memoized as a tidy avro file in `cache_dir`.
///
/// An existing cache file is always reused; delete it to force a rebuild.
pub fn load_tidy_events<P: AsRef<Path>, Q: AsRef<Path>>(
    jsonl_path: P,
    cache_dir: Q,
) -> Result<EventTable> {
    let jsonl_path = jsonl_path.as_ref();
    let stem = jsonl_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("events"));
    let cache_file = cache_dir.as_ref().join(format!("{}.avro", stem));

    if cache_file.exists() {
        info!("loading {}", cache_file.display());
        return read_tidy_events(&cache_file);
    }

    info!("creating {}", cache_file.display());
    let table = read_jsonl_events(jsonl_path)?;
    fs::create_dir_all(cache_dir.as_ref())?;
    let records = table.iter().map(|event| TidyEventRecord {
        session: i64::from(event.session),
        aid: i64::from(event.item),
        ts: event.ts,
        event_type: i32::from(event.event_type.code()),
    });
    write_avro_atomic(&cache_file, TIDY_EVENT_SCHEMA, records)?;
    Ok(table)
}

/// Reads a tidy avro event file, as written by [`load_tidy_events`].
pub fn read_tidy_events<P: AsRef<Path>>(path: P) -> Result<EventTable> {
    let records: Vec<TidyEventRecord> = read_avro(path.as_ref())?;
    let mut table = EventTable::with_capacity(records.len());
    for (row, record) in records.into_iter().enumerate() {
        let event_type = u8::try_from(record.event_type)
            .ok()
            .and_then(EventType::from_code)
            .ok_or_else(|| CovisError::Parse {
                line: row + 1,
                reason: format!("unknown event type code {}", record.event_type),
            })?;
        let session = SessionId::try_from(record.session).map_err(|_| CovisError::Parse {
            line: row + 1,
            reason: format!("session id {} out of range", record.session),
        })?;
        let item = ItemId::try_from(record.aid).map_err(|_| CovisError::Parse {
            line: row + 1,
            reason: format!("item id {} out of range", record.aid),
        })?;
        table.push(Event {
            session,
            item,
            ts: record.ts,
            event_type,
        });
    }
    Ok(table)
}

/// Loads events from a path, dispatching on the file extension.
pub fn load_events<P: AsRef<Path>, Q: AsRef<Path>>(path: P, tidy_cache_dir: Q) -> Result<EventTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CovisError::NotFound(path.to_path_buf()));
    }
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("avro") => read_tidy_events(path),
        Some("csv") => read_events_csv(path),
        _ => load_tidy_events(path, tidy_cache_dir),
    }
}

/// Writes all rows to `path` through a temporary sibling file, so a partially
/// written artifact never appears under the final name. Zero rows are written as
/// an explicit empty marker.
pub(crate) fn write_avro_atomic<T, I>(path: &Path, schema: &str, rows: I) -> Result<usize>
where
    T: serde::Serialize,
    I: IntoIterator<Item = T>,
{
    let schema = Schema::parse_str(schema)?;
    let tmp_path = temporary_path(path);
    let mut qty_rows = 0;
    {
        let mut file = File::create(&tmp_path)?;
        {
            let mut writer = Writer::with_codec(&schema, &mut file, Codec::Snappy);
            for row in rows {
                writer.append_ser(row)?;
                qty_rows += 1;
            }
            writer.flush()?;
        }
        if qty_rows == 0 {
            file.write_all(EMPTY_AVRO_MARKER)?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(qty_rows)
}

/// Reads all rows of an artifact written by [`write_avro_atomic`]. A zero-length
/// file is a truncated write and is rejected.
pub(crate) fn read_avro<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(CovisError::NotFound(path.to_path_buf()));
    }
    let len = fs::metadata(path)?.len();
    if len == 0 {
        return Err(CovisError::Avro(format!(
            "{} is empty, the write did not complete",
            path.display()
        )));
    }
    if len == EMPTY_AVRO_MARKER.len() as u64 && fs::read(path)? == EMPTY_AVRO_MARKER {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = Reader::new(file)?;
    let mut rows = Vec::new();
    for value in reader {
        rows.push(from_value::<T>(&value?)?);
    }
    Ok(rows)
}

pub(crate) fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Ground truth of one held-out session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionLabels {
    pub session: SessionId,
    pub clicks: Option<ItemId>,
    pub carts: Vec<ItemId>,
    pub orders: Vec<ItemId>,
}

impl SessionLabels {
    pub fn for_type(&self, event_type: EventType) -> Vec<ItemId> {
        match event_type {
            EventType::Clicks => self.clicks.into_iter().collect(),
            EventType::Carts => self.carts.clone(),
            EventType::Orders => self.orders.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawLabels {
    clicks: Option<ItemId>,
    #[serde(default)]
    carts: Vec<ItemId>,
    #[serde(default)]
    orders: Vec<ItemId>,
}

#[derive(Debug, Deserialize)]
struct RawSessionLabels {
    session: SessionId,
    labels: RawLabels,
}

pub fn read_test_labels<P: AsRef<Path>>(path: P) -> Result<Vec<SessionLabels>> {
    let mut labels = Vec::new();
    for (line_no, line) in create_buffered_line_reader(path.as_ref())?.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawSessionLabels =
            serde_json::from_str(&line).map_err(|err| CovisError::Parse {
                line: line_no + 1,
                reason: err.to_string(),
            })?;
        labels.push(SessionLabels {
            session: raw.session,
            clicks: raw.labels.clicks,
            carts: raw.labels.carts,
            orders: raw.labels.orders,
        });
    }
    Ok(labels)
}

/// One line of a submission: `"{session}_{type}"` and its ordered candidates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRow {
    pub session_type: String,
    pub labels: Vec<ItemId>,
}

impl SubmissionRow {
    pub fn new(session: SessionId, event_type: EventType, labels: Vec<ItemId>) -> Self {
        SubmissionRow {
            session_type: format!("{}_{}", session, event_type),
            labels,
        }
    }

    /// Splits `session_type` back into its session id and event type.
    pub fn session_and_type(&self) -> Option<(SessionId, EventType)> {
        let (session, event_type) = self.session_type.rsplit_once('_')?;
        Some((session.parse().ok()?, event_type.parse().ok()?))
    }
}

pub fn write_submission<P: AsRef<Path>>(path: P, rows: &[SubmissionRow]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&["session_type", "labels"])?;
    for row in rows {
        let labels = row
            .labels
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writer.write_record(&[row.session_type.as_str(), labels.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_submission<P: AsRef<Path>>(path: P) -> Result<Vec<SubmissionRow>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut rows = Vec::new();
    for (row, result) in reader.deserialize().enumerate() {
        let (session_type, labels): (String, String) = result?;
        let labels = labels
            .split_whitespace()
            .map(|label| {
                label.parse::<ItemId>().map_err(|err| CovisError::Parse {
                    line: row + 2,
                    reason: format!("label '{}': {}", label, err),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(SubmissionRow {
            session_type,
            labels,
        });
    }
    Ok(rows)
}

fn create_buffered_line_reader(filename: &Path) -> Result<io::Lines<io::BufReader<File>>> {
    if !filename.exists() {
        return Err(CovisError::NotFound(filename.to_path_buf()));
    }
    let file = File::open(filename)?;
    Ok(io::BufReader::new(file).lines())
}
