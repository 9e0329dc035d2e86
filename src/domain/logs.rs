//! Equipment log entities.
//!
//! Operation logs only contain remote operations issued from the app.
//! State-change logs contain every device state change, app-originated or
//! not, so whether a state change came from the app can only be decided by
//! matching it against an operation within a time tolerance.

use crate::utils::error::{NotebookError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashSet;

pub const CONTRACT_ID: &str = "ContractId";
pub const ORDER_RECEIPT_DATE: &str = "OrderReceiptDate";
pub const REPORTED_DATE: &str = "ReportedDate";
pub const TIME_DIFF_SECONDS: &str = "time_diff_seconds";
pub const IS_REMOTE_OPERATION: &str = "is_remote_operation";

pub const DEFAULT_OPERATION_COLUMNS: &[&str] = &[
    "ContractId",
    "OrderReceiptDate",
    "TimerDiv",
    "FloorCode",
    "RoomName",
    "EquipmentTypeId",
    "EquipmentName",
    "PropertyCode",
    "PropertyName",
    "PropertyValue",
];

pub const DEFAULT_STATE_COLUMNS: &[&str] = &[
    "MessageName",
    "ContractId",
    "ReportedDate",
    "FloorCode",
    "RoomName",
    "EquipmentTypeId",
    "EquipmentName",
    "PropertyCode1",
    "PropertyName1",
    "PropertyValue1",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One exported sheet, restricted to the selected columns. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// The operation and state-change sheets of one export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot {
    pub operations: LogTable,
    pub states: LogTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub contract_ids: Vec<String>,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

/// A state change matched (or not) against the nearest remote operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRecord {
    pub contract_id: String,
    pub state_time: NaiveDateTime,
    pub operation_time: Option<NaiveDateTime>,
    pub time_diff_seconds: Option<f64>,
    pub is_remote_operation: bool,
    /// Aligned with `MergedLogDataset::state_columns`.
    pub state_payload: Vec<Option<String>>,
    /// Aligned with `MergedLogDataset::operation_columns`; all `None` when unmatched.
    pub operation_payload: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedLogDataset {
    pub state_columns: Vec<String>,
    pub operation_columns: Vec<String>,
    pub records: Vec<MergedRecord>,
}

impl LogTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str, sheet: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| NotebookError::ValidationError {
                message: format!("column '{}' is missing from the {} sheet", name, sheet),
            })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        writer.into_inner().map_err(|e| NotebookError::ProcessingError {
            message: format!("failed to flush CSV buffer: {}", e),
        })
    }

    pub fn from_csv(data: &[u8]) -> Result<Self> {
        let data = data.strip_prefix("\u{feff}".as_bytes()).unwrap_or(data);
        let mut reader = csv::ReaderBuilder::new().flexible(false).from_reader(data);
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = LogTable::new(columns);
        for record in reader.records() {
            let record = record?;
            table.rows.push(
                record
                    .iter()
                    .map(|v| (!v.is_empty()).then(|| v.to_string()))
                    .collect(),
            );
        }
        Ok(table)
    }
}

impl LogSnapshot {
    /// Keeps the queried contracts. State rows must fall inside
    /// `[start, end]`; operation rows get the window widened by `tolerance`
    /// on both sides so states near the edges can still find their operation.
    pub fn filter(&self, query: &LogQuery, tolerance: Duration) -> Result<LogSnapshot> {
        let contracts: HashSet<&str> = query.contract_ids.iter().map(String::as_str).collect();
        let states = filter_window(
            &self.states,
            "state",
            REPORTED_DATE,
            &contracts,
            query.start,
            query.end,
        )?;
        let operations = filter_window(
            &self.operations,
            "operation",
            ORDER_RECEIPT_DATE,
            &contracts,
            query.start - tolerance,
            query.end.map(|end| end + tolerance),
        )?;
        Ok(LogSnapshot { operations, states })
    }
}

fn filter_window(
    table: &LogTable,
    sheet: &str,
    time_column: &str,
    contracts: &HashSet<&str>,
    start: NaiveDateTime,
    end: Option<NaiveDateTime>,
) -> Result<LogTable> {
    let id_idx = table.require_column(CONTRACT_ID, sheet)?;
    let time_idx = table.require_column(time_column, sheet)?;

    let mut filtered = LogTable::new(table.columns.clone());
    let mut undated = 0usize;
    for row in &table.rows {
        let Some(id) = row[id_idx].as_deref() else {
            continue;
        };
        if !contracts.contains(id) {
            continue;
        }
        let Some(time) = row[time_idx].as_deref().and_then(parse_timestamp) else {
            undated += 1;
            continue;
        };
        if time >= start && end.map_or(true, |end| time <= end) {
            filtered.rows.push(row.clone());
        }
    }

    if undated > 0 {
        tracing::warn!(
            "⚠️ Dropped {} {} row(s) without a usable {}",
            undated,
            sheet,
            time_column
        );
    }
    Ok(filtered)
}

struct JsonRow<'a> {
    columns: &'a [String],
    values: Vec<serde_json::Value>,
}

impl Serialize for JsonRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl MergedLogDataset {
    /// Column order used for export: match summary first, then state columns, then operation columns.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            CONTRACT_ID.to_string(),
            REPORTED_DATE.to_string(),
            ORDER_RECEIPT_DATE.to_string(),
            TIME_DIFF_SECONDS.to_string(),
            IS_REMOTE_OPERATION.to_string(),
        ];
        columns.extend(self.state_columns.iter().cloned());
        columns.extend(self.operation_columns.iter().cloned());
        columns
    }

    pub fn matched_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_remote_operation).count()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.columns())?;
        for record in &self.records {
            let mut row = vec![
                record.contract_id.clone(),
                format_timestamp(&record.state_time),
                record
                    .operation_time
                    .as_ref()
                    .map(format_timestamp)
                    .unwrap_or_default(),
                record
                    .time_diff_seconds
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                record.is_remote_operation.to_string(),
            ];
            row.extend(
                record
                    .state_payload
                    .iter()
                    .chain(record.operation_payload.iter())
                    .map(|v| v.clone().unwrap_or_default()),
            );
            writer.write_record(&row)?;
        }
        writer.into_inner().map_err(|e| NotebookError::ProcessingError {
            message: format!("failed to flush CSV buffer: {}", e),
        })
    }

    /// Restores an exported dataset. `operation_columns` are the configured
    /// operation-sheet column names; they (or their `_op` forms) mark where
    /// the operation payload begins.
    pub fn from_csv(data: &[u8], operation_columns: &[String]) -> Result<Self> {
        let table = LogTable::from_csv(data)?;
        let expected_front = [
            CONTRACT_ID,
            REPORTED_DATE,
            ORDER_RECEIPT_DATE,
            TIME_DIFF_SECONDS,
            IS_REMOTE_OPERATION,
        ];
        if table.columns.len() < expected_front.len()
            || table.columns[..expected_front.len()] != expected_front
        {
            return Err(NotebookError::ValidationError {
                message: format!(
                    "merged CSV must start with columns: {}",
                    expected_front.join(", ")
                ),
            });
        }

        let is_operation_column = |name: &str| {
            name.ends_with("_op") || operation_columns.iter().any(|c| c == name)
        };
        let rest = &table.columns[expected_front.len()..];
        let split = rest
            .iter()
            .position(|c| is_operation_column(c))
            .unwrap_or(rest.len());
        let state_columns = rest[..split].to_vec();
        let operation_columns = rest[split..].to_vec();

        let mut records = Vec::with_capacity(table.rows.len());
        for (i, row) in table.rows.into_iter().enumerate() {
            let line = i + 2;
            let contract_id = row[0].clone().ok_or_else(|| NotebookError::ValidationError {
                message: format!("line {}: {} is empty", line, CONTRACT_ID),
            })?;
            let state_time = row[1]
                .as_deref()
                .and_then(parse_timestamp)
                .ok_or_else(|| NotebookError::ValidationError {
                    message: format!("line {}: invalid {}", line, REPORTED_DATE),
                })?;
            let operation_time = row[2].as_deref().and_then(parse_timestamp);
            let time_diff_seconds = row[3].as_deref().and_then(|v| v.parse::<f64>().ok());
            let is_remote_operation = row[4].as_deref() == Some("true");
            let payload = &row[expected_front.len()..];
            records.push(MergedRecord {
                contract_id,
                state_time,
                operation_time,
                time_diff_seconds,
                is_remote_operation,
                state_payload: payload[..split].to_vec(),
                operation_payload: payload[split..].to_vec(),
            });
        }

        Ok(Self {
            state_columns,
            operation_columns,
            records,
        })
    }

    /// Objects keep the key order of [`columns`](Self::columns).
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let columns = self.columns();
        let rows: Vec<JsonRow<'_>> = self
            .records
            .iter()
            .map(|record| {
                let optional = |value: Option<serde_json::Value>| {
                    value.unwrap_or(serde_json::Value::Null)
                };
                let mut values = vec![
                    record.contract_id.clone().into(),
                    format_timestamp(&record.state_time).into(),
                    optional(record.operation_time.as_ref().map(|t| format_timestamp(t).into())),
                    optional(record.time_diff_seconds.map(serde_json::Value::from)),
                    record.is_remote_operation.into(),
                ];
                values.extend(
                    record
                        .state_payload
                        .iter()
                        .chain(&record.operation_payload)
                        .map(|value| optional(value.clone().map(serde_json::Value::from))),
                );
                JsonRow {
                    columns: &columns,
                    values,
                }
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&rows)?)
    }
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts the timestamp shapes seen in spreadsheet exports. Date-only values
/// resolve to midnight and offset timestamps are normalised to UTC.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
