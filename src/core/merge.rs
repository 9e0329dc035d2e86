//! Nearest-time matching of state changes to remote operations.

use crate::domain::logs::{
    parse_timestamp, LogTable, MergedLogDataset, MergedRecord, CONTRACT_ID, ORDER_RECEIPT_DATE,
    REPORTED_DATE,
};
use crate::utils::error::{NotebookError, Result};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;

const STATE_SUFFIX: &str = "_state";
const OPERATION_SUFFIX: &str = "_op";

struct KeyedRow {
    contract_id: String,
    time: NaiveDateTime,
    index: usize,
}

/// Matches every state row to the operation of the same contract whose
/// time is nearest, provided the gap is within `tolerance` (inclusive).
///
/// Equal distances resolve to the earlier operation. Among operations that
/// share a timestamp, the last one wins when looking back and the first one
/// when looking forward. Output follows `(ContractId, ReportedDate)` order,
/// keeping input order for equal keys.
pub fn merge_logs(
    operations: &LogTable,
    states: &LogTable,
    tolerance: Duration,
) -> Result<MergedLogDataset> {
    let op_keys = keyed_rows(operations, "operation", ORDER_RECEIPT_DATE)?;
    let mut state_keys = keyed_rows(states, "state", REPORTED_DATE)?;

    let mut by_contract: HashMap<&str, Vec<(NaiveDateTime, usize)>> = HashMap::new();
    for row in &op_keys {
        by_contract
            .entry(row.contract_id.as_str())
            .or_default()
            .push((row.time, row.index));
    }
    for ops in by_contract.values_mut() {
        ops.sort_by_key(|(time, _)| *time);
    }

    let state_payload = payload_indices(states, REPORTED_DATE);
    let op_payload = payload_indices(operations, ORDER_RECEIPT_DATE);
    let (state_columns, operation_columns) =
        suffixed_columns(states, &state_payload, operations, &op_payload);

    state_keys.sort_by(|a, b| {
        a.contract_id
            .cmp(&b.contract_id)
            .then_with(|| a.time.cmp(&b.time))
    });

    let mut records = Vec::with_capacity(state_keys.len());
    for state in &state_keys {
        let matched = by_contract
            .get(state.contract_id.as_str())
            .and_then(|ops| nearest(ops, state.time, tolerance));

        let state_row = &states.rows[state.index];
        let (operation_time, time_diff_seconds, operation_payload) = match matched {
            Some((time, op_index)) => {
                let op_row = &operations.rows[op_index];
                (
                    Some(time),
                    Some(seconds_between(state.time, time)),
                    op_payload.iter().map(|&i| op_row[i].clone()).collect(),
                )
            }
            None => (None, None, vec![None; op_payload.len()]),
        };

        records.push(MergedRecord {
            contract_id: state.contract_id.clone(),
            state_time: state.time,
            operation_time,
            time_diff_seconds,
            is_remote_operation: matched.is_some(),
            state_payload: state_payload.iter().map(|&i| state_row[i].clone()).collect(),
            operation_payload,
        });
    }

    let dataset = MergedLogDataset {
        state_columns,
        operation_columns,
        records,
    };
    tracing::debug!(
        "🔗 Matched {} of {} state change(s) within {} minute(s)",
        dataset.matched_count(),
        dataset.records.len(),
        tolerance.num_minutes()
    );
    Ok(dataset)
}

fn keyed_rows(table: &LogTable, sheet: &str, time_column: &str) -> Result<Vec<KeyedRow>> {
    let id_idx = table.require_column(CONTRACT_ID, sheet)?;
    let time_idx = table.require_column(time_column, sheet)?;

    table
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let contract_id = row[id_idx].clone().ok_or_else(|| NotebookError::ValidationError {
                message: format!("{} row {}: {} is empty", sheet, index + 1, CONTRACT_ID),
            })?;
            let raw = row[time_idx].as_deref().unwrap_or("");
            let time = parse_timestamp(raw).ok_or_else(|| NotebookError::ValidationError {
                message: format!(
                    "{} row {}: cannot parse {} '{}'",
                    sheet,
                    index + 1,
                    time_column,
                    raw
                ),
            })?;
            Ok(KeyedRow {
                contract_id,
                time,
                index,
            })
        })
        .collect()
}

/// `ops` must be sorted by time.
fn nearest(
    ops: &[(NaiveDateTime, usize)],
    at: NaiveDateTime,
    tolerance: Duration,
) -> Option<(NaiveDateTime, usize)> {
    let after_backward = ops.partition_point(|(time, _)| *time <= at);
    let backward = after_backward.checked_sub(1).map(|i| ops[i]);
    let forward = ops.get(ops.partition_point(|(time, _)| *time < at)).copied();

    let best = match (backward, forward) {
        (Some(b), Some(f)) => {
            if at - b.0 <= f.0 - at {
                b
            } else {
                f
            }
        }
        (Some(b), None) => b,
        (None, Some(f)) => f,
        (None, None) => return None,
    };

    let gap = if best.0 <= at { at - best.0 } else { best.0 - at };
    (gap <= tolerance).then_some(best)
}

fn seconds_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    let delta = if a >= b { a - b } else { b - a };
    delta.num_milliseconds() as f64 / 1000.0
}

fn payload_indices(table: &LogTable, time_column: &str) -> Vec<usize> {
    table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != CONTRACT_ID && name.as_str() != time_column)
        .map(|(i, _)| i)
        .collect()
}

fn suffixed_columns(
    states: &LogTable,
    state_payload: &[usize],
    operations: &LogTable,
    op_payload: &[usize],
) -> (Vec<String>, Vec<String>) {
    let state_names: Vec<&str> = state_payload.iter().map(|&i| states.columns[i].as_str()).collect();
    let op_names: Vec<&str> = op_payload
        .iter()
        .map(|&i| operations.columns[i].as_str())
        .collect();

    let rename = |names: &[&str], others: &[&str], suffix: &str| -> Vec<String> {
        names
            .iter()
            .map(|name| {
                if others.contains(name) {
                    format!("{}{}", name, suffix)
                } else {
                    name.to_string()
                }
            })
            .collect()
    };

    (
        rename(&state_names, &op_names, STATE_SUFFIX),
        rename(&op_names, &state_names, OPERATION_SUFFIX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> LogTable {
        let mut table = LogTable::new(columns.iter().map(|c| c.to_string()).collect());
        table.rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| (!v.is_empty()).then(|| v.to_string()))
                    .collect()
            })
            .collect();
        table
    }

    fn ops() -> LogTable {
        table(
            &["ContractId", "OrderReceiptDate", "RoomName", "PropertyValue"],
            &[
                &["C1", "2024-05-01 10:00:00", "Living", "on"],
                &["C1", "2024-05-01 10:10:00", "Bed", "off"],
                &["C2", "2024-05-01 10:00:00", "Kitchen", "on"],
            ],
        )
    }

    #[test]
    fn test_nearest_match_within_tolerance() {
        let states = table(
            &["MessageName", "ContractId", "ReportedDate", "RoomName"],
            &[
                &["power", "C1", "2024-05-01 10:09:00", "Bed"],
                &["power", "C1", "2024-05-01 10:01:30", "Living"],
                &["power", "C1", "2024-05-01 11:00:00", "Living"],
                &["power", "C3", "2024-05-01 10:00:00", "Hall"],
            ],
        );

        let merged = merge_logs(&ops(), &states, Duration::minutes(5)).unwrap();

        assert_eq!(merged.state_columns, vec!["MessageName", "RoomName_state"]);
        assert_eq!(merged.operation_columns, vec!["RoomName_op", "PropertyValue"]);
        assert_eq!(merged.records.len(), 4);

        let first = &merged.records[0];
        assert_eq!(first.contract_id, "C1");
        assert_eq!(first.time_diff_seconds, Some(90.0));
        assert_eq!(first.operation_payload[1].as_deref(), Some("on"));

        let second = &merged.records[1];
        assert_eq!(second.time_diff_seconds, Some(60.0));
        assert_eq!(second.operation_payload[0].as_deref(), Some("Bed"));

        assert!(!merged.records[2].is_remote_operation);
        assert_eq!(merged.records[2].operation_payload, vec![None, None]);
        assert_eq!(merged.records[3].contract_id, "C3");
        assert!(!merged.records[3].is_remote_operation);
        assert_eq!(merged.matched_count(), 2);
    }

    #[test]
    fn test_equal_distance_prefers_earlier_operation() {
        let states = table(
            &["ContractId", "ReportedDate"],
            &[&["C1", "2024-05-01 10:05:00"]],
        );
        let merged = merge_logs(&ops(), &states, Duration::minutes(5)).unwrap();
        let record = &merged.records[0];
        assert_eq!(record.operation_payload[1].as_deref(), Some("on"));
        assert_eq!(record.time_diff_seconds, Some(300.0));
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let states = table(
            &["ContractId", "ReportedDate"],
            &[&["C2", "2024-05-01 10:05:00"], &["C2", "2024-05-01 10:05:01"]],
        );
        let merged = merge_logs(&ops(), &states, Duration::minutes(5)).unwrap();
        assert!(merged.records[0].is_remote_operation);
        assert!(!merged.records[1].is_remote_operation);
    }

    #[test]
    fn test_duplicate_operation_times() {
        let ops = table(
            &["ContractId", "OrderReceiptDate", "PropertyValue"],
            &[
                &["C1", "2024-05-01 10:00:00", "first"],
                &["C1", "2024-05-01 10:00:00", "second"],
                &["C1", "2024-05-01 10:20:00", "third"],
                &["C1", "2024-05-01 10:20:00", "fourth"],
            ],
        );
        let states = table(
            &["ContractId", "ReportedDate"],
            &[&["C1", "2024-05-01 10:01:00"], &["C1", "2024-05-01 10:19:00"]],
        );
        let merged = merge_logs(&ops, &states, Duration::minutes(5)).unwrap();
        assert_eq!(merged.records[0].operation_payload[0].as_deref(), Some("second"));
        assert_eq!(merged.records[1].operation_payload[0].as_deref(), Some("third"));
    }

    #[test]
    fn test_output_sorted_by_contract_then_time() {
        let states = table(
            &["ContractId", "ReportedDate", "MessageName"],
            &[
                &["C2", "2024-05-01 09:00:00", "a"],
                &["C1", "2024-05-01 10:00:00", "b"],
                &["C1", "2024-05-01 10:00:00", "c"],
                &["C1", "2024-05-01 08:00:00", "d"],
            ],
        );
        let merged = merge_logs(&ops(), &states, Duration::minutes(1)).unwrap();
        let order: Vec<_> = merged
            .records
            .iter()
            .map(|r| r.state_payload[0].clone().unwrap())
            .collect();
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_unparseable_key_time_is_an_error() {
        let states = table(
            &["ContractId", "ReportedDate"],
            &[&["C1", "not a time"]],
        );
        assert!(matches!(
            merge_logs(&ops(), &states, Duration::minutes(5)),
            Err(NotebookError::ValidationError { .. })
        ));

        let states = table(&["ContractId", "ReportedDate"], &[&["C1", ""]]);
        assert!(merge_logs(&ops(), &states, Duration::minutes(5)).is_err());
    }

    #[test]
    fn test_missing_key_column_is_an_error() {
        let states = table(&["ContractId"], &[&["C1"]]);
        assert!(merge_logs(&ops(), &states, Duration::minutes(5)).is_err());
    }
}
