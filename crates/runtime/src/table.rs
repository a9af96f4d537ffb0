//! Statement results and their markdown rendering.
//!
//! Every cell arrives as a string (or NULL) regardless of column type, so
//! large integers and decimals are rendered verbatim and never pass through
//! floating point. Temporal types arrive epoch-encoded and are formatted to
//! match the output-format parameters sent with the statement.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Message substring the statements API uses when a statement did not finish
/// within the synchronous window.
pub const ASYNC_IN_PROGRESS: &str = "Asynchronous execution in progress.";

/// Response of the SQL statements API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    pub data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetMetaData {
    #[serde(default)]
    pub num_rows: u64,
    #[serde(default)]
    pub row_type: Vec<RowType>,
}

/// Column description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowType {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub scale: Option<i64>,
    #[serde(default)]
    pub precision: Option<i64>,
    #[serde(default)]
    pub nullable: Option<bool>,
}

impl StatementResponse {
    /// The statement is still running server-side.
    pub fn is_async_pending(&self) -> bool {
        self.code.is_some()
            && self
                .message
                .as_deref()
                .is_some_and(|m| m.contains(ASYNC_IN_PROGRESS))
    }

    /// A response that carries no result set is a failure, even though
    /// successful responses also carry a `code`.
    pub fn has_result_set(&self) -> bool {
        self.result_set_meta_data.is_some()
    }

    pub fn columns(&self) -> &[RowType] {
        self.result_set_meta_data
            .as_ref()
            .map(|m| m.row_type.as_slice())
            .unwrap_or(&[])
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    /// Render the result set as a GitHub-flavoured markdown table.
    pub fn to_markdown(&self) -> String {
        let columns = self.columns();
        if columns.is_empty() {
            return "(empty result set)".to_string();
        }

        let mut out = String::new();
        out.push('|');
        for col in columns {
            let _ = write!(out, " {} |", escape_cell(&col.name));
        }
        out.push('\n');
        out.push('|');
        for _ in columns {
            out.push_str(" --- |");
        }

        for row in &self.data {
            out.push('\n');
            out.push('|');
            for (i, col) in columns.iter().enumerate() {
                let cell = row
                    .get(i)
                    .and_then(|v| v.as_deref())
                    .map(|v| format_cell(v, col))
                    .unwrap_or_default();
                let _ = write!(out, " {} |", escape_cell(&cell));
            }
        }
        out
    }
}

/// Format one non-NULL cell according to its column type.
pub fn format_cell(value: &str, column: &RowType) -> String {
    let formatted = match column.data_type.to_lowercase().as_str() {
        "date" => format_date(value),
        "time" => format_time(value),
        "timestamp_ntz" | "timestamp_ltz" => format_timestamp(value),
        "timestamp_tz" => format_timestamp_tz(value),
        _ => None,
    };
    formatted.unwrap_or_else(|| value.to_string())
}

fn escape_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

/// Days since 1970-01-01.
fn format_date(value: &str) -> Option<String> {
    let days: i64 = value.trim().parse().ok()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = epoch.checked_add_signed(TimeDelta::try_days(days)?)?;
    Some(date.format("%Y-%b-%d").to_string())
}

/// Seconds since midnight, optionally fractional.
fn format_time(value: &str) -> Option<String> {
    let (secs, _) = split_epoch(value)?;
    let secs = u32::try_from(secs).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)?;
    Some(time.format("%H:%M:%S").to_string())
}

/// Seconds since epoch with a nanosecond fraction, e.g. `1700000000.123000000`.
fn format_timestamp(value: &str) -> Option<String> {
    let (secs, nanos) = split_epoch(value)?;
    let dt = DateTime::from_timestamp(secs, nanos)?;
    Some(dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

/// `<epoch.fraction> <offset minutes + 1440>`, e.g. `1616173619.000000000 960`.
fn format_timestamp_tz(value: &str) -> Option<String> {
    let (epoch, offset) = value.trim().split_once(' ')?;
    let (secs, nanos) = split_epoch(epoch)?;
    let offset_minutes: i32 = offset.trim().parse::<i32>().ok()? - 1440;
    let tz = FixedOffset::east_opt(offset_minutes * 60)?;
    let dt = DateTime::from_timestamp(secs, nanos)?.with_timezone(&tz);
    Some(dt.format("%Y-%m-%d %H:%M:%S%.3f %z").to_string())
}

fn split_epoch(value: &str) -> Option<(i64, u32)> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (value, ""),
    };
    let secs: i64 = whole.parse().ok()?;
    if frac.is_empty() {
        return Some((secs, 0));
    }
    if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let nanos: u32 = format!("{:0<9}", frac).parse().ok()?;
    // Negative epochs carry a fraction that counts away from zero.
    if secs < 0 && nanos > 0 {
        return Some((secs - 1, 1_000_000_000 - nanos));
    }
    Some((secs, nanos))
}
