//! Datetime-based cursor
//!
//! Slices a `[start, end]` window into steps and tracks the highest
//! datetime observed in the configured cursor field.

use super::types::{Cursor, CursorSlice, CursorSliceIter, CursorState, Record, StreamSlice};
use crate::error::{Error, Result};
use crate::types::JsonValue;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Upper bound for a rewind, keeps the arithmetic inside chrono's range
const MAX_REWIND_SECONDS: u64 = 100 * 365 * 24 * 3600;

/// Configuration for a [`DatetimeCursor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeCursorConfig {
    /// Record field holding the cursor value
    pub cursor_field: String,

    /// Earliest datetime to sync from
    pub start: String,

    /// Latest datetime to sync to ("now" or absent means the current time)
    #[serde(default)]
    pub end: Option<String>,

    /// Slice width (e.g. "1d", "12h", "P1D"); absent means one slice
    #[serde(default)]
    pub step: Option<String>,

    /// Smallest distinguishable cursor increment (e.g. "1s", "PT0.000001S")
    #[serde(default)]
    pub cursor_granularity: Option<String>,

    /// Format used to serialize cursor values and slice boundaries
    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,

    /// Extra formats accepted when parsing record values
    #[serde(default)]
    pub cursor_datetime_formats: Vec<String>,

    /// How far to rewind from the committed value when producing slices
    #[serde(default)]
    pub lookback_window: Option<String>,

    /// Slice key for the lower boundary
    #[serde(default = "default_start_param")]
    pub start_param: String,

    /// Slice key for the upper boundary
    #[serde(default = "default_end_param")]
    pub end_param: String,
}

fn default_datetime_format() -> String {
    "%Y-%m-%dT%H:%M:%SZ".to_string()
}

fn default_start_param() -> String {
    "start_time".to_string()
}

fn default_end_param() -> String {
    "end_time".to_string()
}

impl DatetimeCursorConfig {
    /// Create a config with default format and slice keys
    pub fn new(cursor_field: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            cursor_field: cursor_field.into(),
            start: start.into(),
            end: None,
            step: None,
            cursor_granularity: None,
            datetime_format: default_datetime_format(),
            cursor_datetime_formats: Vec::new(),
            lookback_window: None,
            start_param: default_start_param(),
            end_param: default_end_param(),
        }
    }

    /// Set the end datetime
    #[must_use]
    pub fn with_end(mut self, end: impl Into<String>) -> Self {
        self.end = Some(end.into());
        self
    }

    /// Set slice step and granularity
    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>, granularity: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self.cursor_granularity = Some(granularity.into());
        self
    }

    /// Set the output datetime format
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.datetime_format = format.into();
        self
    }

    /// Set the lookback window
    #[must_use]
    pub fn with_lookback(mut self, lookback: impl Into<String>) -> Self {
        self.lookback_window = Some(lookback.into());
        self
    }

    /// Set the slice boundary keys
    #[must_use]
    pub fn with_slice_params(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_param = start.into();
        self.end_param = end.into();
        self
    }
}

/// Cursor over a datetime field
#[derive(Debug, Clone)]
pub struct DatetimeCursor {
    cursor_field: String,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    step: Option<Duration>,
    granularity: Duration,
    lookback: Duration,
    rewind: Duration,
    output_format: String,
    input_formats: Vec<String>,
    start_param: String,
    end_param: String,
    committed: Option<DateTime<Utc>>,
    highest_observed: Option<DateTime<Utc>>,
    slices_started: bool,
}

impl DatetimeCursor {
    /// Build a cursor from its configuration
    pub fn new(config: &DatetimeCursorConfig) -> Result<Self> {
        let mut input_formats = vec![config.datetime_format.clone()];
        input_formats.extend(config.cursor_datetime_formats.iter().cloned());

        let start = parse_datetime(&config.start, &input_formats)
            .ok_or_else(|| Error::invalid_value("start", format!("Invalid datetime: {}", config.start)))?;
        let end = match config.end.as_deref() {
            None | Some("now") => None,
            Some(end) => Some(
                parse_datetime(end, &input_formats)
                    .ok_or_else(|| Error::invalid_value("end", format!("Invalid datetime: {end}")))?,
            ),
        };
        let step = config.step.as_deref().map(parse_duration).transpose()?;
        if step.is_some_and(|s| s <= Duration::zero()) {
            return Err(Error::invalid_value("step", "Step must be positive"));
        }
        let granularity = config
            .cursor_granularity
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or_else(Duration::zero);
        let lookback = config
            .lookback_window
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or_else(Duration::zero);

        Ok(Self {
            cursor_field: config.cursor_field.clone(),
            start,
            end,
            step,
            granularity,
            lookback,
            rewind: Duration::zero(),
            output_format: config.datetime_format.clone(),
            input_formats,
            start_param: config.start_param.clone(),
            end_param: config.end_param.clone(),
            committed: None,
            highest_observed: None,
            slices_started: false,
        })
    }

    /// Record field holding the cursor value
    pub fn cursor_field(&self) -> &str {
        &self.cursor_field
    }

    fn format(&self, dt: DateTime<Utc>) -> String {
        dt.format(&self.output_format).to_string()
    }

    fn parse_value(&self, value: &JsonValue) -> Option<DateTime<Utc>> {
        match value {
            JsonValue::String(s) => parse_datetime(s, &self.input_formats),
            JsonValue::Number(n) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            _ => None,
        }
    }

    fn record_value(&self, record: &Record) -> Option<DateTime<Utc>> {
        let value = record.value_at(&self.cursor_field)?;
        let parsed = self.parse_value(value);
        if parsed.is_none() {
            warn!(
                "Could not parse cursor value {} of field '{}' in stream '{}'",
                value, self.cursor_field, record.stream
            );
        }
        parsed
    }

    fn slice_bound(&self, slice: &CursorSlice, param: &str) -> Option<DateTime<Utc>> {
        slice.get(param).and_then(|v| self.parse_value(v))
    }

    fn lower_bound(&self) -> DateTime<Utc> {
        match self.committed {
            Some(committed) => committed
                .checked_sub_signed(self.lookback)
                .and_then(|t| t.checked_sub_signed(self.rewind))
                .map_or(self.start, |t| t.max(self.start)),
            None => self.start,
        }
    }

    fn state_for(&self, value: Option<DateTime<Utc>>) -> CursorState {
        let mut state = CursorState::new();
        if let Some(value) = value {
            state.insert(self.cursor_field.clone(), JsonValue::String(self.format(value)));
        }
        state
    }
}

impl Cursor for DatetimeCursor {
    fn set_initial_state(&mut self, state: &CursorState) -> Result<()> {
        if self.slices_started {
            return Err(Error::cursor(
                "Initial state can only be set before slices are produced",
            ));
        }
        if state.is_empty() {
            self.committed = None;
            return Ok(());
        }
        let value = state.get(&self.cursor_field).ok_or_else(|| {
            Error::invalid_state(format!(
                "Cursor state has no value for field '{}'",
                self.cursor_field
            ))
        })?;
        let parsed = self.parse_value(value).ok_or_else(|| {
            Error::invalid_state(format!("Invalid cursor value {value} in state"))
        })?;
        self.committed = Some(parsed);
        Ok(())
    }

    fn stream_slices(&mut self) -> CursorSliceIter {
        self.slices_started = true;
        let end = self.end.unwrap_or_else(Utc::now);
        let next = self.lower_bound();
        debug!(
            "Generating datetime slices from {} to {}",
            self.format(next),
            self.format(end)
        );
        Box::new(DatetimeSlices {
            next: Some(next),
            end,
            step: self.step,
            granularity: self.granularity,
            format: self.output_format.clone(),
            start_param: self.start_param.clone(),
            end_param: self.end_param.clone(),
        })
    }

    fn observe(&mut self, slice: &StreamSlice, record: &Record) {
        let Some(value) = self.record_value(record) else {
            return;
        };

        let lower = self.slice_bound(&slice.cursor_slice, &self.start_param);
        let upper = self.slice_bound(&slice.cursor_slice, &self.end_param);
        if lower.is_some_and(|l| value < l) || upper.is_some_and(|u| value > u) {
            debug!(
                "Record cursor value {} is outside slice {}",
                self.format(value),
                slice.describe()
            );
            return;
        }

        if self.highest_observed.map_or(true, |h| value > h) {
            self.highest_observed = Some(value);
        }
    }

    fn close_slice(&mut self, _slice: &StreamSlice) -> Result<()> {
        if let Some(observed) = self.highest_observed.take() {
            if self.committed.map_or(true, |c| observed > c) {
                self.committed = Some(observed);
            }
        }
        Ok(())
    }

    fn get_stream_state(&self) -> CursorState {
        self.state_for(self.committed)
    }

    fn get_updated_state(&self) -> CursorState {
        let updated = match (self.committed, self.highest_observed) {
            (Some(c), Some(h)) => Some(c.max(h)),
            (c, h) => c.or(h),
        };
        self.state_for(updated)
    }

    fn should_be_synced(&self, record: &Record) -> bool {
        let Some(raw) = record.value_at(&self.cursor_field) else {
            warn!(
                "Record in stream '{}' has no cursor field '{}'; emitting it anyway",
                record.stream, self.cursor_field
            );
            return true;
        };
        let Some(value) = self.parse_value(raw) else {
            warn!(
                "Could not parse cursor value {} in stream '{}'; emitting record anyway",
                raw, record.stream
            );
            return true;
        };
        let end = self.end.unwrap_or_else(Utc::now);
        value >= self.lower_bound() && value <= end
    }

    fn position(&self, record: &Record) -> Option<i64> {
        self.record_value(record).map(|v| v.timestamp())
    }

    fn committed_position(&self) -> Option<i64> {
        self.committed.map(|c| c.timestamp())
    }

    fn start_position(&self) -> Option<i64> {
        Some(self.lower_bound().timestamp())
    }

    fn rewind(&mut self, units: u64) {
        self.rewind = Duration::seconds(units.min(MAX_REWIND_SECONDS) as i64);
    }
}

/// Lazy iterator over datetime slices
struct DatetimeSlices {
    next: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    step: Option<Duration>,
    granularity: Duration,
    format: String,
    start_param: String,
    end_param: String,
}

impl Iterator for DatetimeSlices {
    type Item = CursorSlice;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if current > self.end {
            return None;
        }

        let slice_end = match self.step {
            Some(step) => current
                .checked_add_signed(step)
                .and_then(|t| t.checked_sub_signed(self.granularity))
                .map_or(self.end, |t| t.min(self.end)),
            None => self.end,
        };
        if slice_end < self.end {
            self.next = slice_end.checked_add_signed(self.granularity);
        }

        let mut slice = CursorSlice::new();
        slice.insert(
            self.start_param.clone(),
            JsonValue::String(current.format(&self.format).to_string()),
        );
        slice.insert(
            self.end_param.clone(),
            JsonValue::String(slice_end.format(&self.format).to_string()),
        );
        Some(slice)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a datetime string with the given formats, then common fallbacks
pub fn parse_datetime(s: &str, formats: &[String]) -> Option<DateTime<Utc>> {
    for fmt in formats {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(ndt, Utc));
        }
        if let Ok(nd) = NaiveDate::parse_from_str(s, fmt) {
            return nd
                .and_hms_opt(0, 0, 0)
                .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let fallbacks = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"];
    for fmt in fallbacks {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(ndt, Utc));
        }
        if let Ok(nd) = NaiveDate::parse_from_str(s, fmt) {
            return nd
                .and_hms_opt(0, 0, 0)
                .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc));
        }
    }

    None
}

/// Parse a duration like "1d", "2h", "30m", "15s", "1w" or an ISO 8601
/// duration like "P1D", "PT1H", "PT0.000001S"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(iso) = s.strip_prefix('P') {
        return parse_iso_duration(iso)
            .ok_or_else(|| Error::config(format!("Invalid duration: {s}")));
    }

    let (num_str, suffix) = if let Some(stripped) = s.strip_suffix('d') {
        (stripped, 'd')
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 'h')
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 'm')
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 's')
    } else if let Some(stripped) = s.strip_suffix('w') {
        (stripped, 'w')
    } else {
        // Assume days if no suffix
        (s, 'd')
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::config(format!("Invalid duration number: {num_str}")))?;

    let duration = match suffix {
        'w' => Duration::try_weeks(num),
        'd' => Duration::try_days(num),
        'h' => Duration::try_hours(num),
        'm' => Duration::try_minutes(num),
        's' => Duration::try_seconds(num),
        _ => return Err(Error::config(format!("Invalid duration suffix: {suffix}"))),
    };

    duration.ok_or_else(|| Error::config(format!("Duration out of range: {s}")))
}

fn parse_iso_duration(s: &str) -> Option<Duration> {
    let (date_part, time_part) = match s.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (s, None),
    };

    let mut total = Duration::zero();
    let mut number = String::new();
    for c in date_part.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let n: i64 = number.parse().ok()?;
        number.clear();
        let part = match c {
            'Y' => Duration::try_days(n.checked_mul(365)?)?,
            'M' => Duration::try_days(n.checked_mul(30)?)?,
            'W' => Duration::try_weeks(n)?,
            'D' => Duration::try_days(n)?,
            _ => return None,
        };
        total = total.checked_add(&part)?;
    }
    if !number.is_empty() {
        return None;
    }

    for c in time_part.unwrap_or_default().chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let part = match c {
            'H' => Duration::try_hours(number.parse().ok()?)?,
            'M' => Duration::try_minutes(number.parse().ok()?)?,
            'S' => {
                let micros = (number.parse::<f64>().ok()? * 1_000_000.0).round();
                if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
                    return None;
                }
                Duration::microseconds(micros as i64)
            }
            _ => return None,
        };
        total = total.checked_add(&part)?;
        number.clear();
    }
    if !number.is_empty() {
        return None;
    }

    Some(total)
}
