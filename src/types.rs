//! Core data types used throughout the query engine
//!
//! This module defines the fundamental data structures shared by the
//! planner, the columnar operators, and the composite evaluator:
//!
//! # Key Types
//!
//! - **`Value`**: A single typed cell value (long, double, string, datetime)
//! - **`DataType`**: The declared type of a column
//! - **`TimeRange`**: Time window for queries (start, end) in epoch millis
//! - **`Interval`**: A request-scoped time range plus step/window/offset
//!
//! # Example
//!
//! ```rust
//! use metriq::types::{Interval, TimeRange, Value};
//!
//! let range = TimeRange::new(0, 600_000).unwrap();
//! let interval = Interval::new(range).with_step_ms(60_000).with_window_ms(300_000);
//!
//! // window > step triggers sliding-window aggregation downstream
//! assert!(interval.needs_sliding_window());
//! assert_eq!(Value::Long(3).as_f64(), Some(3.0));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

// ============================================================================
// Value and DataType
// ============================================================================

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer
    Long,
    /// 64-bit floating point
    Double,
    /// UTF-8 string
    Str,
    /// Timestamp in epoch milliseconds
    DateTime,
}

impl DataType {
    /// Check whether values of this type participate in arithmetic
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Long | DataType::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Long => write!(f, "LONG"),
            DataType::Double => write!(f, "DOUBLE"),
            DataType::Str => write!(f, "STRING"),
            DataType::DateTime => write!(f, "DATETIME"),
        }
    }
}

/// A single typed cell value
///
/// Doubles compare by bit pattern so that a `Value` can serve as part of a
/// hashable composite group key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// 64-bit signed integer
    Long(i64),
    /// 64-bit floating point
    Double(f64),
    /// UTF-8 string
    Str(String),
    /// Timestamp in epoch milliseconds
    DateTime(i64),
}

impl Value {
    /// The data type of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Long(_) => DataType::Long,
            Value::Double(_) => DataType::Double,
            Value::Str(_) => DataType::Str,
            Value::DateTime(_) => DataType::DateTime,
        }
    }

    /// Numeric view of this value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::DateTime(v) => Some(*v as f64),
            Value::Str(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => a == b,
            // Bit comparison keeps NaN-carrying keys stable inside hash maps
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Long(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::Double(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Str(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Value::DateTime(v) => {
                3u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
        }
    }
}

// ============================================================================
// TimeRange
// ============================================================================

/// Time window for queries (inclusive start, exclusive end) in epoch millis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (exclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range with validation
    ///
    /// # Returns
    ///
    /// - `Ok(TimeRange)` if start <= end
    /// - `Err` if start > end
    pub fn new(start: i64, end: i64) -> Result<Self, Error> {
        if start > end {
            return Err(Error::Configuration(format!(
                "invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a range without validation (inputs already checked)
    pub fn new_unchecked(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Duration of the range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Shift both bounds by a (possibly negative) number of milliseconds
    pub fn shifted(&self, delta_ms: i64) -> Self {
        Self {
            start: self.start + delta_ms,
            end: self.end + delta_ms,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Interval
// ============================================================================

/// Request-scoped time parameters for a metric query
///
/// `window > step` means every output bucket carries a trailing aggregation
/// over the preceding `window` milliseconds, which the plan builder turns
/// into a sliding-window stage. Offsets are stored negative: an offset of
/// `-300_000` asks for values five minutes in the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// The requested time range
    pub range: TimeRange,

    /// Bucket width in milliseconds (None = a single bucket over the range)
    pub step_ms: Option<i64>,

    /// Trailing window width in milliseconds
    pub window_ms: Option<i64>,

    /// Time shift in milliseconds, stored negative for "N ago"
    pub offset_ms: Option<i64>,
}

impl Interval {
    /// Create an interval covering a range with no step, window, or offset
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            step_ms: None,
            window_ms: None,
            offset_ms: None,
        }
    }

    /// Set the bucket step
    pub fn with_step_ms(mut self, step_ms: i64) -> Self {
        self.step_ms = Some(step_ms);
        self
    }

    /// Set the trailing window width
    pub fn with_window_ms(mut self, window_ms: i64) -> Self {
        self.window_ms = Some(window_ms);
        self
    }

    /// Set the time offset (negative for "N ago")
    pub fn with_offset_ms(mut self, offset_ms: i64) -> Self {
        self.offset_ms = Some(offset_ms);
        self
    }

    /// Whether the window is wider than the step, requiring a
    /// sliding-window aggregation stage
    pub fn needs_sliding_window(&self) -> bool {
        match (self.window_ms, self.step_ms) {
            (Some(window), Some(step)) => window > step,
            _ => false,
        }
    }

    /// Number of step buckets the range spans (1 when no step is set)
    ///
    /// A single bucket combined with an empty group-by is what makes a
    /// query's result scalar.
    pub fn bucket_count(&self) -> usize {
        match self.step_ms {
            None => 1,
            Some(step) if step <= 0 => 1,
            Some(step) => {
                let span = self.range.duration_ms();
                if span <= 0 {
                    1
                } else {
                    ((span + step - 1) / step) as usize
                }
            }
        }
    }

    /// The fetch range after folding in the offset
    pub fn effective_range(&self) -> TimeRange {
        match self.offset_ms {
            Some(offset) => self.range.shifted(offset),
            None => self.range,
        }
    }
}

/// Floor a timestamp to a step boundary
///
/// Buckets align to the epoch; negative timestamps floor toward negative
/// infinity so bucket edges stay consistent across the epoch boundary.
pub fn floor_to_step(timestamp_ms: i64, step_ms: i64) -> i64 {
    if step_ms <= 0 {
        return timestamp_ms;
    }
    timestamp_ms.div_euclid(step_ms) * step_ms
}

// ============================================================================
// Tests
// ============================================================================
