//! Presentation formatting for dates, durations and numbers.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{
    format_date, format_date_with, format_hours, format_large_number, format_minutes_to_hours,
    format_relative_time, format_relative_time_from, NumericInput,
};
