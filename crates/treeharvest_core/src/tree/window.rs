//! Modification-window filtering and OAI datestamps.
//!
//! # Invariants
//! - Filtering works on whole trees: a tree is excluded only when it lies
//!   entirely outside the window. Both boundaries are inclusive.
//! - Datestamps are UTC, rendered as `YYYY-MM-DDThh:mm:ssZ`.

use super::builder::{ModificationBounds, RecordTree};
use crate::model::record::EpochMillis;
use std::error::Error;
use std::fmt::{Display, Formatter};
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Errors from parsing a window or rendering a datestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Text is neither `YYYY-MM-DD` nor `YYYY-MM-DDThh:mm:ssZ`.
    InvalidDatestamp(String),
    /// `from` and `until` use different granularities.
    MismatchedGranularity,
    /// `from` is later than `until`.
    FromAfterUntil,
    /// Timestamp cannot be represented as a calendar date.
    OutOfRange(EpochMillis),
}

impl Display for WindowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDatestamp(text) => write!(f, "invalid datestamp `{text}`"),
            Self::MismatchedGranularity => {
                write!(f, "from and until must use the same granularity")
            }
            Self::FromAfterUntil => write!(f, "from must not be later than until"),
            Self::OutOfRange(value) => write!(f, "timestamp out of range: {value}"),
        }
    }
}

impl Error for WindowError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    Day,
    Second,
}

/// Optional `[from, until]` bound, epoch milliseconds, both inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModificationWindow {
    pub from: Option<EpochMillis>,
    pub until: Option<EpochMillis>,
}

impl ModificationWindow {
    pub fn new(from: Option<EpochMillis>, until: Option<EpochMillis>) -> Self {
        Self { from, until }
    }

    /// Parses OAI `from`/`until` arguments.
    ///
    /// A day-granularity `until` covers the whole day.
    pub fn parse(from: Option<&str>, until: Option<&str>) -> Result<Self, WindowError> {
        let from = from.map(parse_datestamp).transpose()?;
        let until = until.map(parse_datestamp).transpose()?;

        if let (Some((_, from_granularity)), Some((_, until_granularity))) = (&from, &until) {
            if from_granularity != until_granularity {
                return Err(WindowError::MismatchedGranularity);
            }
        }

        let from = from.map(|(instant, _)| to_epoch_millis(instant));
        let until = until
            .map(|(instant, granularity)| match granularity {
                Granularity::Day => instant
                    .checked_add(Duration::DAY - Duration::MILLISECOND)
                    .map(to_epoch_millis)
                    .ok_or(WindowError::OutOfRange(to_epoch_millis(instant))),
                Granularity::Second => Ok(to_epoch_millis(instant)),
            })
            .transpose()?;

        if let (Some(from), Some(until)) = (from, until) {
            if from > until {
                return Err(WindowError::FromAfterUntil);
            }
        }

        Ok(Self { from, until })
    }

    /// Whether a span of modification times touches the window.
    pub fn includes_bounds(&self, bounds: ModificationBounds) -> bool {
        if let Some(from) = self.from {
            if bounds.latest < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if bounds.earliest > until {
                return false;
            }
        }
        true
    }

    /// Whether `tree` belongs in a harvest bounded by this window.
    pub fn includes(&self, tree: &RecordTree) -> bool {
        self.includes_bounds(tree.bounds())
    }
}

/// Renders epoch milliseconds as an OAI second-granularity datestamp.
pub fn format_datestamp(value: EpochMillis) -> Result<String, WindowError> {
    let instant = OffsetDateTime::from_unix_timestamp_nanos(i128::from(value) * NANOS_PER_MILLI)
        .map_err(|_| WindowError::OutOfRange(value))?;
    instant
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))
        .map_err(|_| WindowError::OutOfRange(value))
}

fn parse_datestamp(text: &str) -> Result<(OffsetDateTime, Granularity), WindowError> {
    let trimmed = text.trim();
    let invalid = || WindowError::InvalidDatestamp(trimmed.to_string());

    if trimmed.len() == "YYYY-MM-DD".len() {
        let date = Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
            .map_err(|_| invalid())?;
        return Ok((date.midnight().assume_utc(), Granularity::Day));
    }

    let instant = PrimitiveDateTime::parse(
        trimmed,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"),
    )
    .map_err(|_| invalid())?;
    Ok((instant.assume_utc(), Granularity::Second))
}

fn to_epoch_millis(instant: OffsetDateTime) -> EpochMillis {
    (instant.unix_timestamp_nanos() / NANOS_PER_MILLI) as EpochMillis
}
