//! Progress markers in tool output
//!
//! Long-running scanners print progress in two recognisable shapes: free
//! text like `About 39.44% done; ETC: 10:45 (0:03:10 remaining)` and
//! attribute style like `percent="15.32" remaining="741"`. This module
//! turns raw output fragments into `(percent, remaining_seconds)` samples
//! and rate-limits how often those samples are pushed downstream.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

static FREE_TEXT_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)about\s+(\d{1,3}(?:\.\d+)?)%\s*done").unwrap());

static FREE_TEXT_REMAINING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\((\d+(?::\d{1,2}){0,2})\s+remaining\)").unwrap());

static ATTR_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"percent="(\d{1,3}(?:\.\d+)?)""#).unwrap());

static ATTR_REMAINING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"remaining="(\d+(?::\d{1,2}){0,2})""#).unwrap());

/// A progress sample parsed out of one output fragment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressHint {
    pub percent: Option<f64>,
    pub remaining_seconds: Option<u64>,
}

impl ProgressHint {
    pub fn is_empty(&self) -> bool {
        self.percent.is_none() && self.remaining_seconds.is_none()
    }
}

/// Parse progress markers from a text fragment.
///
/// Both marker families are recognised; when a fragment carries several
/// matches the last one wins, since scanners append markers as they go.
pub fn parse_progress(fragment: &str) -> ProgressHint {
    let mut hint = ProgressHint::default();

    for caps in FREE_TEXT_PERCENT
        .captures_iter(fragment)
        .chain(ATTR_PERCENT.captures_iter(fragment))
    {
        if let Ok(value) = caps[1].parse::<f64>() {
            if (0.0..=100.0).contains(&value) {
                hint.percent = Some(value);
            }
        }
    }

    for caps in FREE_TEXT_REMAINING
        .captures_iter(fragment)
        .chain(ATTR_REMAINING.captures_iter(fragment))
    {
        if let Some(secs) = parse_duration(&caps[1]) {
            hint.remaining_seconds = Some(secs);
        }
    }

    hint
}

/// Parse a duration token: bare seconds, `MM:SS`, or `H:MM:SS`.
pub fn parse_duration(token: &str) -> Option<u64> {
    let parts: Vec<&str> = token.split(':').collect();
    match parts.as_slice() {
        [secs] => secs.parse().ok(),
        [mins, secs] => {
            let m: u64 = mins.parse().ok()?;
            let s: u64 = secs.parse().ok()?;
            (s < 60).then_some(m * 60 + s)
        }
        [hours, mins, secs] => {
            let h: u64 = hours.parse().ok()?;
            let m: u64 = mins.parse().ok()?;
            let s: u64 = secs.parse().ok()?;
            (m < 60 && s < 60).then_some(h * 3600 + m * 60 + s)
        }
        _ => None,
    }
}

/// Per-process progress state owned by the supervising loop.
///
/// Downstream writes are rate-limited: a new sample is emitted only when
/// the percent moved by ≥ 0.1, the remaining estimate moved by ≥ 5s, or
/// ≥ 10s passed since the last emission.
#[derive(Debug)]
pub struct ProgressState {
    pub percent: f64,
    pub remaining_seconds: Option<u64>,
    last_emit: Option<Instant>,
}

const MIN_PERCENT_DELTA: f64 = 0.1;
const MIN_REMAINING_DELTA: u64 = 5;
const MAX_EMIT_INTERVAL: Duration = Duration::from_secs(10);

impl ProgressState {
    pub fn new() -> Self {
        Self {
            percent: 0.0,
            remaining_seconds: None,
            last_emit: None,
        }
    }

    /// Fold a parsed hint into the state, returning `true` when the update
    /// should be pushed downstream.
    pub fn apply(&mut self, hint: ProgressHint, now: Instant) -> bool {
        if hint.is_empty() {
            return false;
        }

        let new_percent = hint.percent.unwrap_or(self.percent);
        let new_remaining = hint.remaining_seconds.or(self.remaining_seconds);

        let percent_moved = (new_percent - self.percent).abs() >= MIN_PERCENT_DELTA;
        let remaining_moved = match (new_remaining, self.remaining_seconds) {
            (Some(a), Some(b)) => a.abs_diff(b) >= MIN_REMAINING_DELTA,
            (Some(_), None) => true,
            _ => false,
        };
        let stale = self
            .last_emit
            .is_none_or(|t| now.duration_since(t) >= MAX_EMIT_INTERVAL);

        self.percent = new_percent;
        self.remaining_seconds = new_remaining;

        if percent_moved || remaining_moved || stale {
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}
