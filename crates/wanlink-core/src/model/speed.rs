// ── Circuit speed ──
//
// Speeds are carried in megabits, rounded to one decimal so that the
// display form (`300.0M x 35.0M`) parses back to the identical value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Parsed circuit speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Speed {
    /// `down x up`, in megabits.
    Paired { down: f64, up: f64 },
    /// A single committed rate, in megabits.
    Single(f64),
    /// Mobile/cellular access; no meaningful wireline rate.
    Cellular,
    /// Low-earth-orbit satellite access.
    Satellite,
}

pub const CELLULAR_SENTINEL: &str = "Cell";
pub const SATELLITE_SENTINEL: &str = "Satellite";

impl Speed {
    /// Find the first speed expression inside `text`.
    ///
    /// Returns the byte offset where it starts, so callers can take the
    /// text before it as the provider.
    pub fn find_in(text: &str) -> Option<(usize, Speed)> {
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let starts_number = bytes[i].is_ascii_digit()
                && (i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'.'));
            if starts_number {
                if let Some((speed, _)) = scan_speed(&text[i..]) {
                    return Some((i, speed));
                }
            }
            i += 1;
        }
        None
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, Self::Cellular | Self::Satellite)
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paired { down, up } => write!(f, "{down:.1}M x {up:.1}M"),
            Self::Single(rate) => write!(f, "{rate:.1}M"),
            Self::Cellular => f.write_str(CELLULAR_SENTINEL),
            Self::Satellite => f.write_str(SATELLITE_SENTINEL),
        }
    }
}

impl FromStr for Speed {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case(CELLULAR_SENTINEL) {
            return Ok(Self::Cellular);
        }
        if trimmed.eq_ignore_ascii_case(SATELLITE_SENTINEL) {
            return Ok(Self::Satellite);
        }
        match scan_speed(trimmed) {
            Some((speed, consumed)) if trimmed[consumed..].trim().is_empty() => Ok(speed),
            _ => Err(CoreError::Parse {
                message: format!("unrecognized speed {trimmed:?}"),
            }),
        }
    }
}

impl From<Speed> for String {
    fn from(speed: Speed) -> Self {
        speed.to_string()
    }
}

impl TryFrom<String> for Speed {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Re-render a free-form speed in canonical form, or return it trimmed
/// when it does not parse.
pub fn normalize_speed(raw: &str) -> String {
    raw.parse::<Speed>()
        .map_or_else(|_| raw.trim().to_owned(), |s| s.to_string())
}

// ── Scanner ──────────────────────────────────────────────────────────

/// Scan `<rate> [x <rate>]` at the start of `text`.
fn scan_speed(text: &str) -> Option<(Speed, usize)> {
    let (first, mut pos) = scan_rate(text)?;

    let rest = &text[pos..];
    let after_ws = rest.len() - rest.trim_start().len();
    let mut cursor = pos + after_ws;
    if text[cursor..].starts_with(['x', 'X']) {
        cursor += 1;
        let rest = &text[cursor..];
        cursor += rest.len() - rest.trim_start().len();
        if let Some((second, len)) = scan_rate(&text[cursor..]) {
            pos = cursor + len;
            return Some((
                Speed::Paired {
                    down: first,
                    up: second,
                },
                pos,
            ));
        }
    }
    Some((Speed::Single(first), pos))
}

/// Scan `<number> [ws] <M|MB|G|GB>` and return megabits.
fn scan_rate(text: &str) -> Option<(f64, usize)> {
    let bytes = text.as_bytes();
    let mut end = 0;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot && end + 1 < bytes.len() && bytes[end + 1].is_ascii_digit() => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    if end == 0 {
        return None;
    }
    let value: f64 = text[..end].parse().ok()?;

    let mut pos = end;
    while pos < bytes.len() && bytes[pos] == b' ' {
        pos += 1;
    }
    let multiplier = match bytes.get(pos).map(u8::to_ascii_uppercase) {
        Some(b'M') => 1.0,
        Some(b'G') => 1000.0,
        _ => return None,
    };
    pos += 1;
    if bytes.get(pos).map(u8::to_ascii_uppercase) == Some(b'B') {
        pos += 1;
    }
    // `Mbps`, `Gbps` and similar suffixes.
    if bytes.get(pos..pos + 2).is_some_and(|s| s.eq_ignore_ascii_case(b"ps")) {
        pos += 2;
    }
    // The unit must end the token: `300 Miles` is not a rate.
    if bytes.get(pos).is_some_and(u8::is_ascii_alphanumeric) {
        return None;
    }

    Some((round_tenth(value * multiplier), pos))
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
