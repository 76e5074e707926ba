// Expirebot
// Copyright (C) 2025 Throneless Tech

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{ExpirebotError, Result};

pub const MS_PER_SECOND: u64 = 1000;
pub const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

const UNITS: [(&str, &str, u64); 4] = [
    ("days", "d", MS_PER_DAY),
    ("hours", "h", MS_PER_HOUR),
    ("minutes", "m", MS_PER_MINUTE),
    ("seconds", "s", MS_PER_SECOND),
];

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<days>[0-9]+)d)?\s*(?:(?P<hours>[0-9]+)h)?\s*(?:(?P<minutes>[0-9]+)m)?\s*(?:(?P<seconds>[0-9]+)s)?$",
    )
    .expect("duration pattern compiles")
});

/// Parses a compact duration into milliseconds.
pub fn parse_duration(input: &str) -> Result<u64> {
    let invalid = || ExpirebotError::InvalidFormat(input.to_owned());

    let captures = DURATION.captures(input.trim()).ok_or_else(invalid)?;

    let mut total: u64 = 0;
    let mut matched = false;
    for (name, _, unit) in UNITS {
        let Some(value) = captures.name(name) else {
            continue;
        };
        matched = true;
        let value: u64 = value.as_str().parse().map_err(|_| invalid())?;
        total = value
            .checked_mul(unit)
            .and_then(|ms| total.checked_add(ms))
            .ok_or_else(invalid)?;
    }

    if !matched {
        return Err(invalid());
    }
    Ok(total)
}

/// Renders milliseconds the way `parse_duration` reads them, dropping any
/// sub-second remainder.
pub fn format_duration(ms: u64) -> String {
    let mut remaining = ms;
    let mut out = String::new();
    for (_, suffix, unit) in UNITS {
        let count = remaining / unit;
        remaining %= unit;
        if count > 0 {
            out.push_str(&format!("{count}{suffix}"));
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}
