use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_GLOBAL_PREFIX: &str = "STD";
pub const DEFAULT_GLOBAL_PAD_WIDTH: usize = 3;
pub const DEFAULT_ROLL_PAD_WIDTH: usize = 4;
pub const DEFAULT_SCHOOL_CODE: &str = "102330";
/// Widest zero padding the formatter applies; wider requests are capped.
pub const MAX_PAD_WIDTH: usize = 12;

/// One existing student as seen by the allocator. Built fresh from a store
/// snapshot on every allocation and never written back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierRecord {
    pub global_id: Option<String>,
    pub scoped_id: Option<String>,
    pub scope_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationRequest {
    pub scope_key: Option<String>,
    pub preferred_global_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub global_id: String,
    pub scoped_id: String,
    pub registration_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocated {
    pub numeric: u128,
    pub formatted: String,
}

/// Per-workspace identifier layout. Stored as JSON under `ids.format`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdFormat {
    pub global_prefix: String,
    pub global_pad_width: usize,
    pub roll_pad_width: usize,
    pub year_prefix: String,
    pub school_code: String,
}

impl Default for IdFormat {
    fn default() -> Self {
        Self {
            global_prefix: DEFAULT_GLOBAL_PREFIX.to_string(),
            global_pad_width: DEFAULT_GLOBAL_PAD_WIDTH,
            roll_pad_width: DEFAULT_ROLL_PAD_WIDTH,
            year_prefix: current_year_prefix(),
            school_code: DEFAULT_SCHOOL_CODE.to_string(),
        }
    }
}

/// Two-digit session year, e.g. "26" during 2026.
pub fn current_year_prefix() -> String {
    format!("{:02}", Local::now().year().rem_euclid(100))
}

/// Extract the numeric suffix of a formatted identifier ("STD014" -> 14,
/// "0007" -> 7). Returns `None` for anything it cannot read; never panics.
///
/// When `expected_prefix` is given the value must start with it (ASCII
/// case-insensitive). Only ASCII digits count; every other character in the
/// remainder is dropped before parsing.
pub fn parse_suffix(value: Option<&str>, expected_prefix: Option<&str>) -> Option<u64> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }

    let rest = match expected_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => strip_prefix_ignore_case(value, prefix)?,
        None => value,
    };

    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    // Overflow is treated the same as "no number".
    digits.parse::<u64>().ok()
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    // `get` returns None on a non-char boundary, so multi-byte input is safe here.
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

fn format_id(prefix: &str, n: u128, pad_width: usize) -> String {
    let width = pad_width.min(MAX_PAD_WIDTH);
    format!("{prefix}{n:0width$}")
}

/// Smallest value above everything in `used`, formatted as `prefix` plus a
/// zero-padded number. Padding grows past `pad_width` instead of truncating
/// (999 used at width 3 gives "STD1000").
pub fn allocate_next(used: &BTreeSet<u64>, pad_width: usize, prefix: &str) -> Allocated {
    allocate_next_avoiding(used, pad_width, prefix, |_| false)
}

/// `allocate_next`, also stepping over formatted values for which `taken`
/// holds. Ids whose suffix does not fit in `u64` never reach `used`, so
/// callers pass them here as exact strings.
fn allocate_next_avoiding(
    used: &BTreeSet<u64>,
    pad_width: usize,
    prefix: &str,
    taken: impl Fn(&str) -> bool,
) -> Allocated {
    // u128 so the candidate keeps growing past u64::MAX. Each step skips a
    // distinct used value or taken string, so it stays bounded by the input.
    let mut candidate = used.iter().next_back().map_or(1, |&max| u128::from(max) + 1);

    loop {
        let formatted = format_id(prefix, candidate, pad_width);
        let in_used = parse_suffix(Some(&formatted), Some(prefix))
            .is_some_and(|n| used.contains(&n));
        if !in_used && !taken(&formatted) {
            return Allocated {
                numeric: candidate,
                formatted,
            };
        }
        candidate += 1;
    }
}

fn scope_of(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.is_empty())
}

/// Next roll number inside one scope (class). Bare zero-padded digits, no
/// prefix. Absent and empty scope keys share the same global scope.
///
/// Holds no state: callers re-run it whenever the scope changes.
pub fn allocate_scoped_roll(
    records: &[IdentifierRecord],
    scope_key: Option<&str>,
    pad_width: usize,
) -> String {
    let scope = scope_of(scope_key);
    let in_scope: Vec<&IdentifierRecord> = records
        .iter()
        .filter(|r| scope_of(r.scope_key.as_deref()) == scope)
        .collect();
    let used: BTreeSet<u64> = in_scope
        .iter()
        .filter_map(|r| parse_suffix(r.scoped_id.as_deref(), None))
        .collect();
    allocate_next_avoiding(&used, pad_width, "", |f| {
        in_scope.iter().any(|r| r.scoped_id.as_deref() == Some(f))
    })
    .formatted
}

pub fn compose_registration_code(year_prefix: &str, school_code: &str, scoped_roll: &str) -> String {
    format!("{year_prefix}{school_code}{scoped_roll}")
}

/// Honor `preferred` if no record carries exactly that global id; otherwise
/// (or when nothing is preferred) allocate the next free global id.
pub fn resolve_global_id(
    records: &[IdentifierRecord],
    preferred: Option<&str>,
    pad_width: usize,
    prefix: &str,
) -> String {
    if let Some(preferred) = preferred.filter(|p| !p.is_empty()) {
        let taken = records
            .iter()
            .any(|r| r.global_id.as_deref() == Some(preferred));
        if !taken {
            return preferred.to_string();
        }
    }

    let used: BTreeSet<u64> = records
        .iter()
        .filter_map(|r| parse_suffix(r.global_id.as_deref(), Some(prefix)))
        .collect();
    allocate_next_avoiding(&used, pad_width, prefix, |f| {
        records.iter().any(|r| r.global_id.as_deref() == Some(f))
    })
    .formatted
}

/// Full identifier set for a new student, computed against one snapshot.
/// The result is only a candidate until the store accepts the write.
pub fn allocate(
    records: &[IdentifierRecord],
    request: &AllocationRequest,
    format: &IdFormat,
) -> AllocationResult {
    let global_id = resolve_global_id(
        records,
        request.preferred_global_id.as_deref(),
        format.global_pad_width,
        &format.global_prefix,
    );
    let scoped_id = allocate_scoped_roll(
        records,
        request.scope_key.as_deref(),
        format.roll_pad_width,
    );
    let registration_code =
        compose_registration_code(&format.year_prefix, &format.school_code, &scoped_id);
    AllocationResult {
        global_id,
        scoped_id,
        registration_code,
    }
}
