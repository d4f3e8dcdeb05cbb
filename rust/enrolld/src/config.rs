//! Process configuration (environment) and per-workspace identifier format
//! (settings table).

use crate::alloc::{IdFormat, MAX_PAD_WIDTH};
use crate::db;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::warn;

pub const ID_FORMAT_KEY: &str = "ids.format";

#[derive(Debug, Clone)]
pub struct Config {
    /// tracing filter directive (ENROLLD_LOG), e.g. "info" or "enrolld=debug".
    pub log_filter: String,

    /// Emit JSON log lines on stderr instead of the human format.
    pub log_json: bool,

    /// Workspace to open at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_filter = std::env::var("ENROLLD_LOG").unwrap_or_else(|_| "info".to_string());

        let log_json = match std::env::var("ENROLLD_LOG_FORMAT") {
            Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
                "json" => true,
                "" | "text" | "pretty" => false,
                other => anyhow::bail!("ENROLLD_LOG_FORMAT must be 'json' or 'text', got '{other}'"),
            },
            Err(_) => false,
        };

        let workspace = std::env::var("ENROLLD_WORKSPACE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            log_filter,
            log_json,
            workspace,
        })
    }
}

const PAD_WIDTHS: std::ops::RangeInclusive<usize> = 1..=MAX_PAD_WIDTH;

/// Stored format for this workspace, or defaults when none was saved yet.
/// Pad widths written before they were bounded are clamped on the way in.
pub fn load_id_format(conn: &Connection) -> Result<IdFormat> {
    let mut format: IdFormat = match db::settings_get_json(conn, ID_FORMAT_KEY)? {
        Some(v) => serde_json::from_value(v).context("invalid ids.format setting")?,
        None => return Ok(IdFormat::default()),
    };
    for (name, width) in [
        ("globalPadWidth", &mut format.global_pad_width),
        ("rollPadWidth", &mut format.roll_pad_width),
    ] {
        if !PAD_WIDTHS.contains(&*width) {
            let clamped = (*width).clamp(*PAD_WIDTHS.start(), *PAD_WIDTHS.end());
            warn!(setting = name, stored = *width, clamped, "pad width out of range");
            *width = clamped;
        }
    }
    Ok(format)
}

pub fn save_id_format(conn: &Connection, format: &IdFormat) -> Result<()> {
    db::settings_set_json(conn, ID_FORMAT_KEY, &serde_json::to_value(format)?)
}

/// Apply a camelCase partial update on top of `current`. Unknown keys are
/// ignored; known keys with the wrong type are rejected.
pub fn merge_id_format(current: &IdFormat, patch: &serde_json::Value) -> Result<IdFormat> {
    let mut merged = serde_json::to_value(current)?;
    let (Some(dst), Some(src)) = (merged.as_object_mut(), patch.as_object()) else {
        anyhow::bail!("ids.format patch must be an object");
    };
    for (k, v) in src {
        if dst.contains_key(k) {
            dst.insert(k.clone(), v.clone());
        }
    }
    let next: IdFormat =
        serde_json::from_value(merged).context("invalid value in ids.format patch")?;
    if next.year_prefix.chars().any(|c| !c.is_ascii_digit()) {
        anyhow::bail!("yearPrefix must contain digits only");
    }
    if next.school_code.trim().is_empty() {
        anyhow::bail!("schoolCode must not be empty");
    }
    for (name, width) in [
        ("globalPadWidth", next.global_pad_width),
        ("rollPadWidth", next.roll_pad_width),
    ] {
        if !PAD_WIDTHS.contains(&width) {
            anyhow::bail!("{name} must be between 1 and {MAX_PAD_WIDTH}, got {width}");
        }
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_defaults_then_saved_value() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init");
        let d = load_id_format(&conn).expect("load default");
        assert_eq!(d.global_prefix, "STD");
        assert_eq!(d.roll_pad_width, 4);

        let custom = IdFormat {
            school_code: "555".to_string(),
            ..d
        };
        save_id_format(&conn, &custom).expect("save");
        assert_eq!(load_id_format(&conn).expect("load"), custom);
    }

    #[test]
    fn merge_applies_known_keys_only() {
        let base = IdFormat {
            year_prefix: "26".to_string(),
            ..IdFormat::default()
        };
        let next = merge_id_format(
            &base,
            &json!({ "schoolCode": "900100", "rollPadWidth": 3, "color": "blue" }),
        )
        .expect("merge");
        assert_eq!(next.school_code, "900100");
        assert_eq!(next.roll_pad_width, 3);
        assert_eq!(next.global_prefix, "STD");
        assert_eq!(next.year_prefix, "26");
    }

    #[test]
    fn merge_rejects_bad_values() {
        let base = IdFormat::default();
        assert!(merge_id_format(&base, &json!({ "rollPadWidth": "four" })).is_err());
        assert!(merge_id_format(&base, &json!({ "yearPrefix": "2O" })).is_err());
        assert!(merge_id_format(&base, &json!({ "schoolCode": " " })).is_err());
        assert!(merge_id_format(&base, &json!([1, 2])).is_err());
        assert!(merge_id_format(&base, &json!({ "rollPadWidth": 70000 })).is_err());
        assert!(merge_id_format(&base, &json!({ "globalPadWidth": 0 })).is_err());
        assert!(merge_id_format(&base, &json!({ "globalPadWidth": 13 })).is_err());
        assert!(merge_id_format(&base, &json!({ "globalPadWidth": 12 })).is_ok());
    }

    #[test]
    fn load_clamps_stored_pad_widths() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init");
        let mut raw = serde_json::to_value(IdFormat::default()).expect("to json");
        raw["globalPadWidth"] = json!(70000);
        raw["rollPadWidth"] = json!(0);
        db::settings_set_json(&conn, ID_FORMAT_KEY, &raw).expect("store raw");

        let loaded = load_id_format(&conn).expect("load");
        assert_eq!(loaded.global_pad_width, MAX_PAD_WIDTH);
        assert_eq!(loaded.roll_pad_width, 1);
    }
}
