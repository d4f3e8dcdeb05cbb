use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn settings_ids_get(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let format = config::load_id_format(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    serde_json::to_value(format).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn settings_ids_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let current = config::load_id_format(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    let next = config::merge_id_format(&current, params)
        .map_err(|e| HandlerErr::new("bad_params", format!("{e:#}")))?;
    config::save_id_format(conn, &next).map_err(|e| {
        HandlerErr::new("db_update_failed", format!("{e:#}"))
            .with_details(json!({ "table": "settings" }))
    })?;
    info!(
        prefix = %next.global_prefix,
        school_code = %next.school_code,
        year_prefix = %next.year_prefix,
        "identifier format updated"
    );
    serde_json::to_value(next).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_settings_ids_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match settings_ids_get(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_settings_ids_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match settings_ids_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.ids.get" => Some(handle_settings_ids_get(state, req)),
        "settings.ids.update" => Some(handle_settings_ids_update(state, req)),
        _ => None,
    }
}
