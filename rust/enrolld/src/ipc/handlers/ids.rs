use crate::alloc;
use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::register;
use crate::store::{RecordStore, SqliteRecordStore};
use rusqlite::Connection;
use serde_json::json;

/// Called by the registration form whenever the class selector changes.
fn ids_preview(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId");
    let preferred = get_optional_str(params, "studentId");
    let format = config::load_id_format(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;

    let store = SqliteRecordStore::new(conn);
    let ids = register::preview(&store, &format, class_id.as_deref(), preferred.as_deref())?;
    Ok(json!({
        "studentId": ids.global_id,
        "rollNo": ids.scoped_id,
        "regCode": ids.registration_code
    }))
}

fn ids_exists(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let store = SqliteRecordStore::new(conn);
    let exists = store.record_exists(&student_id)?;
    Ok(json!({ "studentId": student_id, "exists": exists }))
}

fn handle_ids_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match ids_preview(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_ids_exists(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match ids_exists(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

// Needs no workspace.
fn handle_ids_parse_suffix(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let value = req.params.get("value").and_then(|v| v.as_str());
    let prefix = req.params.get("prefix").and_then(|v| v.as_str());
    ok(
        &req.id,
        json!({ "suffix": alloc::parse_suffix(value, prefix) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ids.preview" => Some(handle_ids_preview(state, req)),
        "ids.exists" => Some(handle_ids_exists(state, req)),
        "ids.parseSuffix" => Some(handle_ids_parse_suffix(state, req)),
        _ => None,
    }
}
