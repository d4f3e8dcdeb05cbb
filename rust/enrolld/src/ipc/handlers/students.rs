use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::register::{self, Registration};
use crate::store::SqliteRecordStore;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId");
    let mut stmt = conn.prepare(
        "SELECT s.id, s.class_id, c.name, s.student_id, s.roll_no, s.reg_code,
                s.full_name, s.guardian_name, s.phone, s.active, s.created_at
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE (?1 IS NULL OR s.class_id = ?1)
         ORDER BY c.name, s.roll_no",
    )?;
    let students = stmt
        .query_map([class_id.as_deref()], |r| {
            let id: String = r.get(0)?;
            let class_id: String = r.get(1)?;
            let class_name: String = r.get(2)?;
            let student_id: String = r.get(3)?;
            let roll_no: String = r.get(4)?;
            let reg_code: String = r.get(5)?;
            let full_name: String = r.get(6)?;
            let guardian_name: Option<String> = r.get(7)?;
            let phone: Option<String> = r.get(8)?;
            let active: i64 = r.get(9)?;
            let created_at: Option<String> = r.get(10)?;
            Ok(json!({
                "id": id,
                "classId": class_id,
                "className": class_name,
                "studentId": student_id,
                "rollNo": roll_no,
                "regCode": reg_code,
                "fullName": full_name,
                "guardianName": guardian_name,
                "phone": phone,
                "active": active != 0,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let reg = Registration {
        class_id: get_required_str(params, "classId")?,
        full_name: get_required_str(params, "fullName")?,
        guardian_name: get_optional_str(params, "guardianName"),
        phone: get_optional_str(params, "phone"),
        preferred_student_id: get_optional_str(params, "studentId"),
    };
    let format = config::load_id_format(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;

    let store = SqliteRecordStore::new(conn);
    let done = register::register_student(&store, &format, &reg)?;
    Ok(json!({
        "id": done.id,
        "studentId": done.ids.global_id,
        "rollNo": done.ids.scoped_id,
        "regCode": done.ids.registration_code,
        "retried": done.retried
    }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    let changed = conn
        .execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "students" }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    info!(id = %id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    match students_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
