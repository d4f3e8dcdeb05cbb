//! Record Query Interface over the workspace database.
//!
//! The allocator only ever sees [`IdentifierRecord`] projections; the
//! student row layout stays behind this module.

use crate::alloc::IdentifierRecord;
use rusqlite::{ffi, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer already holds this identifier.
    #[error("identifier already taken: {constraint}")]
    Conflict { constraint: String },

    #[error("record store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
}

#[cfg(test)]
impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub roll_no: String,
    pub reg_code: String,
    pub full_name: String,
    pub guardian_name: Option<String>,
    pub phone: Option<String>,
}

pub trait RecordStore {
    /// Full scan of every student, projected for allocation.
    fn list_all_records(&self) -> Result<Vec<IdentifierRecord>, StoreError>;

    fn record_exists(&self, global_id: &str) -> Result<bool, StoreError>;

    /// Class name for a class id; the name is the roll-number scope.
    fn class_name(&self, class_id: &str) -> Result<Option<String>, StoreError>;

    /// Create-if-absent. A taken student id or roll number comes back as
    /// [`StoreError::Conflict`].
    fn insert_student(&self, student: &NewStudent) -> Result<(), StoreError>;
}

pub struct SqliteRecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn list_all_records(&self) -> Result<Vec<IdentifierRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.student_id, s.roll_no, c.name
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(IdentifierRecord {
                    global_id: r.get(0)?,
                    scoped_id: r.get(1)?,
                    scope_key: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn record_exists(&self, global_id: &str) -> Result<bool, StoreError> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM students WHERE student_id = ?",
                [global_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn class_name(&self, class_id: &str) -> Result<Option<String>, StoreError> {
        let name = self
            .conn
            .query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(name)
    }

    fn insert_student(&self, student: &NewStudent) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO students(
                   id,
                   class_id,
                   student_id,
                   roll_no,
                   reg_code,
                   full_name,
                   guardian_name,
                   phone,
                   active,
                   created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
                (
                    &student.id,
                    &student.class_id,
                    &student.student_id,
                    &student.roll_no,
                    &student.reg_code,
                    &student.full_name,
                    student.guardian_name.as_deref(),
                    student.phone.as_deref(),
                ),
            )
            .map_err(classify_write_error)?;
        Ok(())
    }
}

/// UNIQUE / PRIMARY KEY violations are write-time conflicts; anything else
/// (including foreign key failures) is the store failing.
fn classify_write_error(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, msg) = &e {
        let unique = inner.code == ErrorCode::ConstraintViolation
            && (inner.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || inner.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY);
        if unique {
            return StoreError::Conflict {
                constraint: msg.clone().unwrap_or_else(|| inner.to_string()),
            };
        }
    }
    StoreError::Unavailable(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init schema");
        conn.execute(
            "INSERT INTO classes(id, name) VALUES('c9', 'Class-9'), ('c10', 'Class-10')",
            [],
        )
        .expect("seed classes");
        conn
    }

    fn student(id: &str, class_id: &str, student_id: &str, roll_no: &str) -> NewStudent {
        NewStudent {
            id: id.to_string(),
            class_id: class_id.to_string(),
            student_id: student_id.to_string(),
            roll_no: roll_no.to_string(),
            reg_code: format!("26102330{roll_no}"),
            full_name: "Test Student".to_string(),
            guardian_name: None,
            phone: None,
        }
    }

    #[test]
    fn list_projects_class_name_as_scope() {
        let conn = open();
        let store = SqliteRecordStore::new(&conn);
        store
            .insert_student(&student("a", "c9", "STD001", "0001"))
            .expect("insert");
        let records = store.list_all_records().expect("list");
        assert_eq!(
            records,
            vec![IdentifierRecord {
                global_id: Some("STD001".to_string()),
                scoped_id: Some("0001".to_string()),
                scope_key: Some("Class-9".to_string()),
            }]
        );
        assert!(store.record_exists("STD001").expect("exists"));
        assert!(!store.record_exists("STD002").expect("exists"));
        assert_eq!(
            store.class_name("c10").expect("class"),
            Some("Class-10".to_string())
        );
        assert_eq!(store.class_name("nope").expect("class"), None);
    }

    #[test]
    fn duplicate_student_id_is_a_conflict() {
        let conn = open();
        let store = SqliteRecordStore::new(&conn);
        store
            .insert_student(&student("a", "c9", "STD001", "0001"))
            .expect("insert");
        let e = store
            .insert_student(&student("b", "c10", "STD001", "0001"))
            .expect_err("duplicate global id");
        assert!(e.is_conflict(), "{e}");
    }

    #[test]
    fn duplicate_roll_only_conflicts_within_class() {
        let conn = open();
        let store = SqliteRecordStore::new(&conn);
        store
            .insert_student(&student("a", "c9", "STD001", "0001"))
            .expect("insert");
        store
            .insert_student(&student("b", "c10", "STD002", "0001"))
            .expect("same roll in another class");
        let e = store
            .insert_student(&student("c", "c9", "STD003", "0001"))
            .expect_err("same roll in same class");
        assert!(e.is_conflict(), "{e}");
    }

    #[test]
    fn missing_class_is_not_a_conflict() {
        let conn = open();
        let store = SqliteRecordStore::new(&conn);
        let e = store
            .insert_student(&student("a", "ghost", "STD001", "0001"))
            .expect_err("foreign key");
        assert!(!e.is_conflict(), "{e}");
    }
}
