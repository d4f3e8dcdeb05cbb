//! Student registration: snapshot, allocate, conditional write, and a single
//! retry when a concurrent writer took the identifier first.

use crate::alloc::{self, AllocationRequest, AllocationResult, IdFormat};
use crate::store::{NewStudent, RecordStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub class_id: String,
    pub full_name: String,
    pub guardian_name: Option<String>,
    pub phone: Option<String>,
    pub preferred_student_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub id: String,
    pub ids: AllocationResult,
    pub retried: bool,
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("class not found: {0}")]
    ClassNotFound(String),

    #[error("identifier still taken after retry: {constraint}")]
    ConflictAfterRetry { constraint: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identifiers the next registration into `class_id` would receive, without
/// writing anything.
pub fn preview<S: RecordStore>(
    store: &S,
    format: &IdFormat,
    class_id: Option<&str>,
    preferred_student_id: Option<&str>,
) -> Result<AllocationResult, RegisterError> {
    let scope_key = match class_id {
        Some(cid) => Some(
            store
                .class_name(cid)?
                .ok_or_else(|| RegisterError::ClassNotFound(cid.to_string()))?,
        ),
        None => None,
    };
    let records = store.list_all_records()?;
    let request = AllocationRequest {
        scope_key,
        preferred_global_id: preferred_student_id.map(str::to_string),
    };
    Ok(alloc::allocate(&records, &request, format))
}

pub fn register_student<S: RecordStore>(
    store: &S,
    format: &IdFormat,
    reg: &Registration,
) -> Result<Registered, RegisterError> {
    let class_name = store
        .class_name(&reg.class_id)?
        .ok_or_else(|| RegisterError::ClassNotFound(reg.class_id.clone()))?;

    match attempt(store, format, reg, &class_name) {
        Ok(done) => Ok(done),
        Err(StoreError::Conflict { constraint }) => {
            warn!(
                class_id = %reg.class_id,
                %constraint,
                "identifier taken at write time; regenerating"
            );
            // Fresh snapshot: the preferred id falls back on its own if it
            // was the one taken.
            match attempt(store, format, reg, &class_name) {
                Ok(done) => Ok(Registered {
                    retried: true,
                    ..done
                }),
                Err(StoreError::Conflict { constraint }) => {
                    Err(RegisterError::ConflictAfterRetry { constraint })
                }
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn attempt<S: RecordStore>(
    store: &S,
    format: &IdFormat,
    reg: &Registration,
    class_name: &str,
) -> Result<Registered, StoreError> {
    let records = store.list_all_records()?;
    let request = AllocationRequest {
        scope_key: Some(class_name.to_string()),
        preferred_global_id: reg.preferred_student_id.clone(),
    };
    let ids = alloc::allocate(&records, &request, format);
    debug!(
        snapshot = records.len(),
        student_id = %ids.global_id,
        roll_no = %ids.scoped_id,
        "allocated candidate identifiers"
    );

    let student = NewStudent {
        id: Uuid::new_v4().to_string(),
        class_id: reg.class_id.clone(),
        student_id: ids.global_id.clone(),
        roll_no: ids.scoped_id.clone(),
        reg_code: ids.registration_code.clone(),
        full_name: reg.full_name.clone(),
        guardian_name: reg.guardian_name.clone(),
        phone: reg.phone.clone(),
    };
    store.insert_student(&student)?;
    info!(
        student_id = %ids.global_id,
        roll_no = %ids.scoped_id,
        class = class_name,
        "registered student"
    );

    Ok(Registered {
        id: student.id,
        ids,
        retried: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::IdentifierRecord;
    use crate::db;
    use crate::store::SqliteRecordStore;
    use rusqlite::Connection;
    use std::cell::{Cell, RefCell};

    fn fixed_format() -> IdFormat {
        IdFormat {
            year_prefix: "26".to_string(),
            ..IdFormat::default()
        }
    }

    fn reg(class_id: &str, name: &str) -> Registration {
        Registration {
            class_id: class_id.to_string(),
            full_name: name.to_string(),
            ..Default::default()
        }
    }

    /// Simulates another admin's sidecar: each of the first `steal` inserts
    /// is rejected because a concurrent writer saves the same identifiers
    /// just before us.
    struct RacingStore {
        records: RefCell<Vec<IdentifierRecord>>,
        steal: Cell<usize>,
        inserts: Cell<usize>,
        locked: bool,
    }

    impl RacingStore {
        fn new(steal: usize) -> Self {
            Self {
                records: RefCell::new(Vec::new()),
                steal: Cell::new(steal),
                inserts: Cell::new(0),
                locked: false,
            }
        }

        /// Every insert fails as if another process held the write lock.
        fn locked() -> Self {
            Self {
                locked: true,
                ..Self::new(0)
            }
        }
    }

    impl RecordStore for RacingStore {
        fn list_all_records(&self) -> Result<Vec<IdentifierRecord>, StoreError> {
            Ok(self.records.borrow().clone())
        }

        fn record_exists(&self, global_id: &str) -> Result<bool, StoreError> {
            Ok(self
                .records
                .borrow()
                .iter()
                .any(|r| r.global_id.as_deref() == Some(global_id)))
        }

        fn class_name(&self, class_id: &str) -> Result<Option<String>, StoreError> {
            Ok((class_id == "c9").then(|| "Class-9".to_string()))
        }

        fn insert_student(&self, student: &NewStudent) -> Result<(), StoreError> {
            self.inserts.set(self.inserts.get() + 1);
            if self.locked {
                return Err(StoreError::Unavailable(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    Some("database is locked".to_string()),
                )));
            }
            let rec = IdentifierRecord {
                global_id: Some(student.student_id.clone()),
                scoped_id: Some(student.roll_no.clone()),
                scope_key: Some("Class-9".to_string()),
            };
            if self.steal.get() > 0 {
                self.steal.set(self.steal.get() - 1);
                self.records.borrow_mut().push(rec);
                return Err(StoreError::Conflict {
                    constraint: "UNIQUE constraint failed: students.student_id".to_string(),
                });
            }
            self.records.borrow_mut().push(rec);
            Ok(())
        }
    }

    #[test]
    fn retries_once_after_write_time_conflict() {
        let store = RacingStore::new(1);
        let done = register_student(&store, &fixed_format(), &reg("c9", "Rahim")).expect("register");
        assert!(done.retried);
        assert_eq!(done.ids.global_id, "STD002");
        assert_eq!(done.ids.scoped_id, "0002");
        assert_eq!(done.ids.registration_code, "261023300002");
        assert_eq!(store.inserts.get(), 2);
    }

    #[test]
    fn second_conflict_is_surfaced() {
        let store = RacingStore::new(2);
        let e = register_student(&store, &fixed_format(), &reg("c9", "Karim")).expect_err("conflict");
        assert!(matches!(e, RegisterError::ConflictAfterRetry { .. }), "{e}");
        assert_eq!(store.inserts.get(), 2);
    }

    #[test]
    fn unavailable_store_fails_without_retry() {
        let store = RacingStore::locked();
        let e = register_student(&store, &fixed_format(), &reg("c9", "Jamal")).expect_err("locked");
        assert!(
            matches!(e, RegisterError::Store(StoreError::Unavailable(_))),
            "{e}"
        );
        assert_eq!(store.inserts.get(), 1);
        assert!(store.records.borrow().is_empty());
    }

    #[test]
    fn unknown_class_is_rejected_before_any_write() {
        let store = RacingStore::new(0);
        let e = register_student(&store, &fixed_format(), &reg("c404", "Nadia")).expect_err("class");
        assert!(matches!(e, RegisterError::ClassNotFound(_)), "{e}");
        assert_eq!(store.inserts.get(), 0);
    }

    #[test]
    fn sqlite_registrations_number_globally_and_per_class() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init");
        conn.execute(
            "INSERT INTO classes(id, name) VALUES('c9', 'Class-9'), ('c10', 'Class-10')",
            [],
        )
        .expect("seed");
        let store = SqliteRecordStore::new(&conn);
        let f = fixed_format();

        let a = register_student(&store, &f, &reg("c9", "A")).expect("a");
        let b = register_student(&store, &f, &reg("c10", "B")).expect("b");
        let c = register_student(&store, &f, &reg("c9", "C")).expect("c");

        assert_eq!(
            [&a.ids.global_id, &b.ids.global_id, &c.ids.global_id],
            ["STD001", "STD002", "STD003"]
        );
        assert_eq!(
            [&a.ids.scoped_id, &b.ids.scoped_id, &c.ids.scoped_id],
            ["0001", "0001", "0002"]
        );
        assert!(!a.retried && !b.retried && !c.retried);
    }

    #[test]
    fn preferred_id_is_honoured_then_falls_back() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init");
        conn.execute("INSERT INTO classes(id, name) VALUES('c9', 'Class-9')", [])
            .expect("seed");
        let store = SqliteRecordStore::new(&conn);
        let f = fixed_format();

        let mut r = reg("c9", "A");
        r.preferred_student_id = Some("STD050".to_string());
        let first = register_student(&store, &f, &r).expect("first");
        assert_eq!(first.ids.global_id, "STD050");

        let second = register_student(&store, &f, &r).expect("second");
        assert_eq!(second.ids.global_id, "STD051");
        assert!(!second.retried);
    }

    #[test]
    fn preview_does_not_write() {
        let store = RacingStore::new(0);
        let f = fixed_format();
        let p1 = preview(&store, &f, Some("c9"), None).expect("preview");
        let p2 = preview(&store, &f, Some("c9"), None).expect("preview");
        assert_eq!(p1, p2);
        assert_eq!(p1.global_id, "STD001");
        assert_eq!(store.inserts.get(), 0);
        assert!(!store.record_exists("STD001").expect("exists"));
    }
}
