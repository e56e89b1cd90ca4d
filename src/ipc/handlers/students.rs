use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, ToSql};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db(e: impl std::fmt::Display) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

const FORM_RANGE: std::ops::RangeInclusive<i64> = 1..=4;

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn parse_form(v: &serde_json::Value) -> Result<i64, HandlerErr> {
    let n = v
        .as_i64()
        .ok_or_else(|| HandlerErr::bad_params("form must be an integer"))?;
    if !FORM_RANGE.contains(&n) {
        return Err(HandlerErr::bad_params("form must be in 1..=4"));
    }
    Ok(n)
}

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "admissionNumber": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "form": r.get::<_, i64>(3)?,
        "stream": r.get::<_, String>(4)?,
        "photo": r.get::<_, Option<String>>(5)?,
        "isCleared": r.get::<_, i64>(6)? != 0,
    }))
}

const STUDENT_COLUMNS: &str =
    "id, admission_number, name, form, stream, photo, is_cleared";

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(v) = params.get("form") {
        clauses.push("form = ?");
        args.push(Box::new(parse_form(v)?));
    }
    if let Some(v) = params.get("stream") {
        let s = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("stream must be a string"))?;
        clauses.push("stream = ?");
        args.push(Box::new(s.to_string()));
    }

    let mut sql = format!("SELECT {} FROM students", STUDENT_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY admission_number");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            student_row_json,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "students": rows }))
}

fn students_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    let row = conn
        .query_row(&sql, [&student_id], student_row_json)
        .optional()
        .map_err(HandlerErr::db)?;
    match row {
        Some(v) => Ok(v),
        None => Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        }),
    }
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let admission_number = get_required_str(params, "admissionNumber")?
        .trim()
        .to_string();
    if admission_number.is_empty() {
        return Err(HandlerErr::bad_params("admissionNumber must not be empty"));
    }
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let form = parse_form(
        params
            .get("form")
            .ok_or_else(|| HandlerErr::bad_params("missing form"))?,
    )?;
    let stream = get_required_str(params, "stream")?.trim().to_string();
    if stream.is_empty() {
        return Err(HandlerErr::bad_params("stream must not be empty"));
    }
    // Upload handling lives in the shell; we only store the reference.
    let photo = params
        .get("photo")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE admission_number = ?",
            [&admission_number],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_some() {
        return Err(HandlerErr {
            code: "conflict",
            message: "student with this admission number already exists".to_string(),
            details: Some(json!({ "admissionNumber": admission_number })),
        });
    }

    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, admission_number, name, form, stream, photo,
                              is_cleared, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, ?, ?)",
        (
            &student_id,
            &admission_number,
            &name,
            form,
            &stream,
            &photo,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({
        "id": student_id,
        "admissionNumber": admission_number,
        "name": name,
        "form": form,
        "stream": stream,
        "photo": photo,
        "isCleared": false,
    }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let existing = conn
        .query_row(
            "SELECT admission_number, name, form, stream, photo
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((mut admission_number, mut name, mut form, mut stream, mut photo)) = existing
    else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    // PATCH merge: omitted fields keep their value. `isCleared` is never
    // accepted here; it is owned by the fee recompute path.
    if let Some(v) = params.get("admissionNumber") {
        let s = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("admissionNumber must be a string"))?
            .trim()
            .to_string();
        if s.is_empty() {
            return Err(HandlerErr::bad_params("admissionNumber must not be empty"));
        }
        if s != admission_number {
            let taken: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM students WHERE admission_number = ? AND id != ?",
                    (&s, &student_id),
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db)?;
            if taken.is_some() {
                return Err(HandlerErr {
                    code: "conflict",
                    message: "student with this admission number already exists".to_string(),
                    details: Some(json!({ "admissionNumber": s })),
                });
            }
        }
        admission_number = s;
    }
    if let Some(v) = params.get("name") {
        let s = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("name must be a string"))?
            .trim()
            .to_string();
        if s.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        name = s;
    }
    if let Some(v) = params.get("form") {
        form = parse_form(v)?;
    }
    if let Some(v) = params.get("stream") {
        let s = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("stream must be a string"))?
            .trim()
            .to_string();
        if s.is_empty() {
            return Err(HandlerErr::bad_params("stream must not be empty"));
        }
        stream = s;
    }
    if let Some(v) = params.get("photo") {
        photo = if v.is_null() {
            None
        } else {
            Some(
                v.as_str()
                    .ok_or_else(|| HandlerErr::bad_params("photo must be a string or null"))?
                    .to_string(),
            )
        };
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE students
         SET admission_number = ?, name = ?, form = ?, stream = ?, photo = ?, updated_at = ?
         WHERE id = ?",
        (
            &admission_number,
            &name,
            form,
            &stream,
            &photo,
            &now,
            &student_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    conn.query_row(&sql, [&student_id], student_row_json)
        .map_err(HandlerErr::db)
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    // Half-deleted students are not self-healing the way fee aggregates are,
    // so this one path runs inside a transaction, deleting in dependency
    // order (no ON DELETE CASCADE).
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    let steps: &[(&str, &str)] = &[
        (
            "DELETE FROM payments
             WHERE fee_record_id IN (SELECT id FROM fee_records WHERE student_id = ?)",
            "payments",
        ),
        ("DELETE FROM fee_records WHERE student_id = ?", "fee_records"),
        ("DELETE FROM students WHERE id = ?", "students"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }
    if let Err(e) = tx.commit() {
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        });
    }

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" | "students.get" | "students.create" | "students.update"
        | "students.delete" => {}
        _ => return None,
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "students.list" => students_list(conn, &req.params),
        "students.get" => students_get(conn, &req.params),
        "students.create" => students_create(conn, &req.params),
        "students.update" => students_update(conn, &req.params),
        "students.delete" => students_delete(conn, &req.params),
        _ => return None,
    };

    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
