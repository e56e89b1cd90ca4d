use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, ToSql};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }

    fn db(e: impl std::fmt::Display) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
        }
    }

    fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
        }
    }
}

/// Dashboard rollups for the shell's landing page. Read-only; the export
/// collaborator renders these rows, we never format spreadsheets here.
fn reports_dashboard(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let total_students: i64 = conn
        .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare("SELECT form, COUNT(*) FROM students GROUP BY form ORDER BY form")
        .map_err(HandlerErr::db)?;
    let per_form = stmt
        .query_map([], |r| {
            Ok(json!({ "form": r.get::<_, i64>(0)?, "count": r.get::<_, i64>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare("SELECT stream, COUNT(*) FROM students GROUP BY stream ORDER BY stream")
        .map_err(HandlerErr::db)?;
    let per_stream = stmt
        .query_map([], |r| {
            Ok(json!({ "stream": r.get::<_, String>(0)?, "count": r.get::<_, i64>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let (total_collected, total_balance): (f64, f64) = conn
        .query_row(
            "SELECT COALESCE(SUM(total_paid), 0), COALESCE(SUM(balance), 0) FROM fee_records",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db)?;

    let cleared: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE is_cleared != 0",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    let not_cleared = total_students - cleared;

    Ok(json!({
        "totalStudents": total_students,
        "studentsPerForm": per_form,
        "studentsPerStream": per_stream,
        "totalCollected": total_collected,
        "totalBalance": total_balance,
        "clearance": [
            { "name": "Cleared", "value": cleared },
            { "name": "Not Cleared", "value": not_cleared }
        ]
    }))
}

fn reports_student_rows(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    // Same filter posture as students.list: a malformed filter is rejected,
    // not silently dropped.
    if let Some(v) = params.get("form") {
        let form = v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("form must be an integer"))?;
        if !(1..=4).contains(&form) {
            return Err(HandlerErr::bad_params("form must be in 1..=4"));
        }
        clauses.push("form = ?");
        args.push(Box::new(form));
    }
    if let Some(v) = params.get("stream") {
        let stream = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("stream must be a string"))?;
        clauses.push("stream = ?");
        args.push(Box::new(stream.to_string()));
    }

    let mut sql = String::from(
        "SELECT admission_number, name, form, stream, is_cleared FROM students",
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY admission_number");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |r| {
                Ok(json!({
                    "admissionNumber": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "form": r.get::<_, i64>(2)?,
                    "stream": r.get::<_, String>(3)?,
                    "isCleared": r.get::<_, i64>(4)? != 0,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "rows": rows }))
}

fn reports_fee_rows(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.name, s.admission_number, f.total_paid, f.balance
             FROM fee_records f
             JOIN students s ON s.id = f.student_id
             ORDER BY s.admission_number",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "studentName": r.get::<_, String>(0)?,
                "admissionNumber": r.get::<_, String>(1)?,
                "totalPaid": r.get::<_, f64>(2)?,
                "balance": r.get::<_, f64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.dashboard" | "reports.studentRows" | "reports.feeRows" => {}
        _ => return None,
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "reports.dashboard" => reports_dashboard(conn),
        "reports.studentRows" => reports_student_rows(conn, &req.params),
        "reports.feeRows" => reports_fee_rows(conn),
        _ => return None,
    };

    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
