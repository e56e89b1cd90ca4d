use crate::fees;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::settings::{self, Settings};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, Utc};
use rusqlite::{Connection, OptionalExtension};
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

    fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
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

#[derive(Debug, Clone)]
struct Payment {
    id: String,
    amount: f64,
    term: i64,
    year: i64,
    paid_at: String,
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn find_fee_record(conn: &Connection, student_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM fee_records WHERE student_id = ?",
        [student_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::db)
}

/// Lazily create the ledger on first reference: no payments, zero paid,
/// balance at the full annual fee.
fn ensure_fee_record(
    conn: &Connection,
    student_id: &str,
    settings: &Settings,
) -> Result<String, HandlerErr> {
    if let Some(id) = find_fee_record(conn, student_id)? {
        return Ok(id);
    }
    let record_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO fee_records(id, student_id, total_paid, balance, updated_at)
         VALUES(?, ?, 0, ?, ?)",
        (
            &record_id,
            student_id,
            fees::annual_fee(settings.fee_per_term),
            &now,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "fee_records" })),
    })?;
    Ok(record_id)
}

fn list_payments(conn: &Connection, fee_record_id: &str) -> Result<Vec<Payment>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, amount, term, year, paid_at
             FROM payments
             WHERE fee_record_id = ?
             ORDER BY rowid",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([fee_record_id], |r| {
        Ok(Payment {
            id: r.get(0)?,
            amount: r.get(1)?,
            term: r.get(2)?,
            year: r.get(3)?,
            paid_at: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

/// The side-effect contract shared by every payment mutation: recompute
/// aggregates from the FULL payment sequence, persist the ledger, evaluate
/// clearance under current settings, persist the student flag. The steps are
/// deliberately not wrapped in a transaction; a partial failure is healed by
/// the next successful recompute.
fn recompute_and_persist(
    conn: &Connection,
    fee_record_id: &str,
    student_id: &str,
    settings: &Settings,
) -> Result<(fees::LedgerTotals, bool), HandlerErr> {
    let payments = list_payments(conn, fee_record_id)?;
    let totals = fees::recompute_totals(
        payments.iter().map(|p| p.amount),
        settings.fee_per_term,
    );
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE fee_records SET total_paid = ?, balance = ?, updated_at = ? WHERE id = ?",
        (totals.total_paid, totals.balance, &now, fee_record_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "fee_records" })),
    })?;

    let cleared = fees::is_cleared(
        totals.total_paid,
        settings.fee_per_term,
        settings.current_term,
    );
    conn.execute(
        "UPDATE students SET is_cleared = ?, updated_at = ? WHERE id = ?",
        (cleared as i64, &now, student_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok((totals, cleared))
}

fn ledger_json(
    conn: &Connection,
    fee_record_id: &str,
    student_id: &str,
    settings: &Settings,
) -> Result<serde_json::Value, HandlerErr> {
    let (total_paid, balance): (f64, f64) = conn
        .query_row(
            "SELECT total_paid, balance FROM fee_records WHERE id = ?",
            [fee_record_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db)?;
    let cleared: i64 = conn
        .query_row(
            "SELECT is_cleared FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    let payments = list_payments(conn, fee_record_id)?;
    let rows: Vec<serde_json::Value> = payments
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "amount": p.amount,
                "term": p.term,
                "year": p.year,
                "paidAt": p.paid_at,
            })
        })
        .collect();
    Ok(json!({
        "id": fee_record_id,
        "studentId": student_id,
        "totalPaid": total_paid,
        "balance": balance,
        "annualFee": fees::annual_fee(settings.fee_per_term),
        "isCleared": cleared != 0,
        "payments": rows,
    }))
}

fn parse_term(v: &serde_json::Value) -> Result<i64, HandlerErr> {
    let n = v
        .as_i64()
        .ok_or_else(|| HandlerErr::bad_params("term must be an integer"))?;
    if !(1..=fees::TERMS_PER_YEAR).contains(&n) {
        return Err(HandlerErr::bad_params(format!(
            "term must be in 1..={}",
            fees::TERMS_PER_YEAR
        )));
    }
    Ok(n)
}

fn fees_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT f.id, f.student_id, f.total_paid, f.balance,
                    s.admission_number, s.name, s.is_cleared
             FROM fee_records f
             JOIN students s ON s.id = f.student_id
             ORDER BY s.admission_number",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "totalPaid": r.get::<_, f64>(2)?,
                "balance": r.get::<_, f64>(3)?,
                "admissionNumber": r.get::<_, String>(4)?,
                "studentName": r.get::<_, String>(5)?,
                "isCleared": r.get::<_, i64>(6)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "fees": rows }))
}

fn fees_get_ledger(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let settings = settings::effective(conn).map_err(HandlerErr::db)?;
    let record_id = ensure_fee_record(conn, &student_id, &settings)?;
    ledger_json(conn, &record_id, &student_id, &settings)
}

fn fees_record_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let amount = params
        .get("amount")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("amount must be a number"))?;
    let term = parse_term(
        params
            .get("term")
            .ok_or_else(|| HandlerErr::bad_params("missing term"))?,
    )?;
    let year = match params.get("year") {
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("year must be an integer"))?,
        None => Utc::now().year() as i64,
    };

    let settings = settings::effective(conn).map_err(HandlerErr::db)?;
    let record_id = ensure_fee_record(conn, &student_id, &settings)?;

    let payment_id = Uuid::new_v4().to_string();
    let paid_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO payments(id, fee_record_id, amount, term, year, paid_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&payment_id, &record_id, amount, term, year, &paid_at),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;

    recompute_and_persist(conn, &record_id, &student_id, &settings)?;
    ledger_json(conn, &record_id, &student_id, &settings)
}

fn fees_update_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let payment_id = get_required_str(params, "paymentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let Some(record_id) = find_fee_record(conn, &student_id)? else {
        return Err(HandlerErr::not_found("fee record not found"));
    };

    let existing = conn
        .query_row(
            "SELECT amount, term, year FROM payments WHERE id = ? AND fee_record_id = ?",
            (&payment_id, &record_id),
            |r| {
                Ok((
                    r.get::<_, f64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((mut amount, mut term, mut year)) = existing else {
        return Err(HandlerErr::not_found("payment not found"));
    };

    // PATCH merge: fields left out of the request keep their stored value.
    if let Some(v) = params.get("amount") {
        amount = v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params("amount must be a number"))?;
    }
    if let Some(v) = params.get("term") {
        term = parse_term(v)?;
    }
    if let Some(v) = params.get("year") {
        year = v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("year must be an integer"))?;
    }

    conn.execute(
        "UPDATE payments SET amount = ?, term = ?, year = ? WHERE id = ?",
        (amount, term, year, &payment_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;

    let settings = settings::effective(conn).map_err(HandlerErr::db)?;
    recompute_and_persist(conn, &record_id, &student_id, &settings)?;
    ledger_json(conn, &record_id, &student_id, &settings)
}

fn fees_delete_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let payment_id = get_required_str(params, "paymentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let Some(record_id) = find_fee_record(conn, &student_id)? else {
        return Err(HandlerErr::not_found("fee record not found"));
    };

    // Deleting an id that is already gone is a no-op success: the caller
    // gets the recomputed remaining ledger either way.
    conn.execute(
        "DELETE FROM payments WHERE id = ? AND fee_record_id = ?",
        (&payment_id, &record_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_delete_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;

    let settings = settings::effective(conn).map_err(HandlerErr::db)?;
    recompute_and_persist(conn, &record_id, &student_id, &settings)?;
    ledger_json(conn, &record_id, &student_id, &settings)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" | "fees.getLedger" | "fees.recordPayment" | "fees.updatePayment"
        | "fees.deletePayment" => {}
        _ => return None,
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "fees.list" => fees_list(conn),
        "fees.getLedger" => fees_get_ledger(conn, &req.params),
        "fees.recordPayment" => fees_record_payment(conn, &req.params),
        "fees.updatePayment" => fees_update_payment(conn, &req.params),
        "fees.deletePayment" => fees_delete_payment(conn, &req.params),
        _ => return None,
    };

    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
