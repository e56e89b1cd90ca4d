use crate::fees;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub const DEFAULT_STREAMS: &[&str] = &["N", "E", "S", "W"];
pub const DEFAULT_FEE_PER_TERM: f64 = 15000.0;

#[derive(Debug, Clone)]
pub struct Settings {
    pub streams: Vec<String>,
    pub fee_per_term: f64,
    pub current_term: i64,
    pub current_year: i64,
    pub school_name: String,
    pub school_motto: String,
}

impl Settings {
    pub fn defaults() -> Self {
        Settings {
            streams: DEFAULT_STREAMS.iter().map(|s| s.to_string()).collect(),
            fee_per_term: DEFAULT_FEE_PER_TERM,
            current_term: 1,
            current_year: Utc::now().year() as i64,
            school_name: String::new(),
            school_motto: String::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "streams": self.streams,
            "feePerTerm": self.fee_per_term,
            "currentTerm": self.current_term,
            "currentYear": self.current_year,
            "annualFee": fees::annual_fee(self.fee_per_term),
            "schoolName": self.school_name,
            "schoolMotto": self.school_motto,
        })
    }
}

pub fn load(conn: &Connection) -> anyhow::Result<Option<Settings>> {
    let row = conn
        .query_row(
            "SELECT streams, fee_per_term, current_term, current_year,
                    school_name, school_motto
             FROM settings WHERE id = 1",
            [],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((streams_raw, fee_per_term, current_term, current_year, school_name, school_motto)) =
        row
    else {
        return Ok(None);
    };
    let streams: Vec<String> = serde_json::from_str(&streams_raw).unwrap_or_default();
    Ok(Some(Settings {
        streams,
        fee_per_term,
        current_term,
        current_year,
        school_name,
        school_motto,
    }))
}

/// Settings the fee handlers should compute against. Reading here does NOT
/// create the singleton; only `settings.get` does that.
pub fn effective(conn: &Connection) -> anyhow::Result<Settings> {
    Ok(load(conn)?.unwrap_or_else(Settings::defaults))
}

pub fn save(conn: &Connection, s: &Settings) -> anyhow::Result<()> {
    let streams_raw = serde_json::to_string(&s.streams)?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO settings(id, streams, fee_per_term, current_term, current_year,
                              school_name, school_motto, updated_at)
         VALUES(1, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           streams = excluded.streams,
           fee_per_term = excluded.fee_per_term,
           current_term = excluded.current_term,
           current_year = excluded.current_year,
           school_name = excluded.school_name,
           school_motto = excluded.school_motto,
           updated_at = excluded.updated_at",
        (
            &streams_raw,
            s.fee_per_term,
            s.current_term,
            s.current_year,
            &s.school_name,
            &s.school_motto,
            &now,
        ),
    )?;
    Ok(())
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let existing = match load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let settings = match existing {
        Some(s) => s,
        None => {
            // First read creates the singleton with documented defaults.
            let defaults = Settings::defaults();
            if let Err(e) = save(conn, &defaults) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            defaults
        }
    };
    ok(&req.id, settings.to_json())
}

fn merge_patch(current: &mut Settings, params: &serde_json::Value) -> Result<(), String> {
    if let Some(v) = params.get("streams") {
        let Some(arr) = v.as_array() else {
            return Err("streams must be an array of strings".to_string());
        };
        let mut streams = Vec::with_capacity(arr.len());
        for item in arr {
            let Some(s) = item.as_str() else {
                return Err("streams must be an array of strings".to_string());
            };
            let s = s.trim();
            if s.is_empty() {
                return Err("stream labels must not be empty".to_string());
            }
            streams.push(s.to_string());
        }
        current.streams = streams;
    }
    if let Some(v) = params.get("feePerTerm") {
        let Some(n) = v.as_f64() else {
            return Err("feePerTerm must be a number".to_string());
        };
        if n < 0.0 {
            return Err("feePerTerm must not be negative".to_string());
        }
        current.fee_per_term = n;
    }
    if let Some(v) = params.get("currentTerm") {
        let Some(n) = v.as_i64() else {
            return Err("currentTerm must be an integer".to_string());
        };
        if !(1..=fees::TERMS_PER_YEAR).contains(&n) {
            return Err(format!("currentTerm must be in 1..={}", fees::TERMS_PER_YEAR));
        }
        current.current_term = n;
    }
    if let Some(v) = params.get("currentYear") {
        let Some(n) = v.as_i64() else {
            return Err("currentYear must be an integer".to_string());
        };
        current.current_year = n;
    }
    if let Some(v) = params.get("schoolName") {
        let Some(s) = v.as_str() else {
            return Err("schoolName must be a string".to_string());
        };
        current.school_name = s.trim().to_string();
    }
    if let Some(v) = params.get("schoolMotto") {
        let Some(s) = v.as_str() else {
            return Err("schoolMotto must be a string".to_string());
        };
        current.school_motto = s.trim().to_string();
    }
    Ok(())
}

/// Recompute balance and clearance for EVERY ledger/student pair under the
/// new settings. Sequential, no pagination; recorded payments keep their
/// face value. A failure mid-loop leaves a mix of old and new balances that
/// the next successful recompute heals.
fn fan_out(conn: &Connection, settings: &Settings) -> anyhow::Result<usize> {
    let mut stmt =
        conn.prepare("SELECT id, student_id, total_paid FROM fee_records ORDER BY rowid")?;
    let records = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let now = Utc::now().to_rfc3339();
    for (record_id, student_id, total_paid) in &records {
        let new_balance = fees::balance(settings.fee_per_term, *total_paid);
        conn.execute(
            "UPDATE fee_records SET balance = ?, updated_at = ? WHERE id = ?",
            (new_balance, &now, record_id),
        )?;

        let cleared = fees::is_cleared(*total_paid, settings.fee_per_term, settings.current_term);
        conn.execute(
            "UPDATE students SET is_cleared = ?, updated_at = ? WHERE id = ?",
            (cleared as i64, &now, student_id),
        )?;
    }
    Ok(records.len())
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let existing = match load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(mut settings) = existing else {
        return err(&req.id, "not_found", "settings not found", None);
    };

    if let Err(msg) = merge_patch(&mut settings, &req.params) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = save(conn, &settings) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let recomputed = match fan_out(conn, &settings) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    let mut result = settings.to_json();
    result["recomputedLedgers"] = json!(recomputed);
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
