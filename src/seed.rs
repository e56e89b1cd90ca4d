use chrono::{Datelike, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::fees;

const FIRST_NAMES: &[&str] = &[
    "John", "Jane", "Michael", "Sarah", "David", "Laura", "Robert", "Emily", "James", "Jessica",
    "William", "Elizabeth", "Joseph", "Mary", "Charles", "Patricia", "Daniel", "Jennifer",
    "Matthew", "Linda",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin",
];
const FORMS: &[i64] = &[1, 2, 3, 4];

#[derive(Debug, Clone, Copy)]
pub struct SeedSummary {
    pub students: usize,
    pub payments: usize,
}

/// Populate a workspace with demo students and ledgers. Deterministic, no
/// randomness: every third student has paid in full to date, every third has
/// paid half, the rest have paid nothing. Clearance is always derived through
/// the evaluator, never assigned directly.
pub fn seed_students(
    conn: &Connection,
    streams: &[String],
    fee_per_term: f64,
    current_term: i64,
    per_stream: usize,
) -> anyhow::Result<SeedSummary> {
    conn.execute("DELETE FROM payments", [])?;
    conn.execute("DELETE FROM fee_records", [])?;
    conn.execute("DELETE FROM students", [])?;

    let now = Utc::now().to_rfc3339();
    let year = Utc::now().year() as i64;
    let required_to_date = current_term as f64 * fee_per_term;

    let mut students = 0usize;
    let mut payments = 0usize;
    let mut counter = 0usize;

    for &form in FORMS {
        for stream in streams {
            for _ in 0..per_stream {
                counter += 1;
                let admission_number = format!("S{:04}", counter);
                let name = format!(
                    "{} {}",
                    FIRST_NAMES[counter % FIRST_NAMES.len()],
                    LAST_NAMES[(counter / FIRST_NAMES.len()) % LAST_NAMES.len()]
                );

                let paid = match counter % 3 {
                    0 => required_to_date,
                    1 => required_to_date / 2.0,
                    _ => 0.0,
                };

                let student_id = Uuid::new_v4().to_string();
                let cleared = fees::is_cleared(paid, fee_per_term, current_term);
                conn.execute(
                    "INSERT INTO students(id, admission_number, name, form, stream, photo,
                                          is_cleared, created_at, updated_at)
                     VALUES(?, ?, ?, ?, ?, NULL, ?, ?, ?)",
                    (
                        &student_id,
                        &admission_number,
                        &name,
                        form,
                        stream,
                        cleared as i64,
                        &now,
                        &now,
                    ),
                )?;
                students += 1;

                let record_id = Uuid::new_v4().to_string();
                let totals = fees::recompute_totals(
                    if paid > 0.0 { vec![paid] } else { vec![] },
                    fee_per_term,
                );
                conn.execute(
                    "INSERT INTO fee_records(id, student_id, total_paid, balance, updated_at)
                     VALUES(?, ?, ?, ?, ?)",
                    (&record_id, &student_id, totals.total_paid, totals.balance, &now),
                )?;

                if paid > 0.0 {
                    conn.execute(
                        "INSERT INTO payments(id, fee_record_id, amount, term, year, paid_at)
                         VALUES(?, ?, ?, 1, ?, ?)",
                        (&Uuid::new_v4().to_string(), &record_id, paid, year, &now),
                    )?;
                    payments += 1;
                }
            }
        }
    }

    Ok(SeedSummary { students, payments })
}
