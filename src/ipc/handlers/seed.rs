use crate::ipc::error::{err, ok};
use crate::ipc::handlers::settings::{self, Settings};
use crate::ipc::types::{AppState, Request};
use crate::seed;
use serde_json::json;

fn handle_seed_demo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let per_stream = match req.params.get("perStream") {
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => n as usize,
            _ => return err(&req.id, "bad_params", "perStream must be a positive integer", None),
        },
        None => 20,
    };

    // Seeding resets settings to defaults along with the data.
    let defaults = Settings::defaults();
    if let Err(e) = settings::save(conn, &defaults) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match seed::seed_students(
        conn,
        &defaults.streams,
        defaults.fee_per_term,
        defaults.current_term,
        per_stream,
    ) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "students": summary.students,
                "payments": summary.payments,
            }),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "seed.demo" => Some(handle_seed_demo(state, req)),
        _ => None,
    }
}
