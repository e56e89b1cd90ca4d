use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

/// Methods that mutate shared records or wipe data. The role check runs
/// before any handler, mirroring route-level auth middleware; handlers never
/// re-check roles themselves.
const ADMIN_METHODS: &[&str] = &[
    "settings.update",
    "fees.updatePayment",
    "fees.deletePayment",
    "students.delete",
    "seed.demo",
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if ADMIN_METHODS.contains(&req.method.as_str()) && req.role.as_deref() != Some("Admin") {
        return err(
            &req.id,
            "forbidden",
            format!("{} requires the Admin role", req.method),
            None,
        );
    }

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::fees::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::settings::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup_exchange::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::seed::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
