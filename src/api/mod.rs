//! HTTP surface. Every route except the liveness probe sits behind the
//! bearer token check.

pub mod database;
pub mod deploy;
pub mod status;

use axum::{Router, routing};

use crate::SharedState;

pub use database::wipe_database;
pub use deploy::deploy;
pub use status::{root, status};

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/status", routing::get(status))
        .route("/deploy", routing::post(deploy))
        .route("/database", routing::delete(wipe_database))
        .with_state(state)
}
