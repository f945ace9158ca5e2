//! fngate-api — HTTP surface of the call gate.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET/POST | `/call/{cookie}` | Dispatch a call to the function |
//! | POST | `/admin/pods` | Pod lifecycle event (`ready` / `gone`) |
//! | GET | `/admin/functions/{cookie}` | Runtime info of a cached function |
//! | DELETE | `/admin/functions/{cookie}` | Tear a function down |
//! | POST | `/admin/functions/{cookie}/grow` | Raise the scaling goal |
//! | POST | `/admin/functions/{cookie}/reload` | Re-read the function config |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fngate_balancer::Dispatcher;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the complete router (calls + admin + metrics).
pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = ApiState { dispatcher };

    let admin_routes = Router::new()
        .route("/pods", post(handlers::pod_event))
        .route(
            "/functions/{cookie}",
            get(handlers::function_info).delete(handlers::teardown),
        )
        .route("/functions/{cookie}/grow", post(handlers::grow))
        .route("/functions/{cookie}/reload", post(handlers::reload));

    Router::new()
        .route("/call/{cookie}", get(handlers::call).post(handlers::call))
        .nest("/admin", admin_routes)
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
