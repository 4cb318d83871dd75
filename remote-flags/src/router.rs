use std::{future::ready, sync::Arc};

use axum::{
    http::StatusCode,
    routing::{delete, get, patch, post},
    Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::{
    api::{admin, evaluation},
    config::Config,
    metrics_utils::{setup_metrics_recorder, track_metrics},
    projects::project_operations::PropagationManager,
    store::Store,
};

#[derive(Clone)]
pub struct State {
    pub store: Arc<dyn Store + Send + Sync>,
    pub propagation: PropagationManager,
    pub default_page_size: u32,
}

pub fn router(store: Arc<dyn Store + Send + Sync>, config: &Config) -> Router {
    let state = State {
        propagation: PropagationManager::new(store.clone()),
        store: store.clone(),
        default_page_size: config.default_page_size,
    };

    // liveness/readiness checks
    let status_router = Router::new()
        .route("/", get(index))
        .route("/health_check", get(|| ready("Healthy")))
        .route("/_readiness", get(move || readiness(store.clone())));

    let admin_router = Router::new()
        .route(
            "/admin/projects",
            get(admin::list_projects).post(admin::create_project),
        )
        .route(
            "/admin/projects/:project_name",
            get(admin::get_project)
                .post(admin::create_environment)
                .delete(admin::delete_project),
        )
        .route("/admin/projects/:project_name/flags", post(admin::add_flag))
        .route(
            "/admin/projects/:project_name/flags/:flag_name",
            patch(admin::patch_flag).delete(admin::remove_flag),
        )
        .route(
            "/admin/projects/:project_name/flags/:flag_name/resync",
            post(admin::resync_flag),
        )
        .route(
            "/admin/:environment_id",
            get(admin::get_environment)
                .patch(admin::rename_environment)
                .delete(admin::delete_environment),
        )
        .route(
            "/admin/:environment_id/flags/:flag_name",
            patch(admin::patch_environment_flag).delete(admin::remove_environment_flag),
        )
        .route(
            "/admin/:environment_id/server_side_key",
            post(admin::create_server_side_key),
        )
        .route(
            "/admin/:environment_id/client_side_key",
            post(admin::create_client_side_key),
        )
        .route(
            "/admin/:environment_id/server_side_key/:key",
            delete(admin::delete_server_side_key),
        )
        .route(
            "/admin/:environment_id/client_side_key/:key",
            delete(admin::delete_client_side_key),
        );

    let evaluation_router = Router::new()
        .route(
            "/:environment_id/get_rules",
            get(evaluation::get_rules).post(evaluation::evaluate_get_rules_flag),
        )
        .route("/:environment_id", post(evaluation::evaluate_flags))
        .route("/:environment_id/:flag_name", post(evaluation::evaluate_flag));

    let router = Router::new()
        .merge(status_router)
        .merge(admin_router)
        .merge(evaluation_router)
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Global metrics recorders can play poorly with e.g. tests
    if *config.enable_metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}

pub async fn readiness(
    store: Arc<dyn Store + Send + Sync>,
) -> Result<&'static str, (StatusCode, String)> {
    store.ping().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("store unavailable: {e}"),
        )
    })?;
    Ok("ready")
}

pub async fn index() -> &'static str {
    "remote flags"
}
