use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{checkin, feeds, handlers, middleware as mw, pipelines, semaphore};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Operator routes (authenticated)
    let operator_routes = Router::new()
        .route("/config", get(handlers::get_config))
        .route(
            "/pipelines",
            get(pipelines::list_pipelines).put(pipelines::upsert_pipeline),
        )
        .route(
            "/pipelines/{id}",
            get(pipelines::get_pipeline).delete(pipelines::delete_pipeline),
        )
        .route("/pipelines/{id}/info", get(pipelines::pipeline_info))
        .route("/pipelines/{id}/load", post(pipelines::perform_load))
        .route(
            "/pipelines/{id}/offline/{ticket_id}",
            delete(pipelines::delete_offline_checkin),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            mw::auth_middleware,
        ));

    // Public routes (requests carry signed credentials)
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/feeds/{feed_id}", post(feeds::poll_feed))
        .route("/checkin", post(checkin::check_in))
        .route("/offline/checkin", post(checkin::upload_offline_checkins))
        .route("/offline/tickets", post(checkin::offline_tickets))
        .route(
            "/semaphore/{pipeline_id}/{group_id}",
            get(semaphore::latest_group),
        )
        .route(
            "/semaphore/{pipeline_id}/{group_id}/root",
            get(semaphore::latest_root),
        )
        .route(
            "/semaphore/{pipeline_id}/{group_id}/{root}",
            get(semaphore::group_by_root),
        );

    Router::new()
        .nest("/api/v1", operator_routes.merge(public_routes))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(mw::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
