use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use shopstream_aggregates::{resolve_limit, RecommendationStore, StatisticsStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::AuthenticatedUser;
use crate::catalog::{CatalogError, NewProduct, NewUser, ProductPatch, UserPatch};
use crate::state::{AnalyticsState, ProductsState, RecommendationsState, UsersState};
use crate::telemetry;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Merge role routers into one app with health, metrics, tracing, and CORS.
///
/// `/metrics` is served only when a recorder handle is given.
pub fn build_router(roles: Vec<Router>, metrics: Option<PrometheusHandle>) -> Router {
    let mut app = roles
        .into_iter()
        .fold(Router::new(), |app, role| app.merge(role));

    if let Some(handle) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(render_metrics))
                .with_state(handle),
        );
    }

    app.route("/health", get(health))
        .layer(middleware::from_fn(telemetry::track_http))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        match &self {
            CatalogError::Invalid(msg) => error_response(StatusCode::BAD_REQUEST, *msg),
            CatalogError::NotFound(_) => error_response(StatusCode::NOT_FOUND, self.to_string()),
            CatalogError::Publish(e) => {
                warn!(error = %e, "Publish failed");
                error_response(StatusCode::BAD_GATEWAY, e.to_string())
            }
        }
    }
}

// --- Products ---

pub fn products_routes(state: ProductsState) -> Router {
    Router::new()
        .route("/products", post(create_product))
        .route(
            "/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .with_state(state)
}

async fn create_product(
    State(state): State<ProductsState>,
    Json(input): Json<NewProduct>,
) -> Result<impl IntoResponse, CatalogError> {
    let product = state.catalog.create(input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn get_product(State(state): State<ProductsState>, Path(id): Path<String>) -> Response {
    match state.catalog.get(&id).await {
        Some(product) => Json(product).into_response(),
        None => CatalogError::NotFound("Product").into_response(),
    }
}

async fn update_product(
    State(state): State<ProductsState>,
    Path(id): Path<String>,
    Json(patch): Json<ProductPatch>,
) -> Result<impl IntoResponse, CatalogError> {
    let product = state.catalog.update(&id, patch).await?;
    Ok(Json(product))
}

async fn delete_product(
    State(state): State<ProductsState>,
    Path(id): Path<String>,
) -> Result<StatusCode, CatalogError> {
    state.catalog.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Users ---

pub fn users_routes(state: UsersState) -> Router {
    Router::new()
        .route("/users", post(register_user))
        .route("/users/{id}", get(get_user).put(update_user))
        .with_state(state)
}

async fn register_user(
    State(state): State<UsersState>,
    Json(input): Json<NewUser>,
) -> Result<Response, CatalogError> {
    let user = state.directory.register(input).await?;

    match state.jwt.create_token(&user.id) {
        Ok(token) => Ok((
            StatusCode::CREATED,
            Json(json!({ "user_id": user.id, "token": token })),
        )
            .into_response()),
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to issue token");
            Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate token",
            ))
        }
    }
}

async fn get_user(
    auth: AuthenticatedUser,
    State(state): State<UsersState>,
    Path(id): Path<String>,
) -> Response {
    if let Err(denied) = auth.require(&id) {
        return denied;
    }
    match state.directory.get(&id).await {
        Some(user) => Json(user).into_response(),
        None => CatalogError::NotFound("User").into_response(),
    }
}

async fn update_user(
    auth: AuthenticatedUser,
    State(state): State<UsersState>,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> Result<Response, CatalogError> {
    if let Err(denied) = auth.require(&id) {
        return Ok(denied);
    }
    let user = state.directory.update(&id, patch).await?;
    Ok(Json(user).into_response())
}

// --- Recommendations ---

#[derive(Deserialize)]
pub struct RecommendationsQuery {
    limit: Option<String>,
}

pub fn recommendations_routes(state: RecommendationsState) -> Router {
    Router::new()
        .route("/recommendations", get(list_recommendations))
        .route("/recommendations/{id}", get(get_recommendation))
        .with_state(state)
}

async fn list_recommendations(
    State(state): State<RecommendationsState>,
    Query(params): Query<RecommendationsQuery>,
) -> Response {
    let limit = resolve_limit(params.limit.as_deref());

    match state.reader.read(limit).await {
        Ok(result) => {
            let cache = if result.cached { "hit" } else { "miss" };
            (
                [(header::CONTENT_TYPE, "application/json"), (X_CACHE, cache)],
                result.body,
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, limit, "Failed to fetch recommendations");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch recommendations",
            )
        }
    }
}

async fn get_recommendation(
    State(state): State<RecommendationsState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.recommendation(&id).await {
        Ok(Some(row)) => Json(row).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Recommendation not found"),
        Err(e) => {
            warn!(error = %e, id = %id, "Failed to load recommendation");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- Analytics ---

pub fn analytics_routes(state: AnalyticsState) -> Router {
    Router::new()
        .route("/stats/products/{id}", get(product_stats))
        .route("/stats/users/{id}", get(user_stats))
        .with_state(state)
}

async fn product_stats(State(state): State<AnalyticsState>, Path(id): Path<String>) -> Response {
    match state.store.product_statistics(&id).await {
        Ok(Some(stats)) => Json(stats).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No statistics for product"),
        Err(e) => {
            warn!(error = %e, product_id = %id, "Failed to load product statistics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn user_stats(State(state): State<AnalyticsState>, Path(id): Path<String>) -> Response {
    match state.store.user_statistics(&id).await {
        Ok(Some(stats)) => Json(stats).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No statistics for user"),
        Err(e) => {
            warn!(error = %e, user_id = %id, "Failed to load user statistics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
