use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::generator::{GenerationError, InferenceContext, ModelHandle};
use crate::health::collector::{apply_overrides, HealthOverrides};
use crate::health::normalize::normalize_health;
use crate::health::HealthVector;
use crate::plan::{MealSlot, PlanEditError, PlanMeal, PlanRecord, PlanStatus, ReviewAction};
use crate::rules::RuleOutcome;
use crate::store::{PlanStore, PlanSummary};

#[derive(Clone)]
struct ApiState {
    config: Arc<Config>,
    handle: Arc<ModelHandle>,
    db_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(error: GenerationError) -> Self {
        let status = match error {
            GenerationError::InsufficientSafeFoods { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<PlanEditError> for ApiError {
    fn from(error: PlanEditError) -> Self {
        let status = match error {
            PlanEditError::NotPending { .. } | PlanEditError::NotApproved(_) => StatusCode::CONFLICT,
            PlanEditError::UnknownFood(_) | PlanEditError::DayOutOfRange { .. } => {
                StatusCode::BAD_REQUEST
            }
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Clone, Default, Deserialize)]
struct HealthRequest {
    #[serde(default)]
    health: Option<HealthVector>,
    #[serde(default)]
    overrides: HealthOverrides,
}

impl HealthRequest {
    fn into_vector(self) -> HealthVector {
        let mut vector = self.health.unwrap_or_default();
        apply_overrides(&mut vector, &self.overrides);
        normalize_health(&mut vector);
        vector
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateRequest {
    patient_id: String,
    #[serde(flatten)]
    profile: HealthRequest,
    seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReviewRequest {
    action: String,
    reviewer: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RetrainingFlagRequest {
    approved: bool,
    notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EditMealRequest {
    day: usize,
    slot: String,
    food: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    checkpoint: Option<String>,
    catalog_foods: usize,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    plan_id: i64,
    record: PlanRecord,
}

#[derive(Debug, Serialize)]
struct EditMealResponse {
    meal: PlanMeal,
    status: PlanStatus,
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    checkpoint: Option<String>,
    vocab_size: usize,
    catalog_foods: usize,
}

fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/v1/config", get(show_config))
        .route("/v1/rules/evaluate", post(evaluate_rules))
        .route("/v1/plans", get(list_plans))
        .route("/v1/plans/generate", post(generate))
        .route("/v1/plans/:id", get(show_plan))
        .route("/v1/plans/:id/review", post(review))
        .route("/v1/plans/:id/retraining", post(flag_retraining))
        .route("/v1/plans/:id/meals", patch(edit_meal))
        .route("/v1/model/reload", post(reload_model))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: Config, handle: Arc<ModelHandle>, bind: SocketAddr) -> Result<()> {
    let state = ApiState {
        db_path: config.resolved_db_path(),
        config: Arc::new(config),
        handle,
    };
    // fail at startup rather than on the first request
    PlanStore::open(&state.db_path)?;

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<ApiState>) -> Json<ApiResponse<HealthResponse>> {
    let context = state.handle.current();
    ok(HealthResponse {
        status: "ok",
        checkpoint: context.checkpoint_name.clone(),
        catalog_foods: context.catalog.len(),
    })
}

async fn show_config(State(state): State<ApiState>) -> Json<ApiResponse<Config>> {
    ok(state.config.as_ref().clone())
}

async fn evaluate_rules(
    State(state): State<ApiState>,
    Json(request): Json<HealthRequest>,
) -> ApiResult<RuleOutcome> {
    let health = request.into_vector();
    Ok(ok(state.handle.current().evaluate(&health)))
}

async fn generate(
    State(state): State<ApiState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<GenerateResponse> {
    if request.patient_id.trim().is_empty() {
        return Err(ApiError::bad_request("patient_id is required"));
    }
    let context = state.handle.current();
    let health = request.profile.into_vector();
    let patient_id = request.patient_id.clone();
    let seed = request.seed;
    let mut record = tokio::task::spawn_blocking(move || {
        let generated = context.generate(&health, seed)?;
        Ok::<_, GenerationError>(context.new_record(&patient_id, health, generated))
    })
    .await
    .map_err(ApiError::internal)??;

    let store = open_store(&state)?;
    let plan_id = store.insert_plan(&mut record).map_err(ApiError::internal)?;
    info!("stored plan {plan_id} for {}", record.patient_id);
    Ok(ok(GenerateResponse { plan_id, record }))
}

async fn list_plans(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<PlanSummary>> {
    let status = query
        .status
        .as_deref()
        .map(PlanStatus::from_str)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let store = open_store(&state)?;
    let plans = store
        .list_plans(status, query.limit.unwrap_or(50).max(1))
        .map_err(ApiError::internal)?;
    Ok(ok(plans))
}

async fn show_plan(
    State(state): State<ApiState>,
    UrlPath(id): UrlPath<i64>,
) -> ApiResult<PlanRecord> {
    let store = open_store(&state)?;
    Ok(ok(load_plan(&store, id)?))
}

async fn review(
    State(state): State<ApiState>,
    UrlPath(id): UrlPath<i64>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<PlanRecord> {
    let action =
        ReviewAction::from_str(&request.action).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let store = open_store(&state)?;
    let mut record = load_plan(&store, id)?;
    record.review(action, request.reviewer, request.comment)?;
    store.update_plan(&record).map_err(ApiError::internal)?;
    info!("plan {id} marked {}", record.status);
    Ok(ok(record))
}

async fn flag_retraining(
    State(state): State<ApiState>,
    UrlPath(id): UrlPath<i64>,
    Json(request): Json<RetrainingFlagRequest>,
) -> ApiResult<PlanRecord> {
    let store = open_store(&state)?;
    let mut record = load_plan(&store, id)?;
    record.flag_for_retraining(request.approved, request.notes)?;
    store.update_plan(&record).map_err(ApiError::internal)?;
    Ok(ok(record))
}

async fn edit_meal(
    State(state): State<ApiState>,
    UrlPath(id): UrlPath<i64>,
    Json(request): Json<EditMealRequest>,
) -> ApiResult<EditMealResponse> {
    let slot =
        MealSlot::from_str(&request.slot).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let context = state.handle.current();
    let store = open_store(&state)?;
    let mut record = load_plan(&store, id)?;
    let meal = record
        .edit_meal(
            request.day,
            slot,
            &request.food,
            &context.catalog,
            Some(&context.vocab),
        )?
        .clone();
    store.update_plan(&record).map_err(ApiError::internal)?;
    Ok(ok(EditMealResponse {
        meal,
        status: record.status,
    }))
}

async fn reload_model(State(state): State<ApiState>) -> ApiResult<ReloadResponse> {
    let config = Arc::clone(&state.config);
    let handle = Arc::clone(&state.handle);
    let reloaded = tokio::task::spawn_blocking(move || {
        handle.reload(|| InferenceContext::load(&config))
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(|e| {
        warn!("model reload failed, keeping the current checkpoint: {e}");
        ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: e.to_string(),
        }
    })?;
    Ok(ok(ReloadResponse {
        checkpoint: reloaded.checkpoint_name.clone(),
        vocab_size: reloaded.vocab.len(),
        catalog_foods: reloaded.catalog.len(),
    }))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

fn open_store(state: &ApiState) -> std::result::Result<PlanStore, ApiError> {
    PlanStore::open(&state.db_path).map_err(ApiError::internal)
}

fn load_plan(store: &PlanStore, id: i64) -> std::result::Result<PlanRecord, ApiError> {
    store
        .get_plan(id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("plan {id} not found")))
}
