//! REST API for the stowage service.
//!
//! Provides the HTTP endpoints the crew frontend calls. Uses Axum as the web
//! framework, allows cross-origin requests and documents itself through an
//! OpenAPI document served under `/docs`.

use std::convert::Infallible;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path as UrlPath, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::config::ApiConfig;
use crate::engine::{
    Engine, ImportSummary, OptimizeReport, PlaceRequest, RetrievalConfirmation, RetrievalTicket,
    SearchQuery, SearchResult, SimulationReport, SystemStatus, UndockingReport,
};
use crate::error::EngineError;
use crate::model::{
    ActionType, ActivityEntry, Container, Coordinates, Item, ItemStatus, PlacementAssignment,
    Position, RetrievalAction, RetrievalStep,
};
use crate::placement::{ContainerUtilization, UnplacedItem, UnplacedReason};
use crate::repository::LogFilter;
use crate::simulation::{
    DailyReport, DayEvent, DayStatus, ItemUsage, SimulationChanges, SimulationRequest,
    SimulationStatus,
};
use crate::waste::{
    ReturnItem, ReturnManifest, ReturnMove, ReturnPlan, ReturnPlanRequest, WasteItem, WasteReason,
};

/// Actor recorded when a request names none.
const DEFAULT_ACTOR: &str = "system";

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<Engine>,
}

impl ApiState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>stowage API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                window.ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                });
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

fn actor_or_default(user_id: Option<String>) -> String {
    user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_string())
}

// ----- request types -----

/// Actor of a request without a body.
#[derive(Deserialize, Default, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ActorParams {
    pub user_id: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    pub item_id: Option<String>,
    pub item_name: Option<String>,
    pub user_id: Option<String>,
}

/// Reads an RFC 3339 timestamp; one without an offset is taken as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| de::Error::custom(format!("invalid timestamp '{raw}'")))
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({ "itemId": "001", "userId": "crew-1", "timestamp": "2025-04-01T08:00:00Z" }))]
pub struct RetrieveRequest {
    pub item_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRetrievalRequest {
    pub item_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Blockers that leave the container together with the target
    #[serde(default)]
    pub set_aside: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceItemRequest {
    pub item_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    pub container_id: String,
    pub position: Position,
}

/// Items and containers for a planning run that is not committed.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfRequest {
    pub items: Vec<Item>,
    pub containers: Vec<Container>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUndockingRequest {
    pub undocking_container_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct LogParams {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub item_id: Option<String>,
    pub user_id: Option<String>,
    pub action_type: Option<ActionType>,
}

impl From<LogParams> for LogFilter {
    fn from(params: LogParams) -> Self {
        LogFilter {
            start: params.start_date,
            end: params.end_date,
            item_id: params.item_id,
            user_id: params.user_id,
            action_type: params.action_type,
        }
    }
}

// ----- response types -----

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainersCheckResponse {
    pub containers_exist: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemsCheckResponse {
    pub items_exist: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: SearchResult,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveResponse {
    pub success: bool,
    #[serde(flatten)]
    pub confirmation: RetrievalConfirmation,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRetrievalResponse {
    pub success: bool,
    #[serde(flatten)]
    pub ticket: RetrievalTicket,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceResponse {
    pub success: bool,
    pub item: Item,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfResponse {
    pub success: bool,
    pub placements: Vec<PlacementAssignment>,
    pub unplaced_items: Vec<UnplacedItem>,
    pub space_utilization: Vec<ContainerUtilization>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WasteResponse {
    pub success: bool,
    pub waste_items: Vec<WasteItem>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPlanResponse {
    pub success: bool,
    #[serde(flatten)]
    pub plan: ReturnPlan,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UndockingResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: UndockingReport,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: SimulationReport,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: ImportSummary,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub logs: Vec<ActivityEntry>,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn engine_error(err: EngineError) -> Response {
    let (status, label) = match &err {
        EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not found"),
        EngineError::PlacementRejected(_) => (StatusCode::CONFLICT, "Placement rejected"),
        EngineError::ConcurrentModification { .. } => {
            (StatusCode::CONFLICT, "Concurrent modification")
        }
        EngineError::InconsistentSnapshot(_) => (StatusCode::CONFLICT, "Inconsistent container state"),
        EngineError::InvalidGeometry(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid geometry"),
        EngineError::UnreachableItem { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "Item unreachable"),
        EngineError::InvalidRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid input data"),
        EngineError::Import(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Import failed"),
        EngineError::Integrity(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Integrity violation"),
    };
    if err.is_fatal() {
        error!(error = %err, "Request failed on a repository integrity violation");
    } else {
        warn!(error = %err, status = status.as_u16(), "Request failed");
    }
    error_response(status, label, err.to_string())
}

fn respond<T: Serialize>(result: Result<T, EngineError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => engine_error(err),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_containers_check,
        handle_items_check,
        handle_optimize,
        handle_optimize_stream,
        handle_what_if,
        handle_container,
        handle_container_items,
        handle_search,
        handle_retrieve,
        handle_initiate_retrieval,
        handle_place,
        handle_identify_waste,
        handle_return_plan,
        handle_complete_undocking,
        handle_simulate_day,
        handle_simulation_status,
        handle_import_containers,
        handle_import_items,
        handle_export_arrangement,
        handle_logs,
        handle_system_status
    ),
    components(
        schemas(
            ActionType,
            ActivityEntry,
            CompleteUndockingRequest,
            Container,
            ContainerUtilization,
            ContainersCheckResponse,
            Coordinates,
            DailyReport,
            DayEvent,
            DayStatus,
            ErrorResponse,
            ImportResponse,
            ImportSummary,
            InitiateRetrievalRequest,
            InitiateRetrievalResponse,
            Item,
            ItemStatus,
            ItemUsage,
            ItemsCheckResponse,
            LogsResponse,
            OptimizeReport,
            PlaceItemRequest,
            PlaceResponse,
            PlacementAssignment,
            Position,
            RetrievalAction,
            RetrievalStep,
            RetrieveRequest,
            RetrieveResponse,
            ReturnItem,
            ReturnManifest,
            ReturnMove,
            ReturnPlanRequest,
            ReturnPlanResponse,
            SearchResponse,
            SimulationChanges,
            SimulationRequest,
            SimulationResponse,
            SimulationStatus,
            SystemStatus,
            UndockingResponse,
            UnplacedItem,
            UnplacedReason,
            WasteItem,
            WasteReason,
            WasteResponse,
            WhatIfRequest,
            WhatIfResponse
        )
    ),
    tags(
        (name = "placement", description = "Placement planning and explicit placement"),
        (name = "retrieval", description = "Search and retrieval planning"),
        (name = "waste", description = "Waste management and undocking"),
        (name = "simulation", description = "Time simulation"),
        (name = "admin", description = "Import, export, logs and status")
    )
)]
struct ApiDoc;

/// Builds the application router.
///
/// `static_dir`, when given, is served under `/static`.
pub fn router(state: ApiState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/api/containers/check", get(handle_containers_check))
        .route("/api/items/check", get(handle_items_check))
        .route("/api/containers/{id}", get(handle_container))
        .route("/api/containers/{id}/items", get(handle_container_items))
        .route("/api/placement", post(handle_what_if))
        .route("/api/placement/optimize", post(handle_optimize))
        .route("/api/placement/optimize/stream", post(handle_optimize_stream))
        .route("/api/search", get(handle_search))
        .route("/api/retrieve", post(handle_retrieve))
        .route("/api/retrieval/initiate", post(handle_initiate_retrieval))
        .route("/api/retrieval/confirm", post(handle_retrieve))
        .route("/api/place", post(handle_place))
        .route("/api/waste/identify", get(handle_identify_waste))
        .route("/api/waste/return-plan", post(handle_return_plan))
        .route("/api/waste/complete-undocking", post(handle_complete_undocking))
        .route("/api/simulate/day", post(handle_simulate_day))
        .route("/api/simulation/status", get(handle_simulation_status))
        .route("/api/import/containers", post(handle_import_containers))
        .route("/api/import/items", post(handle_import_items))
        .route("/api/export/arrangement", get(handle_export_arrangement))
        .route("/api/logs", get(handle_logs))
        .route("/api/system/status", get(handle_system_status))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui));

    if let Some(dir) = static_dir {
        app = app.nest_service("/static", ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Binds the configured address and serves until the server terminates.
pub async fn start_api_server(config: ApiConfig, engine: Arc<Engine>) -> std::io::Result<()> {
    let app = router(ApiState::new(engine), config.static_dir().map(|dir| dir.as_path()));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        "Server running on http://{}:{}",
        config.display_host(),
        config.port()
    );
    if config.binds_to_all_interfaces() {
        info!("Local access: http://localhost:{}", config.port());
    }
    info!("Documentation: http://{}:{}/docs", config.display_host(), config.port());

    axum::serve(listener, app).await
}

/// Handler for GET /api/containers/check
#[utoipa::path(
    get,
    path = "/api/containers/check",
    responses((status = 200, body = ContainersCheckResponse)),
    tag = "admin"
)]
async fn handle_containers_check(State(state): State<ApiState>) -> Response {
    respond(
        state
            .engine
            .containers_exist()
            .await
            .map(|containers_exist| ContainersCheckResponse { containers_exist }),
    )
}

/// Handler for GET /api/items/check
#[utoipa::path(
    get,
    path = "/api/items/check",
    responses((status = 200, body = ItemsCheckResponse)),
    tag = "admin"
)]
async fn handle_items_check(State(state): State<ApiState>) -> Response {
    respond(
        state
            .engine
            .items_exist()
            .await
            .map(|items_exist| ItemsCheckResponse { items_exist }),
    )
}

/// Handler for POST /api/placement/optimize
///
/// Places every pending item and commits the resulting plan.
#[utoipa::path(
    post,
    path = "/api/placement/optimize",
    params(ActorParams),
    responses(
        (status = 200, description = "Plan committed", body = OptimizeReport),
        (status = CONFLICT, description = "Concurrent modification", body = ErrorResponse)
    ),
    tag = "placement"
)]
async fn handle_optimize(
    State(state): State<ApiState>,
    Query(params): Query<ActorParams>,
) -> Response {
    let actor = actor_or_default(params.user_id);
    respond(state.engine.optimize_placement(&actor, Utc::now()).await)
}

/// Handler for POST /api/placement/optimize/stream (SSE).
///
/// Streams the placement events of the committed run, followed by a final
/// `Committed` or `Error` message.
#[utoipa::path(
    post,
    path = "/api/placement/optimize/stream",
    params(ActorParams),
    responses((
        status = 200,
        description = "Streams placement events",
        content_type = "text/event-stream",
        body = String
    )),
    tag = "placement"
)]
async fn handle_optimize_stream(
    State(state): State<ApiState>,
    Query(params): Query<ActorParams>,
) -> Response {
    let actor = actor_or_default(params.user_id);
    let (tx, rx) = mpsc::channel::<String>(32);

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let mut events = Vec::new();
        let result = engine
            .optimize_placement_with_progress(&actor, Utc::now(), |event| events.push(event.clone()))
            .await;

        for event in &events {
            let Ok(message) = serde_json::to_string(event) else {
                continue;
            };
            if tx.send(message).await.is_err() {
                // Receiver has closed the stream; remaining events are discarded.
                return;
            }
        }
        let summary = match result {
            Ok(report) => json!({ "type": "Committed", "report": report }),
            Err(err) => json!({ "type": "Error", "error": err.to_string() }),
        };
        let _ = tx.send(summary.to_string()).await;
    });

    let stream = ReceiverStream::new(rx).map(|msg| Ok::<_, Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for POST /api/placement
///
/// Plans the given items into the given, empty containers without storing
/// anything.
#[utoipa::path(
    post,
    path = "/api/placement",
    request_body = WhatIfRequest,
    responses(
        (status = 200, body = WhatIfResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "placement"
)]
async fn handle_what_if(
    State(state): State<ApiState>,
    payload: Result<Json<WhatIfRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    info!(
        items = request.items.len(),
        containers = request.containers.len(),
        "What-if placement request"
    );
    respond(
        state
            .engine
            .plan_what_if(&request.items, &request.containers)
            .map(|outcome| WhatIfResponse {
                success: true,
                placements: outcome.plan.assignments,
                unplaced_items: outcome.unplaced,
                space_utilization: outcome.utilization,
            }),
    )
}

/// Handler for GET /api/containers/{id}
#[utoipa::path(
    get,
    path = "/api/containers/{id}",
    params(("id" = String, Path, description = "Container id")),
    responses(
        (status = 200, body = Container),
        (status = NOT_FOUND, body = ErrorResponse)
    ),
    tag = "admin"
)]
async fn handle_container(State(state): State<ApiState>, UrlPath(id): UrlPath<String>) -> Response {
    respond(state.engine.container(&id).await)
}

/// Handler for GET /api/containers/{id}/items
#[utoipa::path(
    get,
    path = "/api/containers/{id}/items",
    params(("id" = String, Path, description = "Container id")),
    responses(
        (status = 200, body = [Item]),
        (status = NOT_FOUND, body = ErrorResponse)
    ),
    tag = "admin"
)]
async fn handle_container_items(
    State(state): State<ApiState>,
    UrlPath(id): UrlPath<String>,
) -> Response {
    respond(state.engine.container_items(&id).await)
}

/// Handler for GET /api/search
#[utoipa::path(
    get,
    path = "/api/search",
    params(SearchParams),
    responses(
        (status = 200, body = SearchResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Neither itemId nor itemName given", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
async fn handle_search(State(state): State<ApiState>, Query(params): Query<SearchParams>) -> Response {
    let query = SearchQuery {
        item_id: params.item_id.filter(|id| !id.is_empty()),
        item_name: params.item_name.filter(|name| !name.is_empty()),
    };
    let actor = actor_or_default(params.user_id);
    respond(
        state
            .engine
            .search(&query, &actor, Utc::now())
            .await
            .map(|result| SearchResponse {
                success: true,
                result,
            }),
    )
}

/// Handler for POST /api/retrieve and POST /api/retrieval/confirm
///
/// Confirms the retrieval of an item: the target leaves its container and
/// one of its uses is consumed.
#[utoipa::path(
    post,
    path = "/api/retrieve",
    request_body = RetrieveRequest,
    responses(
        (status = 200, body = RetrieveResponse),
        (status = NOT_FOUND, body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Item not stowed or unreachable", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
async fn handle_retrieve(
    State(state): State<ApiState>,
    payload: Result<Json<RetrieveRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    let actor = actor_or_default(request.user_id);
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);
    respond(
        state
            .engine
            .confirm_retrieval(&request.item_id, &actor, timestamp)
            .await
            .map(|confirmation| RetrieveResponse {
                success: true,
                confirmation,
            }),
    )
}

/// Handler for POST /api/retrieval/initiate
#[utoipa::path(
    post,
    path = "/api/retrieval/initiate",
    request_body = InitiateRetrievalRequest,
    responses(
        (status = 200, body = InitiateRetrievalResponse),
        (status = NOT_FOUND, body = ErrorResponse)
    ),
    tag = "retrieval"
)]
async fn handle_initiate_retrieval(
    State(state): State<ApiState>,
    payload: Result<Json<InitiateRetrievalRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    let actor = actor_or_default(request.user_id);
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);
    respond(
        state
            .engine
            .retrieve(&request.item_id, &request.set_aside, &actor, timestamp)
            .await
            .map(|ticket| InitiateRetrievalResponse {
                success: true,
                ticket,
            }),
    )
}

/// Handler for POST /api/place
#[utoipa::path(
    post,
    path = "/api/place",
    request_body = PlaceItemRequest,
    responses(
        (status = 200, body = PlaceResponse),
        (status = NOT_FOUND, body = ErrorResponse),
        (status = CONFLICT, description = "Target slot occupied or outside the container", body = ErrorResponse)
    ),
    tag = "placement"
)]
async fn handle_place(
    State(state): State<ApiState>,
    payload: Result<Json<PlaceItemRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    let actor = actor_or_default(request.user_id);
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);
    let place = PlaceRequest {
        item_id: request.item_id,
        container_id: request.container_id,
        position: request.position,
    };
    respond(
        state
            .engine
            .place(&place, &actor, timestamp)
            .await
            .map(|item| PlaceResponse {
                success: true,
                item,
            }),
    )
}

/// Handler for GET /api/waste/identify
#[utoipa::path(
    get,
    path = "/api/waste/identify",
    params(ActorParams),
    responses((status = 200, body = WasteResponse)),
    tag = "waste"
)]
async fn handle_identify_waste(
    State(state): State<ApiState>,
    Query(params): Query<ActorParams>,
) -> Response {
    let actor = actor_or_default(params.user_id);
    respond(
        state
            .engine
            .identify_waste(&actor, Utc::now())
            .await
            .map(|waste_items| WasteResponse {
                success: true,
                waste_items,
            }),
    )
}

/// Handler for POST /api/waste/return-plan
#[utoipa::path(
    post,
    path = "/api/waste/return-plan",
    request_body = ReturnPlanRequest,
    responses(
        (status = 200, body = ReturnPlanResponse),
        (status = NOT_FOUND, body = ErrorResponse)
    ),
    tag = "waste"
)]
async fn handle_return_plan(
    State(state): State<ApiState>,
    payload: Result<Json<ReturnPlanRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    respond(
        state
            .engine
            .return_plan(&request, Utc::now())
            .await
            .map(|plan| ReturnPlanResponse {
                success: true,
                plan,
            }),
    )
}

/// Handler for POST /api/waste/complete-undocking
#[utoipa::path(
    post,
    path = "/api/waste/complete-undocking",
    request_body = CompleteUndockingRequest,
    responses(
        (status = 200, body = UndockingResponse),
        (status = NOT_FOUND, body = ErrorResponse)
    ),
    tag = "waste"
)]
async fn handle_complete_undocking(
    State(state): State<ApiState>,
    payload: Result<Json<CompleteUndockingRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    let actor = actor_or_default(request.user_id);
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);
    respond(
        state
            .engine
            .complete_undocking(&request.undocking_container_id, &actor, timestamp)
            .await
            .map(|report| UndockingResponse {
                success: true,
                report,
            }),
    )
}

/// Handler for POST /api/simulate/day
#[utoipa::path(
    post,
    path = "/api/simulate/day",
    request_body = SimulationRequest,
    responses(
        (status = 200, body = SimulationResponse),
        (status = UNPROCESSABLE_ENTITY, description = "No future point to simulate to", body = ErrorResponse)
    ),
    tag = "simulation"
)]
async fn handle_simulate_day(
    State(state): State<ApiState>,
    payload: Result<Json<SimulationRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    respond(
        state
            .engine
            .simulate(&request, Utc::now())
            .await
            .map(|report| SimulationResponse {
                success: true,
                report,
            }),
    )
}

/// Handler for GET /api/simulation/status
#[utoipa::path(
    get,
    path = "/api/simulation/status",
    responses((status = 200, body = SimulationStatus)),
    tag = "simulation"
)]
async fn handle_simulation_status(State(state): State<ApiState>) -> Response {
    respond(state.engine.simulation_status(Utc::now()).await)
}

/// Handler for POST /api/import/containers
#[utoipa::path(
    post,
    path = "/api/import/containers",
    request_body(content = String, content_type = "text/csv"),
    responses(
        (status = 200, body = ImportResponse),
        (status = UNPROCESSABLE_ENTITY, body = ErrorResponse)
    ),
    tag = "admin"
)]
async fn handle_import_containers(State(state): State<ApiState>, body: String) -> Response {
    respond(
        state
            .engine
            .import_containers_csv(&body)
            .await
            .map(|summary| ImportResponse {
                success: true,
                summary,
            }),
    )
}

/// Handler for POST /api/import/items
#[utoipa::path(
    post,
    path = "/api/import/items",
    request_body(content = String, content_type = "text/csv"),
    responses(
        (status = 200, body = ImportResponse),
        (status = UNPROCESSABLE_ENTITY, body = ErrorResponse)
    ),
    tag = "admin"
)]
async fn handle_import_items(State(state): State<ApiState>, body: String) -> Response {
    respond(
        state
            .engine
            .import_items_csv(&body)
            .await
            .map(|summary| ImportResponse {
                success: true,
                summary,
            }),
    )
}

/// Handler for GET /api/export/arrangement
#[utoipa::path(
    get,
    path = "/api/export/arrangement",
    responses((status = 200, content_type = "text/csv", body = String)),
    tag = "admin"
)]
async fn handle_export_arrangement(State(state): State<ApiState>) -> Response {
    match state.engine.export_arrangement().await {
        Ok(csv) => (
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"arrangement.csv\"",
                ),
            ],
            csv,
        )
            .into_response(),
        Err(err) => engine_error(err),
    }
}

/// Handler for GET /api/logs
#[utoipa::path(
    get,
    path = "/api/logs",
    params(LogParams),
    responses((status = 200, body = LogsResponse)),
    tag = "admin"
)]
async fn handle_logs(State(state): State<ApiState>, Query(params): Query<LogParams>) -> Response {
    let filter = LogFilter::from(params);
    respond(state.engine.logs(&filter).await.map(|logs| LogsResponse { logs }))
}

/// Handler for GET /api/system/status
#[utoipa::path(
    get,
    path = "/api/system/status",
    responses((status = 200, body = SystemStatus)),
    tag = "admin"
)]
async fn handle_system_status(State(state): State<ApiState>) -> Response {
    respond(state.engine.system_status().await)
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
