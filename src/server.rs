//! HTTP and WebSocket surface over a shared [`Dashboard`].

use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
#[cfg(feature = "auth")]
use axum::routing::post;
use axum::routing::{delete, get};
use axum::{Extension, Json, Router};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

#[cfg(feature = "auth")]
use crate::auth::{self, bearer_token, Session, SessionStore};
use crate::dashboard::Dashboard;
use crate::db::{get_connection, init_db};
use crate::error::DashError;
use crate::export;
use crate::models::{AdjustmentUpdate, ExpenseEntry, NewExpense, Snapshot};
use crate::settings::{shellexpand_path, Settings};
use crate::watcher::{FolderWatcher, WatchHandle};

pub const SYSTEM_USER: &str = "system";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    /// Present only when authentication is switched on.
    #[cfg(feature = "auth")]
    pub sessions: Option<Arc<SessionStore>>,
}

#[cfg(not(feature = "auth"))]
fn warn_auth_unavailable(settings: &Settings) {
    if settings.auth_enabled {
        warn!("auth_enabled is set but this build has no auth support, serving without login");
    }
}

impl AppState {
    pub fn new(dashboard: Arc<Dashboard>, settings: &Settings) -> Self {
        #[cfg(not(feature = "auth"))]
        warn_auth_unavailable(settings);
        Self {
            dashboard,
            #[cfg(feature = "auth")]
            sessions: settings.auth_enabled.then(|| {
                Arc::new(SessionStore::new(chrono::Duration::hours(settings.session_ttl_hours)))
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

impl From<DashError> for AppError {
    fn from(e: DashError) -> Self {
        let status = match &e {
            DashError::UnknownCompany(_) => StatusCode::NOT_FOUND,
            DashError::InvalidInput(_) | DashError::UserExists(_) => StatusCode::BAD_REQUEST,
            DashError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %e, "request failed");
        }
        AppError(status, e.to_string())
    }
}

fn bad_request(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::BAD_REQUEST, msg.into())
}

fn unauthorized() -> AppError {
    AppError(StatusCode::UNAUTHORIZED, "authentication required".to_string())
}

// ---------------------------------------------------------------------------
// Request shapes
// ---------------------------------------------------------------------------

/// Form fields arrive either as JSON numbers or as numeric text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    fn value(&self, field: &str) -> Result<f64, AppError> {
        match self {
            Amount::Number(n) => Ok(*n),
            Amount::Text(s) if s.trim().is_empty() => Ok(0.0),
            Amount::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| bad_request(format!("{field} must be a number, got '{s}'"))),
        }
    }
}

/// Zero or blank means "not overridden".
fn override_value(amount: Option<&Amount>, field: &str) -> Result<Option<f64>, AppError> {
    match amount {
        None => Ok(None),
        Some(a) => {
            let v = a.value(field)?;
            Ok((v != 0.0).then_some(v))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExpenseRequest {
    company_code: String,
    company_name: Option<String>,
    amount: Option<Amount>,
    description: Option<String>,
    expense_date: Option<String>,
    category: Option<String>,
    notes: Option<String>,
}

impl ExpenseRequest {
    fn into_new_expense(self) -> Result<NewExpense, AppError> {
        let amount = match &self.amount {
            Some(a) => a.value("amount")?,
            None => 0.0,
        };
        Ok(NewExpense {
            company_code: self.company_code,
            company_name: self.company_name.unwrap_or_default(),
            amount,
            description: self.description.unwrap_or_default(),
            expense_date: self.expense_date,
            category: self.category.unwrap_or_default(),
            notes: self.notes.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdjustmentRequest {
    company_code: String,
    company_name: Option<String>,
    contract_value: Option<Amount>,
    spent_value: Option<Amount>,
    reason: Option<String>,
}

impl AdjustmentRequest {
    fn into_update(self) -> Result<AdjustmentUpdate, AppError> {
        if self.company_code.trim().is_empty() {
            return Err(bad_request("company_code is required"));
        }
        Ok(AdjustmentUpdate {
            contract_value: override_value(self.contract_value.as_ref(), "contract_value")?,
            spent_value: override_value(self.spent_value.as_ref(), "spent_value")?,
            company_code: self.company_code.trim().to_string(),
            company_name: self.company_name.unwrap_or_default(),
            reason: self.reason.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompanyQuery {
    company_code: Option<String>,
}

impl CompanyQuery {
    fn code(&self) -> Option<&str> {
        self.company_code.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    fn required(&self) -> Result<&str, AppError> {
        self.code().ok_or_else(|| bad_request("company_code is required"))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// Who is making the request; recorded as the author of new expenses.
#[derive(Debug, Clone)]
struct Caller {
    username: String,
    #[cfg(feature = "auth")]
    session: Option<(String, Session)>,
}

#[cfg(feature = "auth")]
fn identify_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, AppError> {
    let Some(sessions) = &state.sessions else {
        return Ok(Caller {
            username: SYSTEM_USER.to_string(),
            session: None,
        });
    };
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(unauthorized)?;
    let session = sessions.validate(token).ok_or_else(unauthorized)?;
    Ok(Caller {
        username: session.username.clone(),
        session: Some((token.to_string(), session)),
    })
}

#[cfg(not(feature = "auth"))]
fn identify_caller(_state: &AppState, _headers: &HeaderMap) -> Result<Caller, AppError> {
    Ok(Caller {
        username: SYSTEM_USER.to_string(),
    })
}

async fn identify(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let caller = identify_caller(&state, req.headers())?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn get_data(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.dashboard.snapshot())
}

async fn list_expenses(
    State(state): State<AppState>,
    Query(q): Query<CompanyQuery>,
) -> Result<Json<Vec<ExpenseEntry>>, AppError> {
    Ok(Json(state.dashboard.expenses(q.code())?))
}

async fn add_expense(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ExpenseRequest>,
) -> Result<Json<Value>, AppError> {
    let id = state.dashboard.add_expense(req.into_new_expense()?, &caller.username)?;
    Ok(Json(json!({"success": true, "id": id})))
}

async fn delete_expense(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>, AppError> {
    let deleted = state.dashboard.delete_expense(id)?;
    Ok(Json(json!({"success": deleted})))
}

async fn get_adjustment(
    State(state): State<AppState>,
    Query(q): Query<CompanyQuery>,
) -> Result<Json<Value>, AppError> {
    let body = match state.dashboard.adjustment(q.required()?)? {
        Some(adjustment) => serde_json::to_value(adjustment).map_err(DashError::from)?,
        None => json!({}),
    };
    Ok(Json(body))
}

async fn set_adjustment(
    State(state): State<AppState>,
    Json(req): Json<AdjustmentRequest>,
) -> Result<Json<Value>, AppError> {
    state.dashboard.set_adjustment(req.into_update()?)?;
    Ok(Json(json!({"success": true})))
}

async fn clear_adjustment(
    State(state): State<AppState>,
    Query(q): Query<CompanyQuery>,
) -> Result<Json<Value>, AppError> {
    let cleared = state.dashboard.clear_adjustment(q.required()?)?;
    Ok(Json(json!({"success": cleared})))
}

async fn download_expenses(State(state): State<AppState>, Path(code): Path<String>) -> Result<Response, AppError> {
    let bytes = state.dashboard.export_expenses(&code)?;
    let disposition = format!("attachment; filename=\"{}\"", export::download_name(&code));
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Auth routes
// ---------------------------------------------------------------------------

#[cfg(feature = "auth")]
#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[cfg(feature = "auth")]
fn auth_disabled() -> AppError {
    AppError(StatusCode::NOT_FOUND, "authentication is disabled".to_string())
}

#[cfg(feature = "auth")]
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Json<Value>, AppError> {
    let sessions = state.sessions.as_ref().ok_or_else(auth_disabled)?;
    let user = state
        .dashboard
        .with_conn(|conn| auth::authenticate(conn, req.username.trim(), &req.password))?;
    let (token, session) = sessions.issue(&user);
    info!(username = %user.username, "login");
    Ok(Json(json!({
        "token": token,
        "user": user,
        "expires_at": session.expires_at,
    })))
}

#[cfg(feature = "auth")]
async fn logout(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> Result<Json<Value>, AppError> {
    let sessions = state.sessions.as_ref().ok_or_else(auth_disabled)?;
    let (token, session) = caller.session.ok_or_else(unauthorized)?;
    let revoked = sessions.revoke(&token);
    info!(username = %session.username, "logout");
    Ok(Json(json!({"success": revoked})))
}

#[cfg(feature = "auth")]
async fn me(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> Result<Json<Value>, AppError> {
    let (_, session) = caller.session.ok_or_else(auth_disabled)?;
    let user = state
        .dashboard
        .with_conn(|conn| crate::store::get_user(conn, session.user_id))?
        .ok_or_else(unauthorized)?;
    Ok(Json(json!({"user": user, "expires_at": session.expires_at})))
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[cfg(feature = "auth")]
fn socket_allowed(state: &AppState, token: Option<&str>) -> bool {
    match &state.sessions {
        None => true,
        Some(sessions) => token.and_then(|t| sessions.validate(t)).is_some(),
    }
}

#[cfg(not(feature = "auth"))]
fn socket_allowed(_state: &AppState, _token: Option<&str>) -> bool {
    true
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !socket_allowed(&state, q.token.as_deref()) {
        return unauthorized().into_response();
    }
    match ws {
        Ok(ws) => {
            let dashboard = state.dashboard.clone();
            ws.on_upgrade(move |socket| client_session(socket, dashboard))
        }
        Err(rejection) => rejection.into_response(),
    }
}

async fn send_snapshot<S>(sink: &mut S, dashboard: &Dashboard) -> bool
where
    S: Sink<Message> + Unpin,
{
    match dashboard.update_message() {
        Ok(msg) => sink.send(Message::Text(msg.into())).await.is_ok(),
        Err(e) => {
            error!(error = %e, "failed to serialize snapshot");
            false
        }
    }
}

async fn client_session(socket: WebSocket, dashboard: Arc<Dashboard>) {
    let events = dashboard.subscribe();
    let (sink, incoming) = socket.split();
    info!("dashboard client connected");
    forward_events(sink, incoming, events, &dashboard).await;
    debug!("dashboard client disconnected");
}

/// Send the current snapshot, then every broadcast event, until the client
/// goes away. A client that falls behind gets a fresh snapshot instead of the
/// dropped events.
async fn forward_events<S, R>(
    mut sink: S,
    mut incoming: R,
    mut events: broadcast::Receiver<String>,
    dashboard: &Dashboard,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    if !send_snapshot(&mut sink, dashboard).await {
        return;
    }

    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(msg) => {
                    if sink.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client fell behind, resending snapshot");
                    if !send_snapshot(&mut sink, dashboard).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Router and bootstrap
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState, static_dir: Option<&FsPath>) -> Router {
    let api = Router::new()
        .route("/api/data", get(get_data))
        .route("/api/expenses", get(list_expenses).post(add_expense))
        .route("/api/expenses/{id}", delete(delete_expense))
        .route(
            "/api/company/adjustment",
            get(get_adjustment).post(set_adjustment).delete(clear_adjustment),
        )
        .route("/api/download/expenses/{code}", get(download_expenses));
    #[cfg(feature = "auth")]
    let api = api
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me));
    let api = api.route_layer(middleware::from_fn_with_state(state.clone(), identify));

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .merge(api);
    #[cfg(feature = "auth")]
    let app = app.route("/api/auth/login", post(login));

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };
    app.layer(CorsLayer::very_permissive()).with_state(state)
}

fn start_watcher(settings: &Settings, dashboard: Arc<Dashboard>) -> Option<WatchHandle> {
    if settings.watch_folder.trim().is_empty() {
        warn!("no watch folder configured, only manual edits will update the dashboard");
        return None;
    }
    let folder = shellexpand_path(&settings.watch_folder);
    let started = FolderWatcher::new(&folder, &settings.file_pattern, settings.settle_delay())
        .and_then(|w| w.spawn(settings.check_interval(), move |path| dashboard.handle_file(path)));
    match started {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(folder = %folder, error = %e, "watcher not started");
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
}

/// Open the store, start the watcher and serve until ctrl-c.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let db_path = settings.db_path();
    let conn = get_connection(&db_path).with_context(|| format!("opening database {}", db_path.display()))?;
    init_db(&conn).context("initializing database schema")?;

    let dashboard = Arc::new(Dashboard::new(conn, settings.sheet_names()));
    let watcher = start_watcher(&settings, dashboard.clone());

    let state = AppState::new(dashboard, &settings);
    let app = build_router(state, settings.static_dir.as_deref().map(FsPath::new));

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, auth = settings.auth_enabled, "dashboard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    drop(watcher);
    info!("server stopped");
    Ok(())
}
