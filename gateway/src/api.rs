use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use farm_client::{ApiRequest, ApiVersion, ClientError, Credentials, Orchestrator, check_path};
use serde::{Deserialize, Serialize};
use session::Scope;
use std::collections::BTreeSet;

use crate::errors::{GatewayError, Result};
use crate::state::{AppState, SessionContext};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/session", get(session_info))
        .route("/api/servers/active", post(switch_server))
        .route("/api/scopes/sync", post(sync_scopes))
        .route("/api/logs/{arch}/{pkgbase}", get(package_log))
        .route("/api/{version}/{*path}", get(passthrough).post(passthrough))
        .with_state(state)
}

#[derive(Serialize)]
struct ActionResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

impl ActionResponse {
    fn ok(warning: Option<String>) -> Json<Self> {
        Json(Self {
            success: true,
            warning,
        })
    }
}

#[derive(Serialize)]
struct SessionView {
    is_logged_in: bool,
    username: String,
    display_name: String,
    avatar_url: Option<String>,
    active_server: Option<String>,
    servers: Vec<ServerView>,
}

#[derive(Serialize)]
struct ServerView {
    name: String,
    description: String,
    url: String,
    is_default: bool,
    accessible: bool,
    scopes: BTreeSet<Scope>,
}

#[derive(Deserialize)]
struct SwitchRequest {
    name: String,
}

#[derive(Serialize)]
struct SwitchResponse {
    success: bool,
    active_server: String,
}

#[derive(Deserialize)]
struct LogParams {
    #[serde(default = "default_strip")]
    strip: bool,
}

fn default_strip() -> bool {
    true
}

fn join_warnings(warnings: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    let warnings: Vec<String> = warnings.into_iter().flatten().collect();
    (!warnings.is_empty()).then(|| warnings.join("; "))
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(credentials): Json<Credentials>,
) -> Response {
    let mut ctx = state.open_session(&headers);
    let result = login_and_sync(&state, &mut ctx, &credentials).await;
    ctx.finish(result)
}

async fn login_and_sync(
    state: &AppState,
    ctx: &mut SessionContext,
    credentials: &Credentials,
) -> Result<Json<ActionResponse>> {
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err(GatewayError::BadRequest(
            "username and password are required".into(),
        ));
    }

    let login = ctx.orchestrator.login(credentials, state.verifier()).await?;
    let synced = ctx.orchestrator.sync_scopes().await;
    let warning = join_warnings([login.warning, synced.warning]);

    if !ctx.orchestrator.is_authenticated() {
        return Err(ClientError::AllServersFailed(warning.unwrap_or_default()).into());
    }

    ctx.renew();
    ctx.record.username = credentials.username.clone();
    ctx.record.display_name = credentials.username.clone();
    ctx.record.avatar_url = None;

    Ok(ActionResponse::ok(warning))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut ctx = state.open_session(&headers);
    ctx.orchestrator.logout();
    ctx.finish(Ok(ActionResponse::ok(None)))
}

async fn session_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut ctx = state.open_session(&headers);
    ctx.sync_record();

    let orchestrator = &ctx.orchestrator;
    let servers = orchestrator
        .registry()
        .list()
        .zip(orchestrator.tokens())
        .map(|(server, slot)| ServerView {
            name: server.name.clone(),
            description: server.description.clone(),
            url: server.url.to_string(),
            is_default: server.is_default,
            accessible: slot.is_authenticated(),
            scopes: slot.scopes.clone(),
        })
        .collect();
    let view = SessionView {
        is_logged_in: ctx.record.is_logged_in,
        username: ctx.record.username.clone(),
        display_name: ctx.record.display_name.clone(),
        avatar_url: ctx.record.avatar_url.clone(),
        active_server: orchestrator.active_server().map(|s| s.name.clone()),
        servers,
    };

    ctx.finish(Ok(Json(view)))
}

async fn switch_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SwitchRequest>,
) -> Response {
    let mut ctx = state.open_session(&headers);
    let result = ctx
        .orchestrator
        .switch_active_server(&request.name)
        .map(|server| {
            tracing::info!(server = %server.name, "switched active server");
            Json(SwitchResponse {
                success: true,
                active_server: server.name.clone(),
            })
        })
        .map_err(GatewayError::from);
    ctx.finish(result)
}

async fn sync_scopes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut ctx = state.open_session(&headers);
    let result = match ctx.orchestrator.is_authenticated() {
        true => Ok(ActionResponse::ok(ctx.orchestrator.sync_scopes().await.warning)),
        false => Err(GatewayError::from(ClientError::NotAuthenticated)),
    };
    ctx.finish(result)
}

async fn package_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((arch, pkgbase)): Path<(String, String)>,
    Query(params): Query<LogParams>,
) -> Response {
    let ctx = state.open_session(&headers);
    let log = ctx
        .orchestrator
        .get_package_log(&pkgbase, &arch, params.strip)
        .await;
    ctx.finish(Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], log)))
}

async fn passthrough(
    State(state): State<AppState>,
    headers: HeaderMap,
    method: Method,
    Path((version, path)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let ctx = state.open_session(&headers);
    let result = forward(&ctx.orchestrator, method, &version, path, query, &body).await;
    ctx.finish(result)
}

async fn forward(
    orchestrator: &Orchestrator,
    method: Method,
    version: &str,
    path: String,
    query: Vec<(String, String)>,
    body: &[u8],
) -> Result<Json<serde_json::Value>> {
    let version: ApiVersion = version.parse()?;
    check_path(&path).map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    let mut request = ApiRequest::new(method, version, path);
    request.query = query;
    if !body.is_empty() {
        let value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::BadRequest(format!("request body is not JSON: {e}")))?;
        request = request.with_body(value);
    }

    let value: serde_json::Value = orchestrator.dispatch_json(&request).await?;
    Ok(Json(value))
}
