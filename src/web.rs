use crate::{
    app::{App, AppError},
    auth::extract_bearer_token,
    blocks::{Block, BlockCreate, BlockUpdate},
    chat::{ChatMessage, ChatReply, Role},
    pages::{PageCreate, PageNode, PageUpdate},
    semantic::Match,
};
use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

/// User resolved from the bearer token.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub String);

pub fn router(app: Arc<App>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    let api = Router::new()
        .route("/api/pages", get(list_pages).post(create_page))
        .route("/api/pages/move", post(move_page))
        .route("/api/pages/reorder", post(reorder_page))
        .route(
            "/api/pages/:id",
            get(get_page).patch(update_page).delete(delete_page),
        )
        .route("/api/blocks", get(list_blocks).post(create_block))
        .route("/api/blocks/:id", patch(update_block).delete(delete_block))
        .route("/api/search", post(search))
        .route("/api/chat", get(chat_query).post(chat))
        .route_layer(middleware::from_fn_with_state(
            shared_state.clone(),
            require_user,
        ));

    Router::new()
        .route("/api/health", get(health))
        .merge(api)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

pub async fn start_app(app: App, listen: &str) -> anyhow::Result<()> {
    let router = router(Arc::new(app));

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("listening on {listen}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

async fn require_user(
    State(state): State<Arc<SharedState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or_else(|| AppError::Auth("missing bearer token".to_string()))?;

    let user = state
        .app
        .authenticate(token)
        .ok_or_else(|| AppError::Auth("invalid token".to_string()))?
        .to_string();

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Provider(_) => {
                log::error!("{self:?}");
                StatusCode::BAD_GATEWAY
            }
            AppError::Database(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// pages

async fn list_pages(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<PageNode>>, HttpError> {
    Ok(Json(state.app.list_pages(&user)?))
}

async fn create_page(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<PageCreate>,
) -> Result<Json<PageNode>, HttpError> {
    log::debug!("create page: title={:?} parent={:?}", payload.title, payload.parent_id);
    Ok(Json(state.app.create_page(&user, payload).await?))
}

async fn get_page(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Result<Json<PageNode>, HttpError> {
    Ok(Json(state.app.get_page(&user, id)?))
}

async fn update_page(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(payload): Json<PageUpdate>,
) -> Result<Json<PageNode>, HttpError> {
    Ok(Json(state.app.update_page(&user, id, payload).await?))
}

async fn delete_page(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, HttpError> {
    state.app.delete_page(&user, id)?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovePageRequest {
    page_id: u64,
    #[serde(default)]
    new_parent_id: Option<u64>,
}

async fn move_page(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<MovePageRequest>,
) -> Result<Json<PageNode>, HttpError> {
    Ok(Json(state.app.move_page(
        &user,
        payload.page_id,
        payload.new_parent_id,
    )?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderPageRequest {
    page_id: u64,
    new_order: i64,
}

async fn reorder_page(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<ReorderPageRequest>,
) -> Result<Json<PageNode>, HttpError> {
    Ok(Json(state.app.reorder_page(
        &user,
        payload.page_id,
        payload.new_order,
    )?))
}

// blocks

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlocksQuery {
    page_id: Option<u64>,
}

async fn list_blocks(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<BlocksQuery>,
) -> Result<Json<Vec<Block>>, HttpError> {
    let page_id = query
        .page_id
        .ok_or_else(|| AppError::Validation("pageId is required".to_string()))?;
    Ok(Json(state.app.list_blocks(&user, page_id)?))
}

async fn create_block(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<BlockCreate>,
) -> Result<(StatusCode, Json<Block>), HttpError> {
    let block = state.app.create_block(&user, payload).await?;
    Ok((StatusCode::CREATED, Json(block)))
}

async fn update_block(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(payload): Json<BlockUpdate>,
) -> Result<Json<Block>, HttpError> {
    Ok(Json(state.app.update_block(&user, id, payload).await?))
}

async fn delete_block(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, HttpError> {
    state.app.delete_block(&user, id)?;
    Ok(Json(json!({"success": true})))
}

// retrieval

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<Match>>, HttpError> {
    Ok(Json(state.app.search(&user, &payload.query).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    role: Role,
    content: String,
    #[serde(default)]
    user_id: Option<String>,
}

/// Either a conversation or a single message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatQuery {
    message: Option<String>,
    user_id: Option<String>,
}

/// A user id sent by the client may only name the authenticated user.
fn check_claimed_user<'a>(
    user: &str,
    claimed: impl IntoIterator<Item = &'a Option<String>>,
) -> Result<(), AppError> {
    for claim in claimed.into_iter().flatten() {
        if claim != user {
            return Err(AppError::Auth(
                "userId does not match the authenticated user".to_string(),
            ));
        }
    }
    Ok(())
}

async fn chat(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, HttpError> {
    check_claimed_user(
        &user,
        std::iter::once(&payload.user_id).chain(payload.messages.iter().map(|m| &m.user_id)),
    )?;

    let history: Vec<ChatMessage> = if payload.messages.is_empty() {
        payload.message.map(ChatMessage::user).into_iter().collect()
    } else {
        payload
            .messages
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect()
    };

    let reply = state.app.chat(&user, history).await?;
    Ok(stream_reply(reply)?)
}

async fn chat_query(
    State(state): State<Arc<SharedState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<ChatQuery>,
) -> Result<Response, HttpError> {
    check_claimed_user(&user, [&query.user_id])?;

    let message = query
        .message
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| AppError::Validation("message is required".to_string()))?;

    let reply = state.app.chat(&user, vec![ChatMessage::user(message)]).await?;
    Ok(stream_reply(reply)?)
}

fn stream_reply(reply: ChatReply) -> Result<Response, AppError> {
    log::debug!(
        "chat {}: streaming with {} matches",
        reply.turn_id,
        reply.matches.len()
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("x-chat-turn", reply.turn_id.as_str())
        .body(Body::from_stream(reply.tokens))
        .map_err(|err| AppError::Other(err.into()))
}
