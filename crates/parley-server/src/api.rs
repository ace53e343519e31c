use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware,
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_shared::models::UserProfile;
use parley_shared::types::UserId;

use crate::auth::IdentityResolver;
use crate::chat::{ChatError, ChatService};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub resolver: Arc<dyn IdentityResolver>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.frontend_url.as_deref());

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/presence", get(admin_presence))
        .route("/admin/users", put(admin_upsert_user))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Restrict to the configured frontend origin, with credentials. Without
/// one, any origin is allowed.
fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let methods = [Method::GET, Method::PUT, Method::OPTIONS];

    match frontend_url.map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(methods)
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true),
        Some(Err(_)) => {
            warn!("FRONTEND_URL is not a valid origin, allowing any origin");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(methods)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceEntry {
    user_id: UserId,
    connections: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminPresenceResponse {
    online_users: usize,
    total_connections: usize,
    users: Vec<PresenceEntry>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.chat.presence().online_count().await,
    })
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ServerError::Forbidden("Missing admin token".into()))?
        .to_str()
        .map_err(|_| ServerError::BadRequest("Authorization header is not ASCII".into()))?;

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_presence(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminPresenceResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let users: Vec<PresenceEntry> = state
        .chat
        .presence()
        .connection_counts()
        .await
        .into_iter()
        .map(|(user_id, connections)| PresenceEntry {
            user_id,
            connections,
        })
        .collect();

    Ok(Json(AdminPresenceResponse {
        online_users: users.len(),
        total_connections: state.chat.registry().connection_count().await,
        users,
    }))
}

/// Insert or refresh a profile in the user mirror. Sessions only bind to
/// identities present there.
async fn admin_upsert_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let profile: UserProfile = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("invalid profile: {e}")))?;

    state
        .chat
        .register_user(profile)
        .await
        .map_err(|e| match e {
            ChatError::Validation(msg) => ServerError::BadRequest(msg),
            other => ServerError::Internal(other.to_string()),
        })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP/WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use parley_shared::token::create_session_token;
    use parley_store::Database;
    use rand::rngs::OsRng;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::auth::TokenResolver;
    use crate::presence::PresenceService;
    use crate::rate_limit::TokenBucket;
    use crate::registry::ConnectionRegistry;
    use crate::repo_pool::RepositoryPool;
    use crate::session::Session;

    fn state(admin_token: Option<&str>) -> AppState {
        let config = ServerConfig {
            admin_token: admin_token.map(str::to_string),
            instance_name: "Test Node".into(),
            ..ServerConfig::default()
        };
        let chat = ChatService::new(
            RepositoryPool::single(Box::new(Database::open_in_memory().unwrap())),
            PresenceService::new(),
            ConnectionRegistry::new(),
        );
        AppState {
            chat,
            resolver: Arc::new(TokenResolver::new(config.token_issuer_pubkey)),
            rate_limiter: RateLimiter::default(),
            config: Arc::new(config),
        }
    }

    async fn get_json(
        app: Router,
        uri: &str,
        auth: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().uri(uri);
        if let Some(auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }
        let response = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(build_router(state(None)), "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_info_reports_online_count() {
        let state = state(None);
        state.chat.presence().connect(UserId::new()).await;

        let (status, body) = get_json(build_router(state), "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Test Node");
        assert_eq!(body["onlineUsers"], 1);
    }

    #[tokio::test]
    async fn test_admin_disabled_without_token() {
        let (status, body) =
            get_json(build_router(state(None)), "/admin/presence", Some("Bearer x")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_admin_presence_requires_matching_token() {
        let (status, _) = get_json(
            build_router(state(Some("secret"))),
            "/admin/presence",
            Some("Bearer wrong!"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            get_json(build_router(state(Some("secret"))), "/admin/presence", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_presence_lists_connection_counts() {
        let state = state(Some("secret"));
        let user = UserId::new();
        state.chat.presence().connect(user).await;
        state.chat.presence().connect(user).await;

        let (status, body) =
            get_json(build_router(state), "/admin/presence", Some("Bearer secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["onlineUsers"], 1);
        assert_eq!(body["users"][0]["userId"], user.to_string());
        assert_eq!(body["users"][0]["connections"], 2);
    }

    async fn put_user(app: Router, auth: Option<&str>, body: &str) -> StatusCode {
        let mut req = Request::builder()
            .method(Method::PUT)
            .uri("/admin/users")
            .header(CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }
        let response = app
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        response.status()
    }

    fn profile_json(id: UserId, name: &str) -> String {
        serde_json::json!({
            "id": id,
            "name": name,
            "email": format!("{name}@example.com"),
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_admin_users_requires_token() {
        let state = state(Some("secret"));
        let user = UserId::new();
        let body = profile_json(user, "alice");

        let status = put_user(build_router(state.clone()), None, &body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let status = put_user(build_router(state.clone()), Some("Bearer nope!"), &body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!state.chat.user_exists(&user).await.unwrap());

        let status = put_user(build_router(state.clone()), Some("Bearer secret"), "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let blank = profile_json(user, " ");
        let status = put_user(build_router(state.clone()), Some("Bearer secret"), &blank).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!state.chat.user_exists(&user).await.unwrap());
    }

    #[tokio::test]
    async fn test_registered_user_binds_with_signed_token() {
        let issuer = SigningKey::generate(&mut OsRng);
        let mut state = state(Some("secret"));
        state.resolver = Arc::new(TokenResolver::new(issuer.verifying_key().to_bytes()));

        let user = UserId::new();
        let token = create_session_token(user, Utc::now() + Duration::hours(1), &issuer)
            .encode()
            .unwrap();

        // A valid token alone is not enough until the profile is mirrored.
        let (tx, _rx) = mpsc::unbounded_channel();
        let before = Session::open(
            state.chat.clone(),
            state.resolver.as_ref(),
            Some(&token),
            tx,
            TokenBucket::new(0.0, 10.0),
        )
        .await;
        assert_eq!(before.user(), None);
        before.close().await;

        let status = put_user(
            build_router(state.clone()),
            Some("Bearer secret"),
            &profile_json(user, "alice"),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(
            state.chat.clone(),
            state.resolver.as_ref(),
            Some(&token),
            tx,
            TokenBucket::new(0.0, 10.0),
        )
        .await;
        assert_eq!(session.user(), Some(user));
        assert!(state.chat.presence().is_online(&user).await);
        assert!(matches!(
            rx.try_recv(),
            Ok(parley_shared::protocol::ServerEvent::OnlineUser(list)) if list == vec![user]
        ));
    }

    #[test]
    fn test_cors_layer_accepts_bad_origin() {
        // Invalid header values fall back to the permissive layer instead of panicking.
        let _ = cors_layer(Some("http://bad\norigin"));
        let _ = cors_layer(Some("http://localhost:3000"));
        let _ = cors_layer(None);
    }
}
