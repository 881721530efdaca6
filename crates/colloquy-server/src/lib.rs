use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use colloquy_config::{load_dialog_model, Config};
use serde_json::{json, Value};
use tracing::{info, warn};

mod dispatch;
mod skill;
mod store;

pub use dispatch::{DispatchError, Dispatcher};
pub use skill::{
    IntentReply, RemoteSkill, Skill, SkillError, SlotHandler, SlotHandlers, UnregisteredHandler,
};
pub use store::{DegradedFetch, SessionStore, StoreError, StoreSettings};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "colloquy listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let skill = RemoteSkill::new(&cfg.skill)?;
    build_app_with(cfg, Arc::new(skill), SlotHandlers::new()).await
}

pub async fn build_app_with(
    cfg: Config,
    skill: Arc<dyn Skill>,
    slot_handlers: SlotHandlers,
) -> Result<Router, String> {
    let model = load_dialog_model(&cfg.dialog.model_path).map_err(|e| e.to_string())?;
    let store = SessionStore::from_config(&cfg.store)?;
    info!(
        intents = model.dialog.intents.len(),
        store = %cfg.store.kind,
        "dialog model loaded"
    );
    let dispatcher = Dispatcher::new(Arc::new(model), store, skill, slot_handlers)
        .map_err(|e| e.to_string())?;
    let state = AppState { dispatcher };
    Ok(Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/contracts", get(contracts))
        .route("/v1/turns", post(turns))
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    dispatcher: Dispatcher,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.dispatcher.store().ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            warn!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

async fn contracts() -> Json<Value> {
    let manifest = colloquy_contracts::contracts_manifest_v1();
    Json(json!({
        "api_version": colloquy_contracts::API_VERSION,
        "openapi_sha256": manifest.openapi_sha256,
        "contracts_set_sha256": manifest.contracts_set_sha256,
        "generated_at": manifest.generated_at,
        "schemas": manifest
            .schemas
            .iter()
            .map(|s| json!({"path": s.path, "sha256": s.sha256}))
            .collect::<Vec<_>>(),
    }))
}

/// Turn failures travel inside the envelope status, so the transport status
/// is always 200.
async fn turns(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let out = state.dispatcher.handle_call(&body).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        out,
    )
}
