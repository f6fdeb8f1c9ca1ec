use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use insider_core::broker::alpaca::AlpacaClient;
use insider_core::config::{self, Settings};
use insider_core::domain::recommendation::{Recommendation, RecommendationStatus};
use insider_core::lifecycle::{LifecycleConfig, LifecycleService, TransitionOutcome};
use insider_core::notify::telegram::{TelegramNotifier, Update};
use insider_core::notify::{parse_callback_data, CallbackAction, Notifier};
use insider_core::schedule::{ScheduledJob, Scheduler};
use insider_core::storage::{self, PgStore};

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let services = match build_services(&settings).await {
        Ok(services) => Some(services),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = ?e, "service setup failed; starting API in degraded mode");
            None
        }
    };
    let state = AppState {
        services: services.map(Arc::new),
        webhook_secret: settings.telegram_webhook_secret.clone(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/recommendations", get(list_recommendations))
        .route("/recommendations/:id", get(get_recommendation))
        .route(
            "/recommendations/:id/approve",
            get(confirm_approve).post(approve),
        )
        .route("/recommendations/:id/reject", get(confirm_reject).post(reject))
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/schedules", get(list_schedules))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = config::parse_env("PORT", 3000)?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

struct Services {
    store: PgStore,
    lifecycle: LifecycleService,
    telegram: Arc<TelegramNotifier>,
}

async fn build_services(settings: &Settings) -> anyhow::Result<Services> {
    let pool = storage::connect(settings.require_database_url()?, 5).await?;
    let store = PgStore::new(pool);
    let shared = Arc::new(store.clone());
    let telegram = Arc::new(TelegramNotifier::from_settings(settings)?);

    let lifecycle = LifecycleService::new(
        shared.clone(),
        shared,
        telegram.clone(),
        Arc::new(AlpacaClient::from_settings(settings)?),
        LifecycleConfig {
            expiry: settings.recommendation_expiry,
            public_base_url: settings.public_base_url.clone(),
        },
    );

    Ok(Services {
        store,
        lifecycle,
        telegram,
    })
}

#[derive(Clone)]
struct AppState {
    services: Option<Arc<Services>>,
    webhook_secret: Option<String>,
}

impl AppState {
    fn services(&self) -> Result<&Services, StatusCode> {
        self.services
            .as_deref()
            .ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = ?e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
}

async fn list_recommendations(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Recommendation>>, StatusCode> {
    let services = state.services()?;
    let status = match q.status.as_deref() {
        None => None,
        Some(s) => Some(
            RecommendationStatus::parse(&s.to_ascii_lowercase()).ok_or(StatusCode::BAD_REQUEST)?,
        ),
    };
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let recs = services
        .lifecycle
        .list(status, limit)
        .await
        .map_err(internal_error)?;
    Ok(Json(recs))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Recommendation>, StatusCode> {
    let services = state.services()?;
    let rec = services
        .lifecycle
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(rec))
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    recommendation_id: Uuid,
    outcome: &'static str,
    message: String,
}

fn outcome_response(id: Uuid, outcome: &TransitionOutcome) -> Response {
    let status = match outcome {
        TransitionOutcome::NotFound => StatusCode::NOT_FOUND,
        TransitionOutcome::AlreadyResolved { .. } | TransitionOutcome::ApprovalTooLate => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::OK,
    };
    let body = ActionResponse {
        recommendation_id: id,
        outcome: outcome.code(),
        message: outcome.user_message(),
    };
    (status, Json(body)).into_response()
}

async fn approve(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, StatusCode> {
    let services = state.services()?;
    let outcome = services
        .lifecycle
        .approve(id, Utc::now())
        .await
        .map_err(internal_error)?;
    Ok(outcome_response(id, &outcome))
}

async fn reject(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, StatusCode> {
    let services = state.services()?;
    let outcome = services
        .lifecycle
        .reject(id, Utc::now())
        .await
        .map_err(internal_error)?;
    Ok(outcome_response(id, &outcome))
}

// Link previews fetch GET URLs, so GET only renders a form; the POST acts.
async fn confirm_approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, StatusCode> {
    confirm_page(&state, id, CallbackAction::Approve).await
}

async fn confirm_reject(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, StatusCode> {
    confirm_page(&state, id, CallbackAction::Reject).await
}

async fn confirm_page(
    state: &AppState,
    id: Uuid,
    action: CallbackAction,
) -> Result<Html<String>, StatusCode> {
    let services = state.services()?;
    let rec = services
        .lifecycle
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Html(render_confirm_page(&rec, action)))
}

fn render_confirm_page(rec: &Recommendation, action: CallbackAction) -> String {
    let verb = match action {
        CallbackAction::Approve => "Approve",
        CallbackAction::Reject => "Reject",
    };
    let summary = format!(
        "{} {} for ${:.2}",
        rec.action,
        html_escape(&rec.ticker),
        rec.notional
    );
    let body = if rec.status.is_pending() {
        format!(
            "<form method=\"post\" action=\"/recommendations/{}/{}\"><button type=\"submit\">{verb}</button></form>",
            rec.id,
            action.as_str()
        )
    } else {
        format!("<p>Already {}.</p>", rec.status)
    };
    format!(
        "<!doctype html><html><head><title>{verb} recommendation</title></head><body>\
         <h1>{summary}</h1><p>{}</p>{body}</body></html>",
        html_escape(&rec.rationale)
    )
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn secret_matches(provided: Option<&str>, expected: &str) -> bool {
    use subtle::ConstantTimeEq;
    provided.is_some_and(|p| p.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1)
}

async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    let Some(expected) = state.webhook_secret.as_deref() else {
        tracing::warn!("TELEGRAM_WEBHOOK_SECRET unset; refusing webhook");
        return StatusCode::FORBIDDEN;
    };
    let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if !secret_matches(provided, expected) {
        return StatusCode::UNAUTHORIZED;
    }
    let Ok(services) = state.services() else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };

    // Anything other than a button press is acknowledged and ignored.
    let Some(cb) = update.callback_query else {
        return StatusCode::OK;
    };

    let from_chat = cb.message.as_ref().map(|m| m.chat.id.to_string());
    if from_chat.as_deref() != Some(services.telegram.chat_id()) {
        tracing::warn!(chat = ?from_chat, "callback from unexpected chat ignored");
        return StatusCode::OK;
    }

    let Some((action, id)) = cb.data.as_deref().and_then(parse_callback_data) else {
        tracing::warn!(data = ?cb.data, "unrecognized callback data");
        return StatusCode::OK;
    };

    let now = Utc::now();
    let result = match action {
        CallbackAction::Approve => services.lifecycle.approve(id, now).await,
        CallbackAction::Reject => services.lifecycle.reject(id, now).await,
    };
    let message = match result {
        Ok(outcome) => {
            tracing::info!(recommendation_id = %id, %action, outcome = outcome.code(), "callback handled");
            outcome.user_message()
        }
        Err(e) => {
            let _ = internal_error(e);
            "Something went wrong handling that; please try again.".to_string()
        }
    };

    if let Err(e) = services.telegram.answer_callback_query(&cb.id, &message).await {
        tracing::warn!(error = %e, "answerCallbackQuery failed");
    }
    if let Err(e) = services.telegram.send_text(&message).await {
        tracing::warn!(error = %e, "failed to post callback outcome");
    }
    StatusCode::OK
}

async fn list_schedules(State(state): State<AppState>) -> Result<Json<Vec<ScheduledJob>>, StatusCode> {
    let services = state.services()?;
    let jobs = services.store.list_active().await.map_err(internal_error)?;
    Ok(Json(jobs))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
