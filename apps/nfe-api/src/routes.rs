//! # Routes
//!
//! Handlers are thin: check the path, decode the body, call the engine.
//! Access keys in paths are verified here, before any storage is touched.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;
use nfe_core::validation::{validate_cnpj, validate_required, validate_state_code};
use nfe_core::{
    AccessKey, DocumentModel, Environment, EventKind, IssueOutcome, Tenant, ValidationError,
};
use nfe_sefaz::certificate::check_tenant_id;
use nfe_db::EventRecord;
use nfe_sefaz::{
    ArtifactKind, CertificateMetadata, EventOutcome, IssueError, IssueRequest, Passphrase,
    StatusAnswer, VoidingOutcome, VoidingRequest,
};

/// Base64 inflates a 5 MiB certificate to about 6.7 MiB.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

type Shared = State<Arc<AppState>>;
type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tenants/{tenant_id}", put(upsert_tenant))
        .route(
            "/tenants/{tenant_id}/certificate",
            put(upload_certificate)
                .get(validate_certificate)
                .delete(remove_certificate),
        )
        .route("/tenants/{tenant_id}/documents", post(issue))
        .route("/tenants/{tenant_id}/documents/{key}/cancel", post(cancel))
        .route("/tenants/{tenant_id}/documents/{key}/corrections", post(correct))
        .route("/tenants/{tenant_id}/documents/{key}/reconcile", post(reconcile))
        .route("/tenants/{tenant_id}/documents/{key}/events", get(list_events))
        .route("/tenants/{tenant_id}/artifacts/{key}/{kind}", get(artifact))
        .route(
            "/tenants/{tenant_id}/artifacts/{key}/cancellation/{kind}",
            get(cancellation_artifact),
        )
        .route(
            "/tenants/{tenant_id}/artifacts/{key}/corrections/{sequence}/{kind}",
            get(correction_artifact),
        )
        .route("/tenants/{tenant_id}/voidings", post(void_range).get(list_voidings))
        .route("/tenants/{tenant_id}/authority/status", get(authority_status))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn parse_key(raw: &str) -> ApiResult<AccessKey> {
    AccessKey::parse(raw).map_err(|e| ApiError::malformed_key(e.to_string()))
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): Shared) -> impl IntoResponse {
    if state.db().health_check().await {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unreachable" })),
        )
    }
}

// =============================================================================
// Tenants
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TenantBody {
    pub tax_id: String,
    pub legal_name: String,
    pub state_code: u8,
    pub default_environment: Environment,
    #[serde(default)]
    pub csc_id: Option<String>,
    #[serde(default)]
    pub csc_token: Option<String>,
}

async fn upsert_tenant(
    State(state): Shared,
    Path(tenant_id): Path<String>,
    Json(body): Json<TenantBody>,
) -> ApiResult<Json<Tenant>> {
    check_tenant_id(&tenant_id).map_err(IssueError::from)?;
    let tax_id = validate_cnpj("tax_id", &body.tax_id).map_err(IssueError::from)?;
    let legal_name =
        validate_required("legal_name", &body.legal_name, 60).map_err(IssueError::from)?;
    validate_state_code(body.state_code).map_err(IssueError::from)?;

    let tenants = state.db().tenants();
    let now = Utc::now();
    let created_at = tenants
        .get(&tenant_id)
        .await?
        .map(|existing| existing.created_at)
        .unwrap_or(now);

    let tenant = Tenant {
        id: tenant_id,
        tax_id,
        legal_name,
        state_code: body.state_code,
        default_environment: body.default_environment,
        csc_id: body.csc_id.filter(|v| !v.trim().is_empty()),
        csc_token: body.csc_token.filter(|v| !v.trim().is_empty()),
        created_at,
        updated_at: now,
    };
    tenants.upsert(&tenant).await?;
    info!(tenant_id = %tenant.id, state_code = tenant.state_code, "Tenant saved");
    Ok(Json(tenant))
}

// =============================================================================
// Certificates
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CertificateUpload {
    pub filename: String,
    /// PKCS#12 container, base64.
    pub content: String,
    pub passphrase: String,
}

async fn upload_certificate(
    State(state): Shared,
    Path(tenant_id): Path<String>,
    Json(body): Json<CertificateUpload>,
) -> ApiResult<Json<CertificateMetadata>> {
    let blob = BASE64.decode(body.content.trim()).map_err(|_| {
        IssueError::Validation(ValidationError::invalid_format(
            "content",
            "is not valid base64",
        ))
    })?;
    let metadata = state
        .ctx
        .certificates
        .store(&tenant_id, &body.filename, blob, Passphrase::new(body.passphrase))
        .await
        .map_err(IssueError::from)?;
    Ok(Json(metadata))
}

async fn validate_certificate(
    State(state): Shared,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<CertificateMetadata>> {
    let metadata = state
        .ctx
        .certificates
        .validate(&tenant_id)
        .await
        .map_err(IssueError::from)?;
    Ok(Json(metadata))
}

async fn remove_certificate(
    State(state): Shared,
    Path(tenant_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .ctx
        .certificates
        .remove(&tenant_id)
        .await
        .map_err(IssueError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Documents
// =============================================================================

async fn issue(
    State(state): Shared,
    Path(tenant_id): Path<String>,
    Json(request): Json<IssueRequest>,
) -> ApiResult<(StatusCode, Json<IssueOutcome>)> {
    debug!(tenant_id = %tenant_id, model = %request.model, items = request.items.len(), "Issue requested");
    let outcome = state.pipeline.issue(&tenant_id, request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn reconcile(
    State(state): Shared,
    Path((tenant_id, key)): Path<(String, String)>,
) -> ApiResult<Json<IssueOutcome>> {
    let key = parse_key(&key)?;
    let outcome = state.pipeline.reconcile(&tenant_id, key.as_str()).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub justification: String,
}

async fn cancel(
    State(state): Shared,
    Path((tenant_id, key)): Path<(String, String)>,
    Json(body): Json<CancelBody>,
) -> ApiResult<Json<EventOutcome>> {
    let key = parse_key(&key)?;
    let outcome = state
        .events
        .cancel(&tenant_id, key.as_str(), &body.justification)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CorrectionBody {
    pub text: String,
    pub sequence: u32,
}

async fn correct(
    State(state): Shared,
    Path((tenant_id, key)): Path<(String, String)>,
    Json(body): Json<CorrectionBody>,
) -> ApiResult<Json<EventOutcome>> {
    let key = parse_key(&key)?;
    let outcome = state
        .events
        .correct(&tenant_id, key.as_str(), &body.text, body.sequence)
        .await?;
    Ok(Json(outcome))
}

/// An event as listed for its document.
#[derive(Debug, Serialize)]
pub struct EventView {
    pub kind: EventKind,
    pub sequence: u32,
    pub text: String,
    pub status_code: u16,
    pub reason: String,
    pub protocol_number: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
}

impl From<EventRecord> for EventView {
    fn from(record: EventRecord) -> Self {
        EventView {
            kind: record.kind,
            sequence: record.sequence as u32,
            text: record.text,
            status_code: record.status_code as u16,
            reason: record.reason,
            protocol_number: record.protocol_number,
            registered_at: record.registered_at,
        }
    }
}

async fn list_events(
    State(state): Shared,
    Path((tenant_id, key)): Path<(String, String)>,
) -> ApiResult<Json<Vec<EventView>>> {
    let key = parse_key(&key)?;
    let document = state
        .db()
        .documents()
        .require_by_key(&tenant_id, key.as_str())
        .await?;
    let events = state.db().events().list(&document.id).await?;
    Ok(Json(events.into_iter().map(EventView::from).collect()))
}

// =============================================================================
// Voiding and Authority Status
// =============================================================================

async fn void_range(
    State(state): Shared,
    Path(tenant_id): Path<String>,
    Json(request): Json<VoidingRequest>,
) -> ApiResult<(StatusCode, Json<VoidingOutcome>)> {
    debug!(
        tenant_id = %tenant_id,
        series = request.series,
        first = request.first_number,
        last = request.last_number,
        "Voiding requested"
    );
    let outcome = state.voider.void(&tenant_id, &request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn list_voidings(
    State(state): Shared,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<Vec<VoidingOutcome>>> {
    Ok(Json(state.voider.list(&tenant_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub model: Option<DocumentModel>,
    #[serde(default)]
    pub environment: Option<Environment>,
}

#[derive(Debug, Serialize)]
pub struct AuthorityStatus {
    pub in_operation: bool,
    #[serde(flatten)]
    pub answer: StatusAnswer,
}

async fn authority_status(
    State(state): Shared,
    Path(tenant_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<AuthorityStatus>> {
    let model = query.model.unwrap_or(DocumentModel::Nfe);
    let answer = state
        .ctx
        .authority_status(&tenant_id, model, query.environment)
        .await?;
    Ok(Json(AuthorityStatus {
        in_operation: answer.in_operation(),
        answer,
    }))
}

// =============================================================================
// Artifacts
// =============================================================================

async fn artifact(
    State(state): Shared,
    Path((tenant_id, key, kind)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&key)?;
    let kind: ArtifactKind = kind.parse().map_err(IssueError::from)?;
    let bytes = state.ctx.artifacts.read(&tenant_id, &key, kind).await?;
    Ok(file_response(bytes, kind, key.to_string()))
}

fn file_response(
    bytes: Vec<u8>,
    kind: ArtifactKind,
    filename: String,
) -> impl IntoResponse {
    let disposition = format!("inline; filename=\"{}.{}\"", filename, kind.extension());
    (
        [
            (header::CONTENT_TYPE, kind.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
}

async fn cancellation_artifact(
    State(state): Shared,
    Path((tenant_id, key, kind)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&key)?;
    let kind: ArtifactKind = kind.parse().map_err(IssueError::from)?;
    let bytes = state
        .ctx
        .artifacts
        .read_event(&tenant_id, &key, EventKind::Cancellation, 1, kind)
        .await?;
    Ok(file_response(bytes, kind, format!("{}_canc", key)))
}

async fn correction_artifact(
    State(state): Shared,
    Path((tenant_id, key, sequence, kind)): Path<(String, String, u32, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&key)?;
    let kind: ArtifactKind = kind.parse().map_err(IssueError::from)?;
    let bytes = state
        .ctx
        .artifacts
        .read_event(&tenant_id, &key, EventKind::Correction, sequence, kind)
        .await?;
    Ok(file_response(bytes, kind, format!("{}_cce_{:02}", key, sequence)))
}

// =============================================================================
// Unit Tests
// =============================================================================
