//! HTTP surface: routes, request parsing, and response envelopes.

use crate::error::PipelineError;
use crate::pipeline::{ConceptGroup, Pipeline, Source, TextReference, VectorizeRequest};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Shared handles available to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The processing pipeline.
    pub pipeline: Arc<Pipeline>,
}

/// Success envelope: `{ "success": true, "data": … }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Always true on this envelope.
    pub success: bool,
    /// Operation payload.
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
}

/// Pipeline error adapted to the HTTP boundary.
pub struct ApiFailure(pub PipelineError);

impl From<PipelineError> for ApiFailure {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                kind: self.0.kind(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// `POST /api/vectorize` request body.
#[derive(Debug, Deserialize)]
pub struct VectorizeBody {
    /// Raw text input; mutually exclusive with `url`.
    pub text: Option<String>,
    /// Article URL input; mutually exclusive with `text`.
    pub url: Option<String>,
    /// Owning user id.
    pub user_id: String,
    /// Optional filename for the stored blob.
    pub filename: Option<String>,
}

/// `GET /api/texts-by-concept` query parameters.
#[derive(Debug, Deserialize)]
pub struct TextsByConceptParams {
    /// Concept name to look up.
    pub concept: String,
    /// Owning user id.
    pub user_id: String,
}

/// Builds the application router with permissive CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/vectorize", post(vectorize))
        .route("/api/texts-by-concept", get(texts_by_concept))
        .layer(cors)
        .with_state(state)
}

async fn vectorize(
    State(state): State<AppState>,
    Json(body): Json<VectorizeBody>,
) -> Result<Json<ApiResponse<Vec<ConceptGroup>>>, ApiFailure> {
    let request = parse_vectorize_body(body)?;
    let groups = state.pipeline.vectorize(request).await?;
    Ok(Json(ApiResponse::ok(groups)))
}

async fn texts_by_concept(
    State(state): State<AppState>,
    Query(params): Query<TextsByConceptParams>,
) -> Result<Json<ApiResponse<Vec<TextReference>>>, ApiFailure> {
    let user_id = parse_user_id(&params.user_id)?;
    let texts = state.pipeline.texts_by_concept(user_id, &params.concept).await?;
    Ok(Json(ApiResponse::ok(texts)))
}

/// Turns the untyped request body into a tagged [`Source`]: exactly one
/// of `text`/`url` must be present, and empty strings count as absent.
fn parse_vectorize_body(body: VectorizeBody) -> Result<VectorizeRequest, PipelineError> {
    let user_id = parse_user_id(&body.user_id)?;

    let text = body.text.filter(|t| !t.trim().is_empty());
    let url = body.url.filter(|u| !u.trim().is_empty());

    let source = match (text, url) {
        (Some(text), None) => Source::Text(text),
        (None, Some(url)) => Source::Url(url),
        (Some(_), Some(_)) => {
            return Err(PipelineError::InvalidRequest(
                "provide either text or url, not both".into(),
            ))
        }
        (None, None) => {
            return Err(PipelineError::InvalidRequest(
                "one of text or url is required".into(),
            ))
        }
    };

    Ok(VectorizeRequest {
        source,
        user_id,
        filename: body.filename,
    })
}

fn parse_user_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw).map_err(|_| PipelineError::InvalidRequest(format!("bad user id: {raw}")))
}
