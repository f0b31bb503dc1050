use crate::config::Config;
use crate::error::Error;
use crate::services::analyzer::FrameAnalyzer;
use crate::services::risk::RiskRecomputeClient;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::info;
use serde::Serialize;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub mod cv_ingest_controller;
pub mod webhook_controller;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Arc<PgPool>,
    pub config: Arc<Config>,
    pub analyzer: Arc<dyn FrameAnalyzer>,
    pub risk: Arc<RiskRecomputeClient>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::BAD_REQUEST.as_u16(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::UNAUTHORIZED.as_u16(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::NOT_FOUND.as_u16(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::BAD_GATEWAY.as_u16(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Authentication(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::UNAUTHORIZED.as_u16(),
            },
            Error::NotFound(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            },
            Error::AlreadyExists(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::CONFLICT.as_u16(),
            },
            Error::Validation(_) | Error::Api(_) | Error::Config(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::BAD_REQUEST.as_u16(),
            },
            Error::Analyzer(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::BAD_GATEWAY.as_u16(),
            },
            _ => ApiError {
                message: err.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            },
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

pub struct RestApi {
    config: Arc<Config>,
    db_pool: Arc<PgPool>,
    analyzer: Arc<dyn FrameAnalyzer>,
    risk: Arc<RiskRecomputeClient>,
}

impl RestApi {
    pub fn new(
        config: Arc<Config>,
        db_pool: Arc<PgPool>,
        analyzer: Arc<dyn FrameAnalyzer>,
        risk: Arc<RiskRecomputeClient>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            db_pool,
            analyzer,
            risk,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let state = AppState {
            db_pool: Arc::clone(&self.db_pool),
            config: Arc::clone(&self.config),
            analyzer: Arc::clone(&self.analyzer),
            risk: Arc::clone(&self.risk),
        };

        // Allow dashboard origins and preflight requests
        use std::time::Duration;
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        let app = Router::new()
            .route("/health", get(health))
            .merge(webhook_controller::create_router(
                self.config.webhook.max_body_bytes,
            ))
            .merge(cv_ingest_controller::create_router())
            .layer(cors)
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", self.config.api.address, self.config.api.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid API address: {}", e)))?;

        info!("REST API listening on {}", addr);

        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await
            .map_err(|e| Error::Api(format!("API server failed: {}", e)))?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    database: bool,
}

/// Liveness probe; does not require authentication
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = sqlx::query("SELECT 1").execute(&*state.db_pool).await.is_ok();
    Json(HealthResponse { ok: true, database })
}
