//! Admin Password Reset Action
//!
//! HTTP surface for the admin console's "reset password" action. The new
//! password goes through the reconciliation engine; an optional role change
//! is written to the directory on its own. Neither part blocks the other.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::directory::RoleWriter;
use crate::engine::{ReconciliationEngine, ReconciliationReport};
use crate::error::{DirectoryError, ReconcileError};
use crate::types::Secret;

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<ReconciliationEngine>,
    pub roles: Arc<dyn RoleWriter>,
}

/// Body of `POST /admin/users/:id/password`
#[derive(Debug, Default, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Result of one independently applied part of the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartOutcome {
    Skipped,
    Updated,
    Failed { code: String, message: String },
}

impl PartOutcome {
    fn is_failed(&self) -> bool {
        matches!(self, PartOutcome::Failed { .. })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetPasswordResponse {
    pub user_id: String,
    pub password: PartOutcome,
    pub role: PartOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReconciliationReport>,
}

/// Request-level failures raised before any backend is touched
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Role must not be empty")]
    EmptyRole,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/admin/users/:id/password", post(reset_password))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "admin-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn reconcile_status(err: &ReconcileError) -> StatusCode {
    match err {
        ReconcileError::UserNotFound { .. } => StatusCode::NOT_FOUND,
        err if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn role_failure(err: &DirectoryError) -> PartOutcome {
    let code = match err {
        DirectoryError::NotFound(_) => "user_not_found",
        DirectoryError::Unavailable(_) => "directory_unavailable",
        DirectoryError::Rejected(_) => "role_rejected",
    };
    PartOutcome::Failed {
        code: code.to_string(),
        message: err.to_string(),
    }
}

async fn reset_password(
    State(state): State<AdminState>,
    Path(user_id): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Response, AdminError> {
    let secret = match request.password {
        Some(password) => {
            let secret = Secret::from(password);
            if secret.is_blank() {
                return Err(AdminError::EmptyPassword);
            }
            Some(secret)
        }
        None => None,
    };
    if matches!(request.role.as_deref(), Some(role) if role.trim().is_empty()) {
        return Err(AdminError::EmptyRole);
    }

    let password_part = async {
        match &secret {
            Some(secret) => Some(
                state
                    .engine
                    .reconcile_password_with_report(&user_id, secret)
                    .await,
            ),
            None => None,
        }
    };
    let role_part = async {
        match &request.role {
            Some(role) => Some(state.roles.update_role(&user_id, role).await),
            None => None,
        }
    };
    let (password_result, role_result) = tokio::join!(password_part, role_part);

    let mut status = StatusCode::OK;
    let mut report = None;
    let password = match password_result {
        None => PartOutcome::Skipped,
        Some(Ok(done)) => {
            report = Some(done);
            PartOutcome::Updated
        }
        Some(Err(err)) => {
            status = reconcile_status(&err);
            PartOutcome::Failed {
                code: err.code().to_string(),
                message: err.public_message().to_string(),
            }
        }
    };
    let role = match role_result {
        None => PartOutcome::Skipped,
        Some(Ok(user)) => {
            info!(user_id = %user.id, role = ?user.role, "User role updated");
            PartOutcome::Updated
        }
        Some(Err(err)) => {
            warn!(user_id = %user_id, error = %err, "User role update failed");
            if status == StatusCode::OK {
                status = StatusCode::BAD_GATEWAY;
            }
            role_failure(&err)
        }
    };

    if password.is_failed() || role.is_failed() {
        warn!(user_id = %user_id, status = %status, "Admin password reset incomplete");
    }

    let body = ResetPasswordResponse {
        user_id,
        password,
        role,
        report,
    };
    Ok((status, Json(body)).into_response())
}
