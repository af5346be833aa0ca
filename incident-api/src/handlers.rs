use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common_auth::{CurrentUser, Role, UserIdentity};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::api_error::{ApiError, ApiResult};
use crate::app_state::AppState;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
}

/// Public view of a user. The provider subject stays internal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserResponse {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub responsible_province: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserIdentity> for UserResponse {
    fn from(user: UserIdentity) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name,
            email: user.email,
            role: user.role,
            responsible_province: user.responsible_province,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub pages: i64,
}

#[derive(Deserialize, Default, Debug)]
pub struct ListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        environment: state.settings().environment.to_string(),
    })
}

pub async fn current_user(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.into())
}

pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<UserListResponse>> {
    let page = params.page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::bad_request("invalid_page", "page must be at least 1"));
    }
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size < 1 {
        return Err(ApiError::bad_request(
            "invalid_page_size",
            "page_size must be at least 1",
        ));
    }
    let page_size = page_size.min(MAX_PAGE_SIZE);

    let offset = (page - 1).saturating_mul(page_size);
    let listed = state.users.list_users(offset, page_size).await?;
    debug!(caller = %caller.id, page, page_size, total = listed.total, "listed users");

    Ok(Json(UserListResponse {
        items: listed.items.into_iter().map(UserResponse::from).collect(),
        total: listed.total,
        page,
        page_size,
        pages: page_count(listed.total, page_size),
    }))
}

fn page_count(total: i64, page_size: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        (total + page_size - 1) / page_size
    }
}
