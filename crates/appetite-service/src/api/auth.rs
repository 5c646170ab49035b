//! Tenant claim forwarded by the upstream gateway.
//!
//! The gateway authenticates the caller and sets `x-tenant-id`. Every tenant
//! route checks that claim against the `:tenant_id` path segment before any
//! handler code runs.

use crate::error::ApiError;
use appetite_core::AppetiteError;
use axum::async_trait;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use std::collections::HashMap;
use tracing::warn;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Actor recorded when the gateway does not forward one.
pub const DEFAULT_ACTOR: &str = "api";

/// The authorized tenant for a request, plus the acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub tenant_id: String,
    pub actor_id: String,
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Compare the claimed tenant with the one named in the path.
pub fn authorize(claimed: &str, requested: &str) -> Result<(), ApiError> {
    if claimed == requested {
        return Ok(());
    }
    warn!(
        claimed_tenant = claimed,
        requested_tenant = requested,
        "Rejected cross-tenant request"
    );
    Err(ApiError::Core(AppetiteError::CrossTenant {
        claimed: claimed.to_string(),
        requested: requested.to_string(),
    }))
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claimed = header_value(parts, TENANT_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("{TENANT_HEADER} header is required")))?;

        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        let requested = params
            .get("tenant_id")
            .ok_or_else(|| ApiError::BadRequest("route has no tenant segment".to_string()))?;

        authorize(&claimed, requested)?;

        Ok(Self {
            tenant_id: claimed,
            actor_id: header_value(parts, ACTOR_HEADER).unwrap_or_else(|| DEFAULT_ACTOR.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn matching_tenant_is_authorized() {
        assert!(authorize("acme", "acme").is_ok());
    }

    #[test]
    fn mismatched_tenant_is_forbidden() {
        let err = authorize("acme", "globex").unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }
}
