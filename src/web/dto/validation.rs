//! Validation utilities for web API DTOs.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::catalog::validate_entry_name;
use crate::web::error::ApiError;

/// A JSON extractor that validates the request body.
///
/// The body is deserialized as JSON and then checked with
/// [`Validate::validate`]. Failures become a `VALIDATION_ERROR` response with
/// field-level details.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e)))?;

        value.validate().map_err(ApiError::from_validation_errors)?;

        Ok(ValidatedJson(value))
    }
}

/// Validate a folder or file display name.
pub fn entry_name(value: &str) -> Result<(), ValidationError> {
    validate_entry_name(value).map_err(|e| {
        ValidationError::new("entry_name").with_message(e.to_string().into())
    })
}

/// Validate an entity ID reference: non-empty, no whitespace or control characters.
pub fn entity_id(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.len() > 64 || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::new("entity_id").with_message("Must be a valid ID".into()));
    }
    Ok(())
}

/// Run `check` on `value` when present, recording a failure under `field`.
pub(crate) fn check_optional(
    errors: &mut ValidationErrors,
    field: &'static str,
    value: Option<&str>,
    check: fn(&str) -> Result<(), ValidationError>,
) {
    if let Some(value) = value {
        if let Err(e) = check(value) {
            errors.add(field, e);
        }
    }
}
