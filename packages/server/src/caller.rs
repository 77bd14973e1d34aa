//! Caller identity from gateway headers
//!
//! An upstream gateway authenticates the user and forwards:
//!
//! - `x-user-id` - user UUID; absent means anonymous
//! - `x-user-permissions` - comma-separated permission codes
//! - `x-superuser` - `true` / `1` grants every permission

use axum::http::HeaderMap;
use contribution_plan_core::services::Caller;
use uuid::Uuid;

use crate::HttpError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const PERMISSIONS_HEADER: &str = "x-user-permissions";
pub const SUPERUSER_HEADER: &str = "x-superuser";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, HttpError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|e| HttpError::invalid_header(name, e.to_string()))
        })
        .transpose()
}

pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, HttpError> {
    let user_id = header_str(headers, USER_ID_HEADER)?
        .filter(|value| !value.is_empty())
        .map(|value| {
            Uuid::parse_str(value).map_err(|e| HttpError::invalid_header(USER_ID_HEADER, e.to_string()))
        })
        .transpose()?;

    let permissions = header_str(headers, PERMISSIONS_HEADER)?
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let is_superuser = match header_str(headers, SUPERUSER_HEADER)? {
        None => false,
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "" | "0" | "false" | "no" => false,
            other => {
                return Err(HttpError::invalid_header(
                    SUPERUSER_HEADER,
                    format!("expected a boolean, got '{}'", other),
                ))
            }
        },
    };

    Ok(Caller {
        user_id,
        is_superuser,
        permissions,
    })
}
