//! Scope check on the identity headers set by the authenticating proxy.

use crate::config::AuthorizationConfig;
use crate::errors::RequestError;
use http::HeaderMap;

pub const USER_HEADER: &str = "x-authenticated-user";
pub const GROUPS_HEADER: &str = "x-authenticated-groups";

/// Allows the request when no authorization is configured, or when the caller
/// is identified and a member of the required group.
pub fn authorize(
    headers: &HeaderMap,
    config: Option<&AuthorizationConfig>,
) -> Result<(), RequestError> {
    let Some(config) = config else {
        return Ok(());
    };

    let groups = non_blank_header(headers, GROUPS_HEADER).ok_or_else(|| {
        tracing::warn!(reason = "groups-missing", "Unauthorized request blocked");
        RequestError::MissingAuthorizationInformation
    })?;
    if non_blank_header(headers, USER_HEADER).is_none() {
        tracing::warn!(reason = "username-missing", "Unauthorized request blocked");
        return Err(RequestError::MissingAuthorizationInformation);
    }

    if !groups
        .split(',')
        .any(|group| group.trim() == config.required_group)
    {
        tracing::warn!(reason = "group-incorrect", "Forbidden request blocked");
        return Err(RequestError::InsufficientScope);
    }

    Ok(())
}

fn non_blank_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
}
