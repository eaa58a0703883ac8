use crate::bridge::BridgeError;
use crate::broker::PublishError;
use crate::store::StoreError;
use http::StatusCode;
use hyper::Response;
use serde::Serialize;
use shared::http::{ResponseBody, full_body};
use thiserror::Error;

/// Errors that stop the gateway from starting or serving
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ValidationError),

    #[error("reference store error: {0}")]
    Store(#[from] StoreError),

    #[error("message broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported to the caller of the forecast endpoint.
///
/// Every variant has a stable machine readable code which is sent in the
/// `error` field of the response body.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    #[error("The supplied forecast method is not supported by this module")]
    UnsupportedForecastMethod,

    #[error("The request did not contain any area keys. Please check your request")]
    NoAreaKeys,

    #[error("At least one of the area keys you provided is not valid. Please check your request")]
    InvalidAreaKeys,

    #[error(
        "At least one of the consumer groups you provided is not valid. Please check your request"
    )]
    InvalidConsumerGroups,

    #[error("The calculation module did not respond in time")]
    CalculationModuleSlow,

    #[error("During the handling of the request an unexpected error occurred")]
    InternalError,

    #[error(
        "The accessed resource requires authorization, however the request did not contain valid authorization information"
    )]
    MissingAuthorizationInformation,

    #[error("The authorization was successful, but the resource is protected by a scope which was not included in the authorization information")]
    InsufficientScope,
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::UnsupportedForecastMethod => "UNSUPPORTED_FORECAST_METHOD",
            RequestError::NoAreaKeys => "NO_AREA_KEYS",
            RequestError::InvalidAreaKeys => "INVALID_AREA_KEYS",
            RequestError::InvalidConsumerGroups => "INVALID_CONSUMER_GROUPS",
            RequestError::CalculationModuleSlow => "CALCULATION_MODULE_SLOW",
            RequestError::InternalError => "INTERNAL_ERROR",
            RequestError::MissingAuthorizationInformation => "MISSING_AUTHORIZATION_INFORMATION",
            RequestError::InsufficientScope => "INSUFFICIENT_SCOPE",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            RequestError::UnsupportedForecastMethod => "Unsupported Forecast Method",
            RequestError::NoAreaKeys => "No Area Keys",
            RequestError::InvalidAreaKeys => "Invalid Area Keys",
            RequestError::InvalidConsumerGroups => "Invalid Consumer Groups",
            RequestError::CalculationModuleSlow => "Calculation Module Slow",
            RequestError::InternalError => "Internal Error",
            RequestError::MissingAuthorizationInformation => "Unauthorized",
            RequestError::InsufficientScope => "Insufficient Scope",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::UnsupportedForecastMethod => StatusCode::NOT_FOUND,
            RequestError::NoAreaKeys => StatusCode::BAD_REQUEST,
            RequestError::InvalidAreaKeys | RequestError::InvalidConsumerGroups => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RequestError::CalculationModuleSlow => StatusCode::GATEWAY_TIMEOUT,
            RequestError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            RequestError::MissingAuthorizationInformation => StatusCode::UNAUTHORIZED,
            RequestError::InsufficientScope => StatusCode::FORBIDDEN,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let status = self.status();
        ErrorBody {
            http_code: status.as_u16(),
            http_error: status.canonical_reason().unwrap_or_default(),
            error: self.code(),
            error_name: self.title(),
            error_description: self.to_string(),
        }
    }

    pub fn into_response(self) -> Response<ResponseBody> {
        // The body only holds static strings, serialization cannot fail.
        let body = serde_json::to_vec(&self.body()).unwrap_or_default();

        Response::builder()
            .status(self.status())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(full_body(body))
            .unwrap_or_else(|_| shared::http::make_error_response(self.status()))
    }
}

/// Error document sent with every rejected forecast request
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub http_code: u16,
    pub http_error: &'static str,
    pub error: &'static str,
    pub error_name: &'static str,
    pub error_description: String,
}

impl From<StoreError> for RequestError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Reference store query failed");
        RequestError::InternalError
    }
}

impl From<PublishError> for RequestError {
    fn from(err: PublishError) -> Self {
        tracing::error!(error = %err, "Could not publish forecast request");
        RequestError::InternalError
    }
}

impl From<BridgeError> for RequestError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout { .. } => RequestError::CalculationModuleSlow,
            BridgeError::Publish(e) => e.into(),
            other => {
                tracing::error!(error = %other, "Forecast request could not be bridged");
                RequestError::InternalError
            }
        }
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(error = %err, "Could not serialize forecast request");
        RequestError::InternalError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn statuses_follow_taxonomy() {
        let cases = [
            (RequestError::UnsupportedForecastMethod, 404),
            (RequestError::NoAreaKeys, 400),
            (RequestError::InvalidAreaKeys, 422),
            (RequestError::InvalidConsumerGroups, 422),
            (RequestError::CalculationModuleSlow, 504),
            (RequestError::InternalError, 500),
            (RequestError::MissingAuthorizationInformation, 401),
            (RequestError::InsufficientScope, 403),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{}", err.code());
        }
    }

    #[test]
    fn timeout_maps_to_calculation_module_slow() {
        let err: RequestError = BridgeError::Timeout {
            correlation_id: "abc".into(),
        }
        .into();
        assert_eq!(err, RequestError::CalculationModuleSlow);
    }

    #[test]
    fn infrastructure_failures_map_to_internal_error() {
        let cases: Vec<RequestError> = vec![
            StoreError::Pool(deadpool_postgres::PoolError::Closed).into(),
            PublishError::Nacked.into(),
            BridgeError::Publish(PublishError::Nacked).into(),
            BridgeError::DuplicateToken("abc".into()).into(),
            BridgeError::ReplyDropped.into(),
        ];
        for err in cases {
            assert_eq!(err, RequestError::InternalError);
        }
    }

    #[tokio::test]
    async fn response_body_has_all_fields() {
        let response = RequestError::InvalidAreaKeys.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["httpCode"], 422);
        assert_eq!(body["httpError"], "Unprocessable Entity");
        assert_eq!(body["error"], "INVALID_AREA_KEYS");
        assert_eq!(body["errorName"], "Invalid Area Keys");
        assert!(
            body["errorDescription"]
                .as_str()
                .unwrap()
                .contains("area keys")
        );
    }
}
