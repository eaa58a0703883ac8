//! The `GET /{model}` forecast endpoint.

use crate::auth::authorize;
use crate::bridge::Bridge;
use crate::config::AuthorizationConfig;
use crate::correlation::CorrelationToken;
use crate::errors::RequestError;
use crate::metrics_defs::{FORECAST_REQUEST_DURATION, FORECAST_REQUESTS};
use crate::model::{ForecastModel, ForecastRequest};
use crate::validator::IdentifierValidator;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::{HeaderValue, Method, StatusCode};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::{ResponseBody, full_body, make_error_response};
use shared::{counter, histogram};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CALCULATION_TIME_HEADER: &str = "x-calculation-time";

const KEY_PARAM: &str = "key";
const CONSUMER_GROUP_PARAM: &str = "consumerGroup";

#[derive(Clone)]
pub struct ForecastService {
    inner: Arc<Inner>,
}

struct Inner {
    validator: IdentifierValidator,
    bridge: Bridge,
    authorization: Option<AuthorizationConfig>,
    forecast_size: u32,
}

/// Repeated query parameters of a forecast request, in the order given.
#[derive(Debug, Default, PartialEq)]
struct ForecastQuery {
    keys: Vec<String>,
    consumer_groups: Vec<String>,
}

impl ForecastQuery {
    fn parse(query: Option<&str>) -> Self {
        let mut parsed = ForecastQuery::default();
        for (name, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match name.as_ref() {
                KEY_PARAM => parsed.keys.push(value.into_owned()),
                CONSUMER_GROUP_PARAM => parsed.consumer_groups.push(value.into_owned()),
                _ => {}
            }
        }
        parsed
    }
}

impl ForecastService {
    pub fn new(
        validator: IdentifierValidator,
        bridge: Bridge,
        authorization: Option<AuthorizationConfig>,
        forecast_size: u32,
    ) -> Self {
        ForecastService {
            inner: Arc::new(Inner {
                validator,
                bridge,
                authorization,
                forecast_size,
            }),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody> {
        let started = Instant::now();
        let (parts, _) = req.into_parts();

        if parts.method != Method::GET {
            return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }
        let Some(model) = model_segment(parts.uri.path()) else {
            return make_error_response(StatusCode::NOT_FOUND);
        };

        let token = CorrelationToken::generate();
        let (mut response, outcome) = match self.forecast(&parts, model, &token).await {
            Ok(response) => (response, "success"),
            Err(e) => {
                tracing::warn!(correlation_id = %token, error = e.code(), "Forecast request rejected");
                (e.into_response(), e.code())
            }
        };

        if let Ok(value) = HeaderValue::from_str(token.as_str()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        counter!(FORECAST_REQUESTS, "outcome" => outcome).increment(1);
        histogram!(FORECAST_REQUEST_DURATION).record(started.elapsed().as_secs_f64());
        response
    }

    async fn forecast(
        &self,
        parts: &Parts,
        model: &str,
        token: &CorrelationToken,
    ) -> Result<Response<ResponseBody>, RequestError> {
        let inner = &self.inner;
        authorize(&parts.headers, inner.authorization.as_ref())?;

        let model: ForecastModel = model
            .parse()
            .map_err(|_| RequestError::UnsupportedForecastMethod)?;
        let query = ForecastQuery::parse(parts.uri.query());

        inner.validator.validate_area_keys(&query.keys).await?;
        let consumer_groups = inner
            .validator
            .resolve_consumer_groups(query.consumer_groups)
            .await?;

        let request = ForecastRequest {
            model,
            keys: query.keys,
            consumer_groups,
            forecasted_years: inner.forecast_size,
        };
        let body = serde_json::to_vec(&request)?;

        tracing::info!(
            correlation_id = %token,
            %model,
            keys = ?request.keys,
            "Requesting forecast"
        );
        let reply = inner.bridge.request(token.as_str(), body).await?;

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .header(
                CALCULATION_TIME_HEADER,
                reply.elapsed.as_secs_f64().to_string(),
            )
            .body(full_body(reply.payload))
            .map_err(|e| {
                tracing::error!(error = %e, "Could not build forecast response");
                RequestError::InternalError
            })
    }
}

/// The model token of a `/{model}` path. Any other shape has no model.
fn model_segment(path: &str) -> Option<&str> {
    let segment = path.strip_prefix('/')?;
    match segment.is_empty() || segment.contains('/') {
        true => None,
        false => Some(segment),
    }
}

impl Service<Request<Incoming>> for ForecastService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}
