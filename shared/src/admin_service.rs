use crate::http::{ResponseBody, full_body, make_error_response};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::{Ready, ready};
use std::sync::Arc;

/// Something the /ready endpoint can ask whether the process may take traffic.
pub trait ReadinessCheck: Send + Sync {
    fn is_ready(&self) -> bool;
}

impl<F> ReadinessCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_ready(&self) -> bool {
        self()
    }
}

/// Serves `/health` (process is up) and `/ready` (dependencies are connected).
#[derive(Clone)]
pub struct AdminService {
    readiness: Arc<dyn ReadinessCheck>,
}

impl AdminService {
    pub fn new(readiness: Arc<dyn ReadinessCheck>) -> Self {
        Self { readiness }
    }

    fn respond(&self, path: &str) -> Response<ResponseBody> {
        match path {
            "/health" => Response::new(full_body("ok\n")),
            "/ready" => match self.readiness.is_ready() {
                true => Response::new(full_body("ok\n")),
                false => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            _ => make_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        ready(Ok(self.respond(req.uri().path())))
    }
}
