use axum::{body::Body, http::Request, middleware::Next, response::Response};
use nanoid::nanoid;

use crate::state::RequestId;

/// Callers may supply their own X-Request-Id; it becomes the correlation id
/// carried through the log to the worker and the provider.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("X-Request-Id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 64)
        .map(str::to_string)
        .unwrap_or_else(|| format!("req_{}", nanoid!(16)));

    req.extensions_mut().insert(RequestId(request_id.clone()));
    let mut resp = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        resp.headers_mut().insert("X-Request-Id", value);
    }
    resp
}
