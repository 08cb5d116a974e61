//! The fixed block response every interceptor returns instead of forwarding
//! a request: a `403` with an exact, stable `text/plain` body so downstream
//! tooling can reliably detect a safe-chain block.

use rama::http::{HeaderValue, Response, StatusCode, header::CONTENT_TYPE};

const BLOCK_BODY: &str = "Forbidden - blocked by safe-chain";

pub fn blocked_response() -> Response {
    let mut resp = Response::new(BLOCK_BODY.into());
    *resp.status_mut() = StatusCode::FORBIDDEN;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_response_shape() {
        let resp = blocked_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }
}
