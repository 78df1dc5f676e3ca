//! Response construction for the gateway.

use axum::body::Body;
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::Response;
use tracing::error;

use super::{Peer, Rejection};

/// Writes responses for one request.
///
/// Every response carries the configured content type; a 405 also carries
/// the configured methods in `Allow`.
#[derive(Debug, Clone, Copy)]
pub struct ResponseStream<'a> {
    mime: &'a HeaderValue,
    allow: &'a HeaderValue,
    peer: Option<&'a Peer>,
    uri: &'a Uri,
}

impl<'a> ResponseStream<'a> {
    /// Writer for the request at `uri`, received from `peer`.
    #[must_use]
    pub fn new(
        mime: &'a HeaderValue,
        allow: &'a HeaderValue,
        peer: Option<&'a Peer>,
        uri: &'a Uri,
    ) -> Self {
        Self {
            mime,
            allow,
            peer,
            uri,
        }
    }

    /// Response with `status` and `body`.
    #[must_use]
    pub fn write(&self, status: StatusCode, body: Body) -> Response {
        let mut response = Response::new(body);
        *response.status_mut() = status;

        let headers = response.headers_mut();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            headers.insert(ALLOW, self.allow.clone());
        }
        headers.insert(CONTENT_TYPE, self.mime.clone());
        response
    }

    /// Log the rejected request and answer with its status and message.
    #[must_use]
    pub fn error(&self, rejection: &Rejection) -> Response {
        let address = self.peer.map(|p| p.addr.to_string()).unwrap_or_default();
        let client = self
            .peer
            .and_then(|p| p.identity.as_ref())
            .map_or("", |id| id.display_name.as_str());

        error!(
            address = %address,
            client = %client,
            uri = %self.uri,
            status = rejection.status().as_u16(),
            reason = %rejection.message(),
            "invalid request"
        );

        self.write(rejection.status(), Body::from(rejection.message()))
    }
}
