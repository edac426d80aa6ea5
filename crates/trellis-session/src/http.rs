//! Seam to the HTTP layer.
//!
//! The HTTP layer owns cookie and query-parameter handling. The engine only
//! reads the identifier a request asked for and tells the response which
//! identifier to issue.

/// What the engine needs from an incoming request.
pub trait SessionRequest {
    /// Session identifier carried by the request (cookie or query parameter).
    fn requested_session_id(&self) -> Option<&str>;

    /// Web application the request is addressed to.
    fn context_path(&self) -> &str {
        ""
    }
}

/// What the engine needs from an outgoing response.
pub trait SessionResponse {
    /// Issue `id` to the client as its session identifier.
    fn set_session_id(&mut self, id: &str);
}
