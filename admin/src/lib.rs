//! Fedchain admin surface.
//!
//! A small RESTful service rooted at `/`: `GET /v1/...` walks the block
//! index, `POST /v1` appends an entry to the tip block. Responses are
//! serialized in the format the client's `Accept` header asks for
//! (plain-text pretty JSON, JSON, XML, or an HTML tree view), and errors
//! carry a structured `{errorCode, httpCode, message}` body in the same
//! negotiated format.

pub mod error;
pub mod server;
pub mod store;

pub use {
    error::{RestError, RestErrorKind},
    server::{router, serve},
    store::BlockStore,
};
