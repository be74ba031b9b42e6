//! The admin surface's structured error model.

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Every failure class the surface can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestErrorKind {
    /// The HTTP method is not supported on this resource.
    BadMethod,
    /// The negotiated response format is not supported.
    UnsupportedMarshal,
    /// The posted body format is not supported.
    UnsupportedUnmarshal,
    JsonMarshal,
    JsonUnmarshal,
    XmlMarshal,
    XmlUnmarshal,
    Internal,
    NotFound,
}

impl RestErrorKind {
    /// Stable numeric code carried in the response body.
    pub fn error_code(self) -> u32 {
        match self {
            Self::BadMethod => 1,
            Self::UnsupportedMarshal => 2,
            Self::UnsupportedUnmarshal => 3,
            Self::JsonMarshal => 4,
            Self::JsonUnmarshal => 5,
            Self::XmlMarshal => 6,
            Self::XmlUnmarshal => 7,
            Self::Internal => 8,
            Self::NotFound => 9,
        }
    }

    /// The HTTP status this kind maps to.
    pub fn http_code(self) -> u16 {
        match self {
            Self::BadMethod => 405,
            Self::UnsupportedMarshal => 406,
            Self::UnsupportedUnmarshal => 415,
            Self::JsonUnmarshal | Self::XmlUnmarshal => 400,
            Self::JsonMarshal | Self::XmlMarshal | Self::Internal => 500,
            Self::NotFound => 404,
        }
    }
}

/// The error body served to clients.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[error("rest error {error_code} (http {http_code}): {message}")]
pub struct RestError {
    pub error_code: u32,
    pub http_code: u16,
    pub message: String,
}

impl RestError {
    pub fn new(kind: RestErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_code: kind.error_code(),
            http_code: kind.http_code(),
            message: message.into(),
        }
    }
}
