//! The HTTP surface: method dispatch, path walking, and content
//! negotiation.
//!
//! Single path root `/`. `GET /v{n}/...` locates a resource by walking
//! the block index; `POST /v{n}` (version root only) appends a form-posted
//! entry to the tip block. Everything else is a structured 405. The
//! response format follows the `Accept` header; errors serialize in the
//! negotiated format with the HTTP status drawn from the error kind.

use {
    crate::{
        error::{RestError, RestErrorKind},
        store::BlockStore,
    },
    axum::{
        body::Body,
        extract::{Form, FromRequest, Path, Request, State},
        http::{header, HeaderMap, Method, StatusCode},
        response::Response,
        routing::any,
        Router,
    },
    fedchain_ledger::PlainEntry,
    log::{debug, info},
    serde::{Deserialize, Serialize},
    std::{net::SocketAddr, sync::Arc},
    tower_http::catch_panic::CatchPanicLayer,
};

/// Negotiated response serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Json,
    Xml,
    Html,
}

/// Build the admin router over `store`.
pub fn router(store: Arc<BlockStore>) -> Router {
    Router::new()
        .route("/:version", any(version_root))
        .route("/:version/*path", any(resource_path))
        .fallback(unknown_path)
        // A panicking handler costs the request a 500, not the process.
        .layer(CatchPanicLayer::new())
        .with_state(store)
}

/// Bind `addr` and serve the admin surface until the process exits.
pub async fn serve(addr: SocketAddr, store: Arc<BlockStore>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("admin surface listening on {}", listener.local_addr()?);
    axum::serve(listener, router(store)).await
}

// ── Handlers ────────────────────────────────────────────────────────────────

async fn version_root(
    State(store): State<Arc<BlockStore>>,
    Path(version): Path<String>,
    req: Request,
) -> Response {
    let format = accept_format(req.headers());
    if !is_version(&version) {
        return rest_error(format, RestErrorKind::NotFound, format!("unknown path /{version}"));
    }
    let method = req.method().clone();
    if method == Method::GET {
        respond(format, StatusCode::OK, &store.all())
    } else if method == Method::POST {
        post_entry(store, format, req).await
    } else {
        rest_error(
            format,
            RestErrorKind::BadMethod,
            format!("The HTTP {method} method is not supported"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct PostForm {
    #[serde(default)]
    format: String,
    #[serde(default)]
    data: String,
}

/// `POST /v{n}`: parse the form-carried entry, stamp it, append it to
/// the tip block, and echo it back.
async fn post_entry(store: Arc<BlockStore>, format: Format, req: Request) -> Response {
    let Form(form) = match Form::<PostForm>::from_request(req, &()).await {
        Ok(form) => form,
        Err(err) => {
            return rest_error(format, RestErrorKind::Internal, format!("unreadable form: {err}"))
        }
    };

    let mut entry: PlainEntry = match form.format.as_str() {
        "" | "json" => match serde_json::from_str(&form.data) {
            Ok(entry) => entry,
            Err(err) => return rest_error(format, RestErrorKind::JsonUnmarshal, err.to_string()),
        },
        "xml" => match quick_xml::de::from_str(&form.data) {
            Ok(entry) => entry,
            Err(err) => return rest_error(format, RestErrorKind::XmlUnmarshal, err.to_string()),
        },
        other => {
            return rest_error(
                format,
                RestErrorKind::UnsupportedUnmarshal,
                format!(r#"The format "{other}" is not supported"#),
            )
        }
    };

    entry.time_stamp = unix_now();
    store.append_to_tip(entry.clone());
    debug!("appended entry (type {}) to tip block", entry.entry_type);
    respond(format, StatusCode::OK, &entry)
}

/// `GET /v{n}/{block}[/entries[/{i}]]`: walk the block index.
async fn resource_path(
    State(store): State<Arc<BlockStore>>,
    Path((version, path)): Path<(String, String)>,
    req: Request,
) -> Response {
    let format = accept_format(req.headers());
    if !is_version(&version) {
        return rest_error(format, RestErrorKind::NotFound, format!("unknown path /{version}"));
    }
    let method = req.method().clone();
    if method == Method::POST {
        return rest_error(
            format,
            RestErrorKind::BadMethod,
            "POST can only be used in the root context: /v1",
        );
    }
    if method != Method::GET {
        return rest_error(
            format,
            RestErrorKind::BadMethod,
            format!("The HTTP {method} method is not supported"),
        );
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let block = segments
        .first()
        .and_then(|s| s.parse::<u64>().ok())
        .and_then(|index| store.get(index));
    let Some(block) = block else {
        return rest_error(format, RestErrorKind::NotFound, format!("unknown path /{path}"));
    };

    match segments.as_slice() {
        [_] => respond(format, StatusCode::OK, &block),
        [_, "entries"] => respond(format, StatusCode::OK, &block.entries),
        [_, "entries", index] => {
            let entry = index.parse::<usize>().ok().and_then(|i| block.entries.get(i));
            match entry {
                Some(entry) => respond(format, StatusCode::OK, entry),
                None => {
                    rest_error(format, RestErrorKind::NotFound, format!("unknown path /{path}"))
                }
            }
        }
        _ => rest_error(format, RestErrorKind::NotFound, format!("unknown path /{path}")),
    }
}

async fn unknown_path(req: Request) -> Response {
    let format = accept_format(req.headers());
    rest_error(format, RestErrorKind::NotFound, format!("unknown path {}", req.uri().path()))
}

// ── Negotiation and serialization ───────────────────────────────────────────

/// `v` followed by a version number.
fn is_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

fn accept_format(headers: &HeaderMap) -> Format {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if accept.contains("text/html") {
        Format::Html
    } else if accept.contains("application/xml") || accept.contains("text/xml") {
        Format::Xml
    } else if accept.contains("text/plain") {
        Format::Text
    } else {
        Format::Json
    }
}

fn encode<T: Serialize>(format: Format, payload: &T) -> Result<(&'static str, Vec<u8>), RestError> {
    match format {
        Format::Json => serde_json::to_vec(payload)
            .map(|body| ("application/json; charset=utf-8", body))
            .map_err(|err| RestError::new(RestErrorKind::JsonMarshal, err.to_string())),
        Format::Text => serde_json::to_vec_pretty(payload)
            .map(|body| ("text/plain; charset=utf-8", body))
            .map_err(|err| RestError::new(RestErrorKind::JsonMarshal, err.to_string())),
        Format::Xml => quick_xml::se::to_string(payload)
            .map(|body| ("application/xml; charset=utf-8", body.into_bytes()))
            .map_err(|err| RestError::new(RestErrorKind::XmlMarshal, err.to_string())),
        Format::Html => {
            let json = serde_json::to_string(payload)
                .map_err(|err| RestError::new(RestErrorKind::JsonMarshal, err.to_string()))?;
            let page = format!(
                "<script>\nfunction tree(data) {{\n    if (typeof(data) == 'object') {{\n        \
                 document.write('<ul>');\n        for (var i in data) {{\n            \
                 document.write('<li>' + i);\n            tree(data[i]);\n        }}\n        \
                 document.write('</ul>');\n    }} else {{\n        \
                 document.write(' => ' + data);\n    }}\n}}</script><body onload='tree({json})'></body>"
            );
            Ok(("text/html; charset=utf-8", page.into_bytes()))
        }
    }
}

fn build_response(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .expect("static response parts are valid")
}

fn respond<T: Serialize>(format: Format, status: StatusCode, payload: &T) -> Response {
    match encode(format, payload) {
        Ok((content_type, body)) => build_response(status, content_type, body),
        Err(err) => {
            // The payload would not serialize; report that instead, as
            // JSON so the error itself cannot fail the same way.
            let status = StatusCode::from_u16(err.http_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = serde_json::to_vec(&err).unwrap_or_default();
            build_response(status, "application/json; charset=utf-8", body)
        }
    }
}

fn rest_error(format: Format, kind: RestErrorKind, message: impl Into<String>) -> Response {
    let err = RestError::new(kind, message);
    let status =
        StatusCode::from_u16(err.http_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    respond(format, status, &err)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
