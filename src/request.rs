//! Request payload decoding keyed on `Content-Type`
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::HashMap;
use url::form_urlencoded;

use crate::error::Fault;

/// Largest body read into memory by [`GiveRequest`] (16 MiB).
const BODY_LIMIT_BYTES: usize = 16 << 20;

const APPLICATION_JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Flat parameter map built from the query string and form fields.
pub type FormParams = HashMap<String, String>;

/// Payload of a request, shaped by its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRequest {
    /// JSON body. `Value::Null` when the body did not parse.
    Structured(Value),
    /// Query and form parameters.
    Form(FormParams),
    /// Body of an unrecognized content type, untouched.
    Raw(Bytes),
}

/// Outcome of [`decode_request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// CORS preflight. The web server answers it; nothing is decoded.
    Preflight,
    Request(DecodedRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    UrlEncoded,
    Multipart,
    Other,
}

/// Lowercased media type without parameters (`"Text/HTML; charset=x"` -> `"text/html"`).
pub fn media_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

pub fn classify_content_type(content_type: &str) -> BodyKind {
    match media_type(content_type).as_str() {
        APPLICATION_JSON => BodyKind::Json,
        FORM_URLENCODED => BodyKind::UrlEncoded,
        MULTIPART_FORM_DATA => BodyKind::Multipart,
        _ => BodyKind::Other,
    }
}

/// Picks the payload representation for a request.
///
/// `params` must already hold the parsed query and form fields; it is
/// returned as is for form bodies and for requests without a content type.
pub fn decode_request(
    method: &Method,
    content_type: Option<&str>,
    body: Bytes,
    params: FormParams,
) -> Decoded {
    if method == Method::OPTIONS {
        return Decoded::Preflight;
    }

    let Some(content_type) = content_type else {
        return Decoded::Request(DecodedRequest::Form(params));
    };

    let decoded = match classify_content_type(content_type) {
        BodyKind::Json => {
            DecodedRequest::Structured(serde_json::from_slice(&body).unwrap_or(Value::Null))
        },
        BodyKind::UrlEncoded | BodyKind::Multipart => DecodedRequest::Form(params),
        BodyKind::Other => {
            tracing::warn!(content_type, "Content-type not recognized: got '{}'", content_type);
            DecodedRequest::Raw(body)
        },
    };
    Decoded::Request(decoded)
}

/// Pairs of an `application/x-www-form-urlencoded` string. Later keys win.
pub fn parse_urlencoded(input: &[u8]) -> FormParams {
    form_urlencoded::parse(input).into_owned().collect()
}

/// Extractor yielding the decoded payload of any request.
///
/// Form parameters are the query string pairs overlaid with the body fields
/// of urlencoded and multipart bodies. Uploaded files are not part of them.
/// `OPTIONS` requests are answered with an empty 200 before the handler runs.
#[derive(Debug, Clone, PartialEq)]
pub struct GiveRequest(pub DecodedRequest);

#[async_trait]
impl<S> FromRequest<S> for GiveRequest
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = request.method().clone();
        if method == Method::OPTIONS {
            return Err(StatusCode::OK.into_response());
        }

        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
        let mut params = parse_urlencoded(request.uri().query().unwrap_or_default().as_bytes());

        let body = match content_type.as_deref().map(classify_content_type) {
            None => Bytes::new(),
            Some(BodyKind::Multipart) => {
                params.extend(read_multipart_fields(request, state).await?);
                Bytes::new()
            },
            Some(BodyKind::UrlEncoded) => {
                let bytes = read_body(request).await?;
                params.extend(parse_urlencoded(&bytes));
                bytes
            },
            Some(BodyKind::Json | BodyKind::Other) => read_body(request).await?,
        };

        match decode_request(&method, content_type.as_deref(), body, params) {
            Decoded::Preflight => Err(StatusCode::OK.into_response()),
            Decoded::Request(decoded) => Ok(GiveRequest(decoded)),
        }
    }
}

async fn read_body(request: Request) -> Result<Bytes, Response> {
    axum::body::to_bytes(request.into_body(), BODY_LIMIT_BYTES)
        .await
        .map_err(|e| Fault::internal(format!("Failed to read request body: {e}")).into_response())
}

async fn read_multipart_fields<S>(request: Request, state: &S) -> Result<FormParams, Response>
where
    S: Send + Sync,
{
    let multipart_error =
        |e: &dyn std::fmt::Display| Fault::internal(format!("Malformed multipart body: {e}"));

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| multipart_error(&e).into_response())?;

    let mut fields = FormParams::new();
    while let Some(field) =
        multipart.next_field().await.map_err(|e| multipart_error(&e).into_response())?
    {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field.text().await.map_err(|e| multipart_error(&e).into_response())?;
        fields.insert(name, value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> FormParams {
        FormParams::from([("db".to_string(), "hg38".to_string()), ("type".to_string(), "1".to_string())])
    }

    fn decode(content_type: Option<&str>, body: &'static [u8]) -> DecodedRequest {
        match decode_request(&Method::POST, content_type, Bytes::from_static(body), params()) {
            Decoded::Request(decoded) => decoded,
            Decoded::Preflight => panic!("unexpected preflight"),
        }
    }

    #[test]
    fn test_media_type() {
        assert_eq!(media_type("application/json"), "application/json");
        assert_eq!(media_type("Application/JSON; charset=UTF-8"), "application/json");
        assert_eq!(media_type("multipart/form-data;boundary=xyz"), "multipart/form-data");
        assert_eq!(media_type(""), "");
    }

    #[test]
    fn test_preflight_short_circuits() {
        let decoded =
            decode_request(&Method::OPTIONS, Some(APPLICATION_JSON), Bytes::new(), params());
        assert_eq!(decoded, Decoded::Preflight);
    }

    #[test]
    fn test_json_body() {
        assert_eq!(
            decode(Some("application/json; charset=utf-8"), br#"{"a":1}"#),
            DecodedRequest::Structured(json!({ "a": 1 }))
        );
    }

    #[test]
    fn test_malformed_json_is_null() {
        assert_eq!(decode(Some(APPLICATION_JSON), b"{\"a\":"), DecodedRequest::Structured(Value::Null));
        assert_eq!(decode(Some(APPLICATION_JSON), b""), DecodedRequest::Structured(Value::Null));
    }

    #[test]
    fn test_form_types_return_params_unmodified() {
        assert_eq!(decode(Some(FORM_URLENCODED), b"ignored=1"), DecodedRequest::Form(params()));
        assert_eq!(
            decode(Some("multipart/form-data; boundary=abc"), b"--abc--"),
            DecodedRequest::Form(params())
        );
    }

    #[test]
    fn test_missing_content_type_returns_params() {
        assert_eq!(decode(None, b"whatever"), DecodedRequest::Form(params()));
    }

    #[test]
    fn test_unknown_content_type_returns_raw_body() {
        let decoded = decode(Some("text/plain"), b"chr1\t100\t200");
        assert_eq!(decoded, DecodedRequest::Raw(Bytes::from_static(b"chr1\t100\t200")));
    }

    #[test]
    fn test_parse_urlencoded() {
        let parsed = parse_urlencoded(b"db=hg38&track=knownGene%20v2&db=mm10");
        assert_eq!(parsed.get("db").map(String::as_str), Some("mm10"));
        assert_eq!(parsed.get("track").map(String::as_str), Some("knownGene v2"));
        assert!(parse_urlencoded(b"").is_empty());
    }
}
