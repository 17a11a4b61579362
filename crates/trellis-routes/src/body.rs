// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Request part parsing: body by content type, query string and headers

use std::collections::BTreeSet;

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Request},
    http::{Extensions, HeaderMap, header::CONTENT_TYPE},
};
use serde_json::{Map, Value};

use crate::{
    error::HttpError,
    files::UploadFile,
    sniff::OCTET_STREAM,
};

/// Content type of multipart uploads
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// A parsed request body
#[derive(Debug, Default)]
pub(crate) struct ParsedBody {
    pub value: Value,
    pub files: Vec<UploadFile>,
    pub array_fields: BTreeSet<String>,
}

/// Accumulates form pairs into a JSON object
///
/// `name[]` and names seen more than once become arrays; everything else stays a string.
#[derive(Debug, Default)]
struct FormFields {
    values: Map<String, Value>,
    arrays: BTreeSet<String>,
}

impl FormFields {
    fn field_name(raw: &str) -> (&str, bool) {
        match raw.strip_suffix("[]") {
            Some(name) => (name, true),
            None => (raw, false),
        }
    }

    fn mark(&mut self, raw: &str) -> String {
        let (name, is_array) = Self::field_name(raw);
        if is_array {
            self.arrays.insert(name.to_string());
        }
        name.to_string()
    }

    fn push(&mut self, raw: &str, value: Value) {
        let name = self.mark(raw);
        let is_array = self.arrays.contains(&name);
        match self.values.remove(&name) {
            Some(Value::Array(mut items)) if is_array => {
                items.push(value);
                self.values.insert(name, Value::Array(items));
            }
            Some(previous) => {
                self.arrays.insert(name.clone());
                self.values.insert(name, Value::Array(vec![previous, value]));
            }
            None if is_array => {
                self.values.insert(name, Value::Array(vec![value]));
            }
            None => {
                self.values.insert(name, value);
            }
        }
    }

    fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

fn pairs_to_value<'a>(pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>) -> Value {
    let mut fields = FormFields::default();
    for (key, value) in pairs {
        fields.push(&key, Value::String(value.into_owned()));
    }
    fields.into_value()
}

/// Query string as an object of strings; repeated keys become arrays
pub(crate) fn parse_query(query: Option<&str>) -> Value {
    pairs_to_value(url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()))
}

/// Headers as an object keyed by lowercase name; repeated headers are comma-joined
pub(crate) fn headers_value(headers: &HeaderMap) -> Value {
    let mut object = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        object.insert(name.as_str().to_string(), Value::String(joined));
    }
    Value::Object(object)
}

/// Essence of the request content type, lowercased and without parameters
pub(crate) fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
        .filter(|essence| !essence.is_empty())
}

/// Parse a request body according to its content type
pub(crate) async fn parse_body(
    headers: &HeaderMap,
    extensions: &Extensions,
    bytes: Bytes,
    accepts_multipart: bool,
) -> Result<ParsedBody, HttpError> {
    if bytes.is_empty() {
        return Ok(ParsedBody::default());
    }
    let Some(essence) = content_type(headers) else {
        return Err(HttpError::unsupported_media_type("missing content type"));
    };

    let value = match essence.as_str() {
        "application/json" => json_body(&bytes)?,
        other if other.ends_with("+json") => json_body(&bytes)?,
        "application/x-www-form-urlencoded" => pairs_to_value(url::form_urlencoded::parse(&bytes)),
        MULTIPART_FORM_DATA if accepts_multipart => {
            return multipart_body(headers, extensions, bytes).await;
        }
        other if other.starts_with("text/") => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        other => {
            return Err(HttpError::unsupported_media_type(format!(
                "unsupported content type: {other}"
            )));
        }
    };
    Ok(ParsedBody {
        value,
        ..ParsedBody::default()
    })
}

fn json_body(bytes: &[u8]) -> Result<Value, HttpError> {
    serde_json::from_slice(bytes).map_err(|e| HttpError::bad_request(format!("invalid JSON body: {e}")))
}

async fn multipart_body(
    headers: &HeaderMap,
    extensions: &Extensions,
    bytes: Bytes,
) -> Result<ParsedBody, HttpError> {
    let mut request = Request::new(Body::from(bytes));
    *request.headers_mut() = headers.clone();
    // carries the route's body limit to the multipart reader
    *request.extensions_mut() = extensions.clone();

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| HttpError::bad_request(rejection.to_string()))?;

    let mut fields = FormFields::default();
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::bad_request(e.to_string()))?
    {
        let raw_name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(ToString::to_string) {
            Some(filename) => {
                let name = fields.mark(&raw_name);
                let mimetype = field.content_type().unwrap_or(OCTET_STREAM).to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| HttpError::bad_request(e.to_string()))?;
                files.push(UploadFile::new(name, filename, mimetype, data));
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| HttpError::bad_request(e.to_string()))?;
                fields.push(&raw_name, Value::String(text));
            }
        }
    }

    // a file field sent more than once is an array field too
    let mut seen = BTreeSet::new();
    for file in &files {
        if !seen.insert(file.fieldname.as_str()) {
            fields.arrays.insert(file.fieldname.clone());
        }
    }

    Ok(ParsedBody {
        array_fields: fields.arrays.clone(),
        value: fields.into_value(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;

    fn with_type(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn query_arrays() {
        assert_eq!(
            parse_query(Some("tag=a&tag=b&page=2&ids[]=1")),
            json!({ "tag": ["a", "b"], "page": "2", "ids": ["1"] })
        );
        assert_eq!(parse_query(None), json!({}));
    }

    #[test]
    fn headers_object() {
        let mut headers = with_type("application/json; charset=utf-8");
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));
        let value = headers_value(&headers);
        assert_eq!(value["x-tag"], json!("a, b"));
        assert_eq!(content_type(&headers).as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn json_and_form_bodies() {
        let extensions = Extensions::new();
        let parsed = parse_body(
            &with_type("application/json"),
            &extensions,
            Bytes::from_static(br#"{"name":"gear"}"#),
            false,
        )
        .await
        .unwrap();
        assert_eq!(parsed.value, json!({ "name": "gear" }));

        let parsed = parse_body(
            &with_type("application/x-www-form-urlencoded"),
            &extensions,
            Bytes::from_static(b"name=gear&size=3"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(parsed.value, json!({ "name": "gear", "size": "3" }));
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let parsed = parse_body(&HeaderMap::new(), &Extensions::new(), Bytes::new(), false)
            .await
            .unwrap();
        assert_eq!(parsed.value, Value::Null);
    }

    #[tokio::test]
    async fn multipart_requires_opt_in() {
        let error = parse_body(
            &with_type("multipart/form-data; boundary=x"),
            &Extensions::new(),
            Bytes::from_static(b"--x--\r\n"),
            false,
        )
        .await
        .unwrap_err();
        assert_eq!(error.status(), axum::http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn multipart_fields_and_files() {
        let body = concat!(
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
            "album\r\n",
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"photos[]\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "first\r\n",
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"avatar\"; filename=\"me.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "me\r\n",
            "--XYZ--\r\n",
        );
        let parsed = parse_body(
            &with_type("multipart/form-data; boundary=XYZ"),
            &Extensions::new(),
            Bytes::from_static(body.as_bytes()),
            true,
        )
        .await
        .unwrap();

        assert_eq!(parsed.value, json!({ "title": "album" }));
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].fieldname, "photos");
        assert_eq!(parsed.files[0].size, 5);
        assert_eq!(parsed.files[1].filename, "me.txt");
        assert!(parsed.array_fields.contains("photos"));
        assert!(!parsed.array_fields.contains("avatar"));
    }
}
