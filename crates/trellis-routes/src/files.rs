// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Staged uploads and the per-field upload policy
//!
//! Every staged file is checked before the handler runs. Violations are collected across
//! all files so the client sees each of them in one 400 response. When the policy passes
//! and a [`FilePersister`] is configured, files are handed over one at a time and the
//! body fields are rewritten to the URLs it returns.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use axum::body::Bytes;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::HttpError,
    request::RouteInfo,
    sniff::{ContentSniffer, OCTET_STREAM},
};

/// Policy key applying to every field without its own entry
pub const DEFAULT_POLICY: &str = "default";

/// An uploaded file staged in memory
#[derive(Clone)]
pub struct UploadFile {
    /// Generated identifier
    pub id: Uuid,
    /// Form field the file was sent under, without any `[]` suffix
    pub fieldname: String,
    /// Client-supplied file name
    pub filename: String,
    /// Transfer encoding
    pub encoding: String,
    /// Client-declared MIME type
    pub mimetype: String,
    /// Size in bytes
    pub size: usize,
    /// File content; emptied once persisted
    pub buffer: Bytes,
    /// Location returned by the persister
    pub url: Option<String>,
    /// Free-form metadata set by the persister
    pub metadata: Option<Value>,
}

impl UploadFile {
    /// Stage a new file
    pub fn new(
        fieldname: impl Into<String>,
        filename: impl Into<String>,
        mimetype: impl Into<String>,
        buffer: Bytes,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            fieldname: fieldname.into(),
            filename: filename.into(),
            encoding: "7bit".to_string(),
            mimetype: mimetype.into(),
            size: buffer.len(),
            buffer,
            url: None,
            metadata: None,
        }
    }

    /// Summary placed in the request body when no persister is configured
    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "filename": self.filename,
            "mimetype": self.mimetype,
            "size": self.size,
        })
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("id", &self.id)
            .field("fieldname", &self.fieldname)
            .field("filename", &self.filename)
            .field("mimetype", &self.mimetype)
            .field("size", &self.size)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Constraints for the files of one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOptions {
    max_file_size: Option<usize>,
    accept: Vec<String>,
    max_files: Option<usize>,
}

impl FileOptions {
    /// Unconstrained options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum size of a single file in bytes
    #[must_use]
    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Accepted MIME types; `type/*` accepts every subtype
    #[must_use]
    pub fn accept<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.accept = types.into_iter().map(Into::into).collect();
        self
    }

    /// Maximum number of files sent under one field
    #[must_use]
    pub fn max_files(mut self, count: usize) -> Self {
        self.max_files = Some(count);
        self
    }
}

/// Whether `mime` is allowed by an accept entry
pub fn mime_matches(accept: &str, mime: &str) -> bool {
    let accept = accept.trim().to_ascii_lowercase();
    let mime = mime.to_ascii_lowercase();
    match accept.strip_suffix("/*") {
        Some(top) => top == "*" || mime.split('/').next() == Some(top),
        None => accept == mime,
    }
}

/// Collected policy violations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolations(pub Vec<String>);

impl PolicyViolations {
    /// Violations as the 400 error sent to the client
    pub fn into_error(self) -> HttpError {
        HttpError::bad_request(self.0.join("\n"))
    }
}

/// Upload policy of a route: a default entry plus per-field overrides
#[derive(Debug, Clone, Default)]
pub struct FilePolicy {
    fields: BTreeMap<String, FileOptions>,
}

impl FilePolicy {
    /// Set the options of `field`, or of the default entry when `None`
    pub fn set(&mut self, field: Option<&str>, options: FileOptions) {
        self.fields
            .insert(field.unwrap_or(DEFAULT_POLICY).to_string(), options);
    }

    /// Whether any constraint was declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn for_field(&self, field: &str) -> Option<&FileOptions> {
        self.fields
            .get(field)
            .or_else(|| self.fields.get(DEFAULT_POLICY))
    }

    /// Check every staged file, accumulating all violations
    pub fn check(
        &self,
        files: &[UploadFile],
        sniffer: &dyn ContentSniffer,
    ) -> Result<(), PolicyViolations> {
        let mut violations = Vec::new();
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

        for file in files {
            *counts.entry(file.fieldname.as_str()).or_default() += 1;
            let Some(options) = self.for_field(&file.fieldname) else {
                continue;
            };

            if let Some(max) = options.max_file_size
                && file.size > max
            {
                violations.push(format!(
                    "File \"{}\" exceeds the maximum size of {max} bytes ({} bytes)",
                    file.filename, file.size
                ));
            }

            if !options.accept.is_empty() {
                let detected = sniffer.sniff(&file.buffer).unwrap_or(OCTET_STREAM);
                if !options.accept.iter().any(|accept| mime_matches(accept, detected)) {
                    violations.push(format!(
                        "File \"{}\" has type {detected}, allowed: {}",
                        file.filename,
                        options.accept.join(", ")
                    ));
                }
            }
        }

        // one message per field, however many files it carries
        for (field, count) in counts {
            if let Some(max) = self.for_field(field).and_then(|options| options.max_files)
                && count > max
            {
                violations.push(format!(
                    "Too many files for field \"{field}\": {count} (maximum {max})"
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(PolicyViolations(violations))
        }
    }
}

/// Permanent storage for uploaded files
pub trait FilePersister: Send + Sync {
    /// Store `file` and return it with `url` set; the buffer may be dropped
    fn persist<'a>(
        &'a self,
        file: UploadFile,
        route: &'a RouteInfo,
    ) -> BoxFuture<'a, Result<UploadFile, HttpError>>;
}

/// Persist files one at a time; a failed file is logged and left without a URL
pub(crate) async fn persist_all(
    files: Vec<UploadFile>,
    persister: &dyn FilePersister,
    route: &RouteInfo,
) -> Vec<UploadFile> {
    let mut persisted = Vec::with_capacity(files.len());
    for file in files {
        let fallback = file.clone();
        match persister.persist(file, route).await {
            Ok(mut stored) => {
                stored.buffer = Bytes::new();
                persisted.push(stored);
            }
            Err(error) => {
                warn!(
                    filename = %fallback.filename,
                    field = %fallback.fieldname,
                    route = %route.path,
                    error = %error,
                    "failed to persist uploaded file"
                );
                persisted.push(fallback);
            }
        }
    }
    persisted
}

fn fields_of(files: &[UploadFile]) -> BTreeSet<&str> {
    files.iter().map(|file| file.fieldname.as_str()).collect()
}

fn take_object(body: &mut Value) -> Map<String, Value> {
    match std::mem::take(body) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Point file fields of the body at the persisted URLs
pub(crate) fn rewrite_body(body: &mut Value, files: &[UploadFile], array_fields: &BTreeSet<String>) {
    let mut object = take_object(body);
    for field in fields_of(files) {
        let urls: Vec<Value> = files
            .iter()
            .filter(|file| file.fieldname == field)
            .filter_map(|file| file.url.clone().map(Value::String))
            .collect();
        let value = if array_fields.contains(field) {
            Value::Array(urls)
        } else {
            urls.into_iter().next().unwrap_or(Value::Null)
        };
        object.insert(field.to_string(), value);
    }
    *body = Value::Object(object);
}

/// Place file descriptors in the body when files stay in memory
pub(crate) fn describe_in_body(
    body: &mut Value,
    files: &[UploadFile],
    array_fields: &BTreeSet<String>,
) {
    let mut object = take_object(body);
    for field in fields_of(files) {
        let mut descriptors = files
            .iter()
            .filter(|file| file.fieldname == field)
            .map(UploadFile::descriptor);
        let value = if array_fields.contains(field) {
            Value::Array(descriptors.collect())
        } else {
            descriptors.next().unwrap_or(Value::Null)
        };
        object.insert(field.to_string(), value);
    }
    *body = Value::Object(object);
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;
    use crate::sniff::MagicSniffer;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01";

    fn png(field: &str, name: &str) -> UploadFile {
        // declared as pdf to prove the declared type is ignored
        UploadFile::new(field, name, "application/pdf", Bytes::from_static(PNG))
    }

    fn policy(options: FileOptions) -> FilePolicy {
        let mut policy = FilePolicy::default();
        policy.set(None, options);
        policy
    }

    #[test]
    fn mime_wildcards() {
        assert!(mime_matches("image/*", "image/png"));
        assert!(mime_matches("*/*", "application/pdf"));
        assert!(mime_matches("application/pdf", "Application/PDF"));
        assert!(!mime_matches("image/*", "application/pdf"));
        assert!(!mime_matches("image/png", "image/jpeg"));
    }

    #[test]
    fn oversized_file_names_the_file() {
        let policy = policy(FileOptions::new().max_file_size(4));
        let violations = policy
            .check(&[png("avatar", "me.png")], &MagicSniffer)
            .unwrap_err();
        assert_eq!(violations.0.len(), 1);
        assert!(violations.0[0].contains("me.png"));
    }

    #[test]
    fn violations_accumulate_across_files() {
        let policy = policy(FileOptions::new().max_file_size(4));
        let error = policy
            .check(&[png("a", "one.png"), png("b", "two.png")], &MagicSniffer)
            .unwrap_err()
            .into_error();
        assert_eq!(error.status(), axum::http::StatusCode::BAD_REQUEST);
        let message = error.to_string();
        assert_eq!(message.lines().count(), 2);
        assert!(message.contains("one.png") && message.contains("two.png"));
    }

    #[test]
    fn sniffed_type_decides_acceptance() {
        let images = policy(FileOptions::new().accept(["image/*"]));
        assert!(images.check(&[png("avatar", "me.png")], &MagicSniffer).is_ok());

        let pdfs = policy(FileOptions::new().accept(["application/pdf"]));
        let violations = pdfs
            .check(&[png("avatar", "me.png")], &MagicSniffer)
            .unwrap_err();
        assert!(violations.0[0].contains("image/png"));
    }

    #[test]
    fn count_is_reported_once_per_field() {
        let mut policy = FilePolicy::default();
        policy.set(Some("photos"), FileOptions::new().max_files(1));
        let files = [
            png("photos", "1.png"),
            png("photos", "2.png"),
            png("photos", "3.png"),
            png("other", "4.png"),
        ];
        let violations = policy.check(&files, &MagicSniffer).unwrap_err();
        assert_eq!(violations.0.len(), 1);
        assert!(violations.0[0].contains("photos"));
    }

    #[test]
    fn field_policy_overrides_default() {
        let mut policy = FilePolicy::default();
        policy.set(None, FileOptions::new().max_file_size(1));
        policy.set(Some("large"), FileOptions::new().max_file_size(1024));
        assert!(policy.check(&[png("large", "ok.png")], &MagicSniffer).is_ok());
        assert!(policy.check(&[png("small", "no.png")], &MagicSniffer).is_err());
    }

    #[test]
    fn rewrite_uses_urls() {
        let mut first = png("photos", "1.png");
        first.url = Some("https://cdn/1.png".to_string());
        let mut second = png("photos", "2.png");
        second.url = Some("https://cdn/2.png".to_string());
        let mut avatar = png("avatar", "me.png");
        avatar.url = Some("https://cdn/me.png".to_string());
        let failed = png("cover", "cover.png");

        let arrays = BTreeSet::from(["photos".to_string()]);
        let mut body = json!({ "title": "album" });
        rewrite_body(&mut body, &[first, second, avatar, failed], &arrays);
        assert_eq!(
            body,
            json!({
                "title": "album",
                "photos": ["https://cdn/1.png", "https://cdn/2.png"],
                "avatar": "https://cdn/me.png",
                "cover": null,
            })
        );
    }

    struct FailingPersister;

    impl FilePersister for FailingPersister {
        fn persist<'a>(
            &'a self,
            file: UploadFile,
            _route: &'a RouteInfo,
        ) -> BoxFuture<'a, Result<UploadFile, HttpError>> {
            Box::pin(async move {
                if file.filename.starts_with("bad") {
                    Err(HttpError::internal("disk full"))
                } else {
                    Ok(UploadFile {
                        url: Some(format!("/files/{}", file.filename)),
                        ..file
                    })
                }
            })
        }
    }

    #[tokio::test]
    async fn persistence_failures_are_skipped() {
        let route = RouteInfo::new(Method::POST, "/api/upload");
        let files = vec![png("photos", "good.png"), png("photos", "bad.png")];
        let persisted = persist_all(files, &FailingPersister, &route).await;
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].url.as_deref(), Some("/files/good.png"));
        assert!(persisted[0].buffer.is_empty());
        assert!(persisted[1].url.is_none());

        let arrays = BTreeSet::from(["photos".to_string()]);
        let mut body = Value::Null;
        rewrite_body(&mut body, &persisted, &arrays);
        assert_eq!(body, json!({ "photos": ["/files/good.png"] }));
    }
}
