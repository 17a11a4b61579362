// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Schema declaration kinds

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Which part of a request or response a schema declaration describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    /// Path parameters
    Params,
    /// Query string
    Query,
    /// Request body
    Body,
    /// Request headers
    Headers,
    /// Response payload for one status code
    Response,
}

impl SchemaKind {
    /// Returns the lowercase name of the kind
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Params => "params",
            Self::Query => "query",
            Self::Body => "body",
            Self::Headers => "headers",
            Self::Response => "response",
        }
    }

    /// Request-side kinds in the order they are validated
    pub const fn request_kinds() -> &'static [Self] {
        &[Self::Params, Self::Body, Self::Query, Self::Headers]
    }

    /// Whether values of this kind arrive as strings and need type coercion
    pub const fn is_stringly(self) -> bool {
        matches!(self, Self::Params | Self::Query | Self::Headers)
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown schema kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown schema kind: {0}")]
pub struct SchemaKindParseError(pub String);

impl FromStr for SchemaKind {
    type Err = SchemaKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "params" | "path" => Ok(Self::Params),
            "query" | "querystring" => Ok(Self::Query),
            "body" => Ok(Self::Body),
            "headers" => Ok(Self::Headers),
            "response" => Ok(Self::Response),
            _ => Err(SchemaKindParseError(s.to_string())),
        }
    }
}
