// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Named security requirement kinds used for route documentation

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Authentication scheme a route declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityKind {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Authorization: Basic <credentials>`
    Basic,
    /// API key carried in a request header
    ApiKey,
}

impl SecurityKind {
    /// Name under which the scheme is published in the OpenAPI components
    pub const fn scheme_name(self) -> &'static str {
        match self {
            Self::Bearer => "bearerAuth",
            Self::Basic => "basicAuth",
            Self::ApiKey => "apiKeyAuth",
        }
    }

    /// Header carrying the credential
    pub const fn header_name(self) -> &'static str {
        match self {
            Self::Bearer | Self::Basic => "authorization",
            Self::ApiKey => "x-api-key",
        }
    }

    /// All known kinds
    pub const fn all() -> &'static [Self] {
        &[Self::Bearer, Self::Basic, Self::ApiKey]
    }
}

impl fmt::Display for SecurityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer => write!(f, "bearer"),
            Self::Basic => write!(f, "basic"),
            Self::ApiKey => write!(f, "api_key"),
        }
    }
}

/// Error returned when parsing an unknown security kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown security kind: {0}")]
pub struct SecurityKindParseError(pub String);

impl FromStr for SecurityKind {
    type Err = SecurityKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bearer" | "jwt" => Ok(Self::Bearer),
            "basic" => Ok(Self::Basic),
            "api_key" | "apikey" | "api-key" => Ok(Self::ApiKey),
            _ => Err(SecurityKindParseError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_names_are_unique() {
        let mut names: Vec<_> = SecurityKind::all()
            .iter()
            .map(|kind| kind.scheme_name())
            .collect();
        names.dedup();
        assert_eq!(names.len(), SecurityKind::all().len());
    }

    #[test]
    fn parse_and_display_round_trip() {
        for kind in SecurityKind::all() {
            assert_eq!(kind.to_string().parse::<SecurityKind>(), Ok(*kind));
        }
        assert_eq!("API-KEY".parse::<SecurityKind>(), Ok(SecurityKind::ApiKey));
        assert!("oauth".parse::<SecurityKind>().is_err());
    }

    #[test]
    fn serde_serialization() {
        assert_eq!(
            serde_json::to_string(&SecurityKind::ApiKey).unwrap(),
            "\"api_key\""
        );
    }
}
