// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared types for the trellis framework
//!
//! This crate provides the types that are shared between the route engine and the
//! application bootstrap layer, avoiding circular dependencies between them.

pub mod envelope;
pub mod schema_kind;
pub mod security;

pub use envelope::Envelope;
pub use schema_kind::{SchemaKind, SchemaKindParseError};
pub use security::{SecurityKind, SecurityKindParseError};
