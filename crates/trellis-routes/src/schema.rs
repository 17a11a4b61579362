// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Schema declarations, the shared schema table and compiled request validators
//!
//! A [`Schema<T>`] ties a `utoipa` schema to the Rust type the handler will receive.
//! Schemas carrying a stable identifier are published once in the [`SchemaTable`] and
//! referenced from routes as `#/components/schemas/<id>`; anonymous schemas are inlined.

use std::{borrow::Cow, collections::BTreeMap, fmt, marker::PhantomData};

use axum::http::StatusCode;
use serde_json::{Map, Number, Value, json};
use trellis_types::SchemaKind;
use utoipa::{
    ToSchema,
    openapi::{RefOr, Schema as OpenApiSchema, schema::Ref},
};

use crate::error::{HttpError, RouteError, RouteResult};

const COMPONENTS_PREFIX: &str = "#/components/schemas/";

/// Type-erased schema declaration
#[derive(Debug, Clone)]
pub struct SchemaDef {
    id: Option<String>,
    schema: RefOr<OpenApiSchema>,
    components: Vec<(String, RefOr<OpenApiSchema>)>,
}

impl SchemaDef {
    /// Stable identifier, if the schema is shared by reference
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Full schema definition
    pub fn schema(&self) -> &RefOr<OpenApiSchema> {
        &self.schema
    }

    /// Nested component schemas the definition refers to
    pub fn components(&self) -> &[(String, RefOr<OpenApiSchema>)] {
        &self.components
    }

    /// Schema as seen from a route: a reference when identified, otherwise inline
    pub fn route_schema(&self) -> RefOr<OpenApiSchema> {
        match &self.id {
            Some(id) => RefOr::Ref(Ref::new(component_ref(id))),
            None => self.schema.clone(),
        }
    }
}

/// Schema describing values of type `T`
pub struct Schema<T> {
    def: SchemaDef,
    _type: PhantomData<fn() -> T>,
}

impl<T: ToSchema> Schema<T> {
    /// Schema derived from `T`, shared by reference under the type name
    pub fn of() -> Self {
        Self::derived(Some(T::name()))
    }

    /// Schema derived from `T`, always inlined into the route
    pub fn inline() -> Self {
        Self::derived(None)
    }

    fn derived(id: Option<Cow<'static, str>>) -> Self {
        let mut components = Vec::new();
        T::schemas(&mut components);
        Self {
            def: SchemaDef {
                id: id.map(Cow::into_owned),
                schema: T::schema(),
                components,
            },
            _type: PhantomData,
        }
    }
}

impl<T> Schema<T> {
    /// Hand-built schema for `T`, inlined unless given an identifier
    pub fn custom(schema: impl Into<RefOr<OpenApiSchema>>) -> Self {
        Self {
            def: SchemaDef {
                id: None,
                schema: schema.into(),
                components: Vec::new(),
            },
            _type: PhantomData,
        }
    }

    /// Publish the schema under `id` and reference it from routes
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.def.id = Some(id.into());
        self
    }

    /// Borrow the type-erased declaration
    pub fn def(&self) -> &SchemaDef {
        &self.def
    }
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("type", &std::any::type_name::<T>())
            .field("id", &self.def.id)
            .finish_non_exhaustive()
    }
}

impl<T> From<Schema<T>> for SchemaDef {
    fn from(schema: Schema<T>) -> Self {
        schema.def
    }
}

/// Shared table of identified schemas, published as OpenAPI components
#[derive(Debug, Clone, Default)]
pub struct SchemaTable {
    schemas: BTreeMap<String, RefOr<OpenApiSchema>>,
}

impl SchemaTable {
    /// Add a schema; an identifier may only be registered once
    pub fn add(&mut self, id: impl Into<String>, schema: RefOr<OpenApiSchema>) -> RouteResult<()> {
        let id = id.into();
        if self.schemas.contains_key(&id) {
            return Err(RouteError::DuplicateSchema { id });
        }
        self.schemas.insert(id, schema);
        Ok(())
    }

    /// Add a schema unless the identifier is taken; returns whether it was added
    pub fn insert_once(&mut self, id: &str, schema: &RefOr<OpenApiSchema>) -> bool {
        if self.schemas.contains_key(id) {
            return false;
        }
        self.schemas.insert(id.to_string(), schema.clone());
        true
    }

    /// Whether an identifier is registered
    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    /// Look up a schema by identifier
    pub fn get(&self, id: &str) -> Option<&RefOr<OpenApiSchema>> {
        self.schemas.get(id)
    }

    /// Number of registered schemas
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Iterate over `(id, schema)` in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RefOr<OpenApiSchema>)> {
        self.schemas.iter().map(|(id, schema)| (id.as_str(), schema))
    }

    /// Table rendered as a JSON object keyed by identifier
    pub(crate) fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut table = Map::new();
        for (id, schema) in &self.schemas {
            table.insert(id.clone(), serde_json::to_value(schema)?);
        }
        Ok(Value::Object(table))
    }
}

/// Request validator compiled once per route and schema kind
pub(crate) struct CompiledSchema {
    kind: SchemaKind,
    validator: jsonschema::Validator,
    document: Value,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// Compile a route-level schema against the current schema table
    pub(crate) fn compile(
        kind: SchemaKind,
        schema: &RefOr<OpenApiSchema>,
        table: &SchemaTable,
    ) -> Result<Self, String> {
        let Value::Object(mut document) = serde_json::to_value(schema).map_err(|e| e.to_string())?
        else {
            return Err("schema must serialize to a JSON object".to_string());
        };
        let components = table.to_json().map_err(|e| e.to_string())?;
        document.insert("components".to_string(), json!({ "schemas": components }));
        let document = Value::Object(document);
        let validator = jsonschema::validator_for(&document).map_err(|e| e.to_string())?;
        Ok(Self {
            kind,
            validator,
            document,
        })
    }

    pub(crate) fn kind(&self) -> SchemaKind {
        self.kind
    }

    /// Coerce wire strings where needed, then validate
    pub(crate) fn prepare(&self, value: Value) -> Result<Value, HttpError> {
        let value = if self.kind.is_stringly() {
            coerce(value, &self.document, &self.document)
        } else {
            value
        };
        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|error| error.to_string())
            .collect();
        if messages.is_empty() {
            Ok(value)
        } else {
            Err(HttpError::new(
                StatusCode::BAD_REQUEST,
                json!({
                    "error": format!("{} validation failed: {}", self.kind, messages.join("; ")),
                    "kind": self.kind,
                }),
            ))
        }
    }
}

/// Follow a local `$ref` to the schema it points at
fn resolve<'a>(schema: &'a Value, document: &'a Value) -> &'a Value {
    let mut current = schema;
    // bounded so a self-referencing alias cannot loop
    for _ in 0..16 {
        match current.get("$ref").and_then(Value::as_str) {
            Some(reference) => match reference
                .strip_prefix('#')
                .and_then(|pointer| document.pointer(pointer))
            {
                Some(target) => current = target,
                None => return current,
            },
            _ => return current,
        }
    }
    current
}

fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(single)) => vec![single.as_str()],
        Some(Value::Array(many)) => many.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Coerce string-typed wire values to the types a schema declares
pub(crate) fn coerce(value: Value, schema: &Value, document: &Value) -> Value {
    let schema = resolve(schema, document);
    let types = declared_types(schema);
    match value {
        Value::Object(map) => {
            let properties = schema.get("properties").and_then(Value::as_object);
            let coerced = map
                .into_iter()
                .map(|(key, field)| {
                    let field = match properties.and_then(|p| p.get(&key)) {
                        Some(property) => coerce(field, property, document),
                        None => field,
                    };
                    (key, field)
                })
                .collect();
            Value::Object(coerced)
        }
        Value::Array(items) if types.contains(&"array") => {
            let item_schema = schema.get("items").cloned().unwrap_or(Value::Bool(true));
            Value::Array(
                items
                    .into_iter()
                    .map(|item| coerce(item, &item_schema, document))
                    .collect(),
            )
        }
        Value::String(text) => coerce_string(text, schema, &types, document),
        other => other,
    }
}

fn coerce_string(text: String, schema: &Value, types: &[&str], document: &Value) -> Value {
    if types.is_empty() || types.contains(&"string") {
        return Value::String(text);
    }
    if types.contains(&"array") {
        let item_schema = schema.get("items").cloned().unwrap_or(Value::Bool(true));
        return Value::Array(vec![coerce(Value::String(text), &item_schema, document)]);
    }
    if types.contains(&"integer")
        && let Ok(integer) = text.trim().parse::<i64>()
    {
        return Value::Number(integer.into());
    }
    if types.contains(&"number")
        && let Some(number) = text.trim().parse::<f64>().ok().and_then(Number::from_f64)
    {
        return Value::Number(number);
    }
    if types.contains(&"boolean") {
        match text.trim() {
            "true" | "1" => return Value::Bool(true),
            "false" | "0" => return Value::Bool(false),
            _ => {}
        }
    }
    if types.contains(&"null") && text.is_empty() {
        return Value::Null;
    }
    Value::String(text)
}

/// Reference path under which a schema id is published
pub(crate) fn component_ref(id: &str) -> String {
    format!("{COMPONENTS_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use utoipa::openapi::schema::{ObjectBuilder, Type};

    use super::*;

    #[derive(Debug, Deserialize, ToSchema)]
    #[allow(dead_code)]
    struct Pagination {
        page: u32,
        verbose: Option<bool>,
    }

    #[test]
    fn identified_schema_is_referenced() {
        let schema = Schema::<Pagination>::of();
        assert_eq!(schema.def().id(), Some("Pagination"));
        match schema.def().route_schema() {
            RefOr::Ref(reference) => {
                assert_eq!(reference.ref_location, component_ref("Pagination"));
            }
            RefOr::T(_) => panic!("expected a reference"),
        }
        assert!(Schema::<Pagination>::inline().def().id().is_none());
    }

    #[test]
    fn table_rejects_duplicate_ids() {
        let mut table = SchemaTable::default();
        let schema = Schema::<Pagination>::inline().def().schema().clone();
        table.add("Pagination", schema.clone()).unwrap();
        assert_eq!(
            table.add("Pagination", schema.clone()),
            Err(RouteError::DuplicateSchema {
                id: "Pagination".to_string()
            })
        );
        assert!(!table.insert_once("Pagination", &schema));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn query_strings_are_coerced_before_validation() {
        let mut table = SchemaTable::default();
        let def = SchemaDef::from(Schema::<Pagination>::of());
        table.add("Pagination", def.schema().clone()).unwrap();

        let compiled =
            CompiledSchema::compile(SchemaKind::Query, &def.route_schema(), &table).unwrap();
        let value = compiled
            .prepare(json!({ "page": "3", "verbose": "true" }))
            .unwrap();
        assert_eq!(value, json!({ "page": 3, "verbose": true }));

        let error = compiled.prepare(json!({ "page": "three" })).unwrap_err();
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert!(error.to_string().starts_with("query validation failed"));
    }

    #[test]
    fn body_values_are_not_coerced() {
        let schema = Schema::<()>::custom(
            ObjectBuilder::new()
                .property("count", ObjectBuilder::new().schema_type(Type::Integer))
                .required("count"),
        );
        let compiled = CompiledSchema::compile(
            SchemaKind::Body,
            &schema.def().route_schema(),
            &SchemaTable::default(),
        )
        .unwrap();
        assert!(compiled.prepare(json!({ "count": "1" })).is_err());
        assert!(compiled.prepare(json!({ "count": 1 })).is_ok());
    }

    #[test]
    fn scalar_strings_become_arrays() {
        let schema = json!({ "type": "array", "items": { "type": "integer" } });
        assert_eq!(coerce(json!("7"), &schema, &schema), json!([7]));
        assert_eq!(coerce(json!(["1", "2"]), &schema, &schema), json!([1, 2]));
    }
}
