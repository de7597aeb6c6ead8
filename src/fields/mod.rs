//! Fields: two-way conversion between wire JSON and backend values, with
//! JSON-Schema emission for both directions.

mod object;
mod reference;

pub use object::ObjectField;
pub use reference::ResourceRef;

use crate::error::{ApiError, ConfigError};
use crate::natural_keys;
use crate::schema::{make_nullable, Context, ConvertMode};
use crate::Item;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::str::FromStr;

const UUID_PATTERN: &str = "^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}$";

/// Which directions a field takes part in: read (responses), create (POST), update (PATCH).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Io {
    pub read: bool,
    pub create: bool,
    pub update: bool,
}

impl Io {
    pub const READ: Io = Io { read: true, create: false, update: false };
    pub const WRITE: Io = Io { read: false, create: true, update: true };
    pub const READ_WRITE: Io = Io { read: true, create: true, update: true };
    pub const CREATE: Io = Io { read: false, create: true, update: false };
    pub const READ_CREATE: Io = Io { read: true, create: true, update: false };

    pub fn is_read_only(&self) -> bool {
        self.read && !self.create && !self.update
    }
}

impl Default for Io {
    fn default() -> Self {
        Io::READ_WRITE
    }
}

/// Parses `"r"`, `"w"` (create and update), `"c"`, `"u"` and combinations such as `"rw"` or `"cr"`.
impl FromStr for Io {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut io = Io { read: false, create: false, update: false };
        for c in s.chars() {
            match c {
                'r' => io.read = true,
                'w' => {
                    io.create = true;
                    io.update = true;
                }
                'c' => io.create = true,
                'u' => io.update = true,
                other => {
                    return Err(ConfigError::InvalidField(format!("unknown io flag '{}' in '{}'", other, s)));
                }
            }
        }
        Ok(io)
    }
}

/// Field class hierarchy used to look up filter operators (most specific first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Raw,
    Any,
    Null,
    String,
    Uuid,
    Uri,
    Email,
    Boolean,
    Integer,
    PositiveInteger,
    Number,
    Date,
    DateTime,
    DateString,
    DateTimeString,
    Array,
    Object,
    AttributeMapped,
    ToOne,
    ToMany,
    Inline,
    ItemUri,
    ItemType,
}

impl FieldType {
    pub fn parent(self) -> Option<FieldType> {
        use FieldType::*;
        match self {
            Raw => None,
            Uri | Email => Some(String),
            PositiveInteger => Some(Integer),
            AttributeMapped => Some(Object),
            _ => Some(Raw),
        }
    }

    pub fn ancestry(self) -> impl Iterator<Item = FieldType> {
        std::iter::successors(Some(self), |t| t.parent())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringOptions {
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub pattern: Option<String>,
    pub enum_values: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumberOptions {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayOptions {
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    pub unique: bool,
}

#[derive(Clone, Debug)]
pub enum FieldKind {
    /// Fixed schemas; values pass through.
    Raw { response: Value, request: Value },
    Any,
    Null,
    String(StringOptions),
    Uuid,
    Uri,
    Email,
    Boolean,
    Integer { minimum: Option<i64>, maximum: Option<i64> },
    PositiveInteger { maximum: Option<i64> },
    Number(NumberOptions),
    /// Backend `YYYY-MM-DD`, wire `{"$date": <ms>}`.
    Date,
    /// Backend RFC 3339, wire `{"$date": <ms>}`.
    DateTime,
    DateString,
    DateTimeString,
    Array { container: Box<Field>, options: ArrayOptions },
    Object(ObjectField),
    /// Backend list of objects, wire object keyed by `mapping_attribute`.
    AttributeMapped { container: Box<Field>, mapping_attribute: String, pattern: Option<String> },
    ToOne(ResourceRef),
    ToMany(ResourceRef),
    Inline(ResourceRef),
    ItemUri(ResourceRef),
    ItemType(ResourceRef),
}

#[derive(Clone, Debug)]
pub struct Field {
    pub kind: FieldKind,
    pub io: Io,
    pub attribute: Option<String>,
    pub nullable: bool,
    pub default: Option<Value>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        Field {
            kind,
            io: Io::default(),
            attribute: None,
            nullable: false,
            default: None,
            title: None,
            description: None,
        }
    }

    pub fn raw(schema: Value) -> Self {
        Field::new(FieldKind::Raw { response: schema.clone(), request: schema })
    }

    pub fn raw_with(response: Value, request: Value) -> Self {
        Field::new(FieldKind::Raw { response, request })
    }

    pub fn any() -> Self {
        Field::new(FieldKind::Any)
    }

    pub fn null() -> Self {
        Field::new(FieldKind::Null)
    }

    pub fn string() -> Self {
        Field::new(FieldKind::String(StringOptions::default()))
    }

    pub fn string_with(options: StringOptions) -> Self {
        Field::new(FieldKind::String(options))
    }

    pub fn uuid() -> Self {
        Field::new(FieldKind::Uuid)
    }

    pub fn uri() -> Self {
        Field::new(FieldKind::Uri)
    }

    pub fn email() -> Self {
        Field::new(FieldKind::Email)
    }

    pub fn boolean() -> Self {
        Field::new(FieldKind::Boolean)
    }

    pub fn integer() -> Self {
        Field::new(FieldKind::Integer { minimum: None, maximum: None })
    }

    pub fn integer_between(minimum: Option<i64>, maximum: Option<i64>) -> Self {
        Field::new(FieldKind::Integer { minimum, maximum })
    }

    pub fn positive_integer() -> Self {
        Field::new(FieldKind::PositiveInteger { maximum: None })
    }

    pub fn number() -> Self {
        Field::new(FieldKind::Number(NumberOptions::default()))
    }

    pub fn number_with(options: NumberOptions) -> Self {
        Field::new(FieldKind::Number(options))
    }

    pub fn date() -> Self {
        Field::new(FieldKind::Date)
    }

    pub fn date_time() -> Self {
        Field::new(FieldKind::DateTime)
    }

    pub fn date_string() -> Self {
        Field::new(FieldKind::DateString)
    }

    pub fn date_time_string() -> Self {
        Field::new(FieldKind::DateTimeString)
    }

    pub fn array(container: Field) -> Self {
        Field::array_with(container, ArrayOptions::default())
    }

    pub fn array_with(container: Field, options: ArrayOptions) -> Self {
        Field::new(FieldKind::Array { container: Box::new(container), options })
    }

    pub fn object(object: ObjectField) -> Self {
        Field::new(FieldKind::Object(object))
    }

    pub fn attribute_mapped(container: Field, mapping_attribute: &str, pattern: Option<&str>) -> Self {
        Field::new(FieldKind::AttributeMapped {
            container: Box::new(container),
            mapping_attribute: mapping_attribute.to_string(),
            pattern: pattern.map(str::to_string),
        })
    }

    pub fn to_one(target: &str) -> Self {
        Field::new(FieldKind::ToOne(ResourceRef::new(target)))
    }

    pub fn to_many(target: &str) -> Self {
        Field::new(FieldKind::ToMany(ResourceRef::new(target)))
    }

    pub fn inline(target: &str) -> Self {
        Field::new(FieldKind::Inline(ResourceRef::new(target)))
    }

    pub fn item_uri(target: &str) -> Self {
        Field::new(FieldKind::ItemUri(ResourceRef::new(target))).io(Io::READ)
    }

    pub fn item_type(target: &str) -> Self {
        Field::new(FieldKind::ItemType(ResourceRef::new(target))).io(Io::READ)
    }

    pub fn io(mut self, io: Io) -> Self {
        self.io = io;
        self
    }

    pub fn read_only(self) -> Self {
        self.io(Io::READ)
    }

    pub fn write_only(self) -> Self {
        self.io(Io::WRITE)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn attribute(mut self, attribute: &str) -> Self {
        self.attribute = Some(attribute.to_string());
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn field_type(&self) -> FieldType {
        match &self.kind {
            FieldKind::Raw { .. } => FieldType::Raw,
            FieldKind::Any => FieldType::Any,
            FieldKind::Null => FieldType::Null,
            FieldKind::String(_) => FieldType::String,
            FieldKind::Uuid => FieldType::Uuid,
            FieldKind::Uri => FieldType::Uri,
            FieldKind::Email => FieldType::Email,
            FieldKind::Boolean => FieldType::Boolean,
            FieldKind::Integer { .. } => FieldType::Integer,
            FieldKind::PositiveInteger { .. } => FieldType::PositiveInteger,
            FieldKind::Number(_) => FieldType::Number,
            FieldKind::Date => FieldType::Date,
            FieldKind::DateTime => FieldType::DateTime,
            FieldKind::DateString => FieldType::DateString,
            FieldKind::DateTimeString => FieldType::DateTimeString,
            FieldKind::Array { .. } => FieldType::Array,
            FieldKind::Object(_) => FieldType::Object,
            FieldKind::AttributeMapped { .. } => FieldType::AttributeMapped,
            FieldKind::ToOne(_) => FieldType::ToOne,
            FieldKind::ToMany(_) => FieldType::ToMany,
            FieldKind::Inline(_) => FieldType::Inline,
            FieldKind::ItemUri(_) => FieldType::ItemUri,
            FieldKind::ItemType(_) => FieldType::ItemType,
        }
    }

    /// Backend attribute for a field stored under `key`.
    pub fn attribute_or<'a>(&'a self, key: &'a str) -> &'a str {
        self.attribute.as_deref().unwrap_or(key)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::String(_)
                | FieldKind::Uuid
                | FieldKind::Uri
                | FieldKind::Email
                | FieldKind::Boolean
                | FieldKind::Integer { .. }
                | FieldKind::PositiveInteger { .. }
                | FieldKind::Number(_)
                | FieldKind::Date
                | FieldKind::DateTime
                | FieldKind::DateString
                | FieldKind::DateTimeString
        )
    }

    /// Target of a reference field.
    pub fn target(&self) -> Option<&ResourceRef> {
        match &self.kind {
            FieldKind::ToOne(r)
            | FieldKind::ToMany(r)
            | FieldKind::Inline(r)
            | FieldKind::ItemUri(r)
            | FieldKind::ItemType(r) => Some(r),
            _ => None,
        }
    }

    /// Inner field of an `Array` (or the referenced-item field of a `ToMany`).
    pub fn container(&self) -> Option<Field> {
        match &self.kind {
            FieldKind::Array { container, .. } => Some((**container).clone()),
            FieldKind::ToMany(target) => Some(Field::new(FieldKind::ToOne(target.clone()))),
            _ => None,
        }
    }

    pub(crate) fn visit_refs<E>(&mut self, f: &mut dyn FnMut(&mut ResourceRef) -> Result<(), E>) -> Result<(), E> {
        match &mut self.kind {
            FieldKind::ToOne(r)
            | FieldKind::ToMany(r)
            | FieldKind::Inline(r)
            | FieldKind::ItemUri(r)
            | FieldKind::ItemType(r) => f(r),
            FieldKind::Array { container, .. } | FieldKind::AttributeMapped { container, .. } => container.visit_refs(f),
            FieldKind::Object(object) => object.visit_refs(f),
            _ => Ok(()),
        }
    }

    /// Attaches the owning resource; resolves `"self"` references.
    pub fn bind(&mut self, owner: &str) {
        let bound = self.visit_refs::<Infallible>(&mut |r| {
            r.bind(owner);
            Ok(())
        });
        match bound {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }

    pub fn resolve(&mut self, is_registered: &dyn Fn(&str) -> bool) -> Result<(), ConfigError> {
        self.visit_refs(&mut |r| r.resolve(is_registered))
    }

    pub fn response(&self, ctx: Context<'_>) -> Value {
        self.finalize(self.kind_schema(ctx, false), true)
    }

    pub fn request(&self, ctx: Context<'_>) -> Value {
        self.finalize(self.kind_schema(ctx, true), false)
    }

    fn finalize(&self, schema: Value, response: bool) -> Value {
        let mut schema = if self.nullable { make_nullable(schema) } else { schema };
        if let Value::Object(map) = &mut schema {
            if let Some(default) = &self.default {
                map.insert("default".into(), default.clone());
            }
            if let Some(title) = &self.title {
                map.insert("title".into(), json!(title));
            }
            if let Some(description) = &self.description {
                map.insert("description".into(), json!(description));
            }
            if response && self.io.is_read_only() {
                map.insert("readOnly".into(), json!(true));
            }
        }
        schema
    }

    fn kind_schema(&self, ctx: Context<'_>, request: bool) -> Value {
        match &self.kind {
            FieldKind::Raw { response, request: req } => {
                if request {
                    req.clone()
                } else {
                    response.clone()
                }
            }
            FieldKind::Any => json!({"type": ["null", "string", "number", "boolean", "object", "array"]}),
            FieldKind::Null => json!({"type": "null"}),
            FieldKind::String(options) => {
                let mut schema = Map::new();
                schema.insert("type".into(), json!("string"));
                if let Some(n) = options.min_length {
                    schema.insert("minLength".into(), json!(n));
                }
                if let Some(n) = options.max_length {
                    schema.insert("maxLength".into(), json!(n));
                }
                if let Some(p) = &options.pattern {
                    schema.insert("pattern".into(), json!(p));
                }
                if let Some(values) = &options.enum_values {
                    schema.insert("enum".into(), json!(values));
                }
                Value::Object(schema)
            }
            FieldKind::Uuid => json!({"type": "string", "format": "uuid", "pattern": UUID_PATTERN}),
            FieldKind::Uri => json!({"type": "string", "format": "uri"}),
            FieldKind::Email => json!({"type": "string", "format": "email"}),
            FieldKind::Boolean => json!({"type": "boolean"}),
            FieldKind::Integer { minimum, maximum } => {
                let mut schema = json!({"type": "integer"});
                if let Some(n) = minimum {
                    schema["minimum"] = json!(n);
                }
                if let Some(n) = maximum {
                    schema["maximum"] = json!(n);
                }
                schema
            }
            FieldKind::PositiveInteger { maximum } => {
                let mut schema = json!({"type": "integer", "minimum": 0});
                if let Some(n) = maximum {
                    schema["maximum"] = json!(n);
                }
                schema
            }
            FieldKind::Number(options) => {
                let mut schema = json!({"type": "number"});
                if let Some(n) = options.minimum {
                    schema["minimum"] = json!(n);
                    if options.exclusive_minimum {
                        schema["exclusiveMinimum"] = json!(true);
                    }
                }
                if let Some(n) = options.maximum {
                    schema["maximum"] = json!(n);
                    if options.exclusive_maximum {
                        schema["exclusiveMaximum"] = json!(true);
                    }
                }
                schema
            }
            FieldKind::Date | FieldKind::DateTime => json!({
                "type": "object",
                "properties": {"$date": {"type": "integer"}},
                "required": ["$date"],
                "additionalProperties": false
            }),
            FieldKind::DateString => json!({"type": "string", "format": "date"}),
            FieldKind::DateTimeString => json!({"type": "string", "format": "date-time"}),
            FieldKind::Array { container, options } => {
                let items = if request { container.request(ctx) } else { container.response(ctx) };
                let mut schema = json!({"type": "array", "items": items});
                if let Some(n) = options.min_items {
                    schema["minItems"] = json!(n);
                }
                if let Some(n) = options.max_items {
                    schema["maxItems"] = json!(n);
                }
                if options.unique {
                    schema["uniqueItems"] = json!(true);
                }
                schema
            }
            FieldKind::Object(object) => object.schema(ctx, request),
            FieldKind::AttributeMapped { container, pattern, .. } => {
                let inner = if request { container.request(ctx) } else { container.response(ctx) };
                match pattern {
                    Some(p) => json!({
                        "type": "object",
                        "additionalProperties": false,
                        "patternProperties": {p.as_str(): inner}
                    }),
                    None => json!({"type": "object", "additionalProperties": inner}),
                }
            }
            FieldKind::ToOne(target) => reference_schema(target, ctx, request),
            FieldKind::ToMany(target) => json!({"type": "array", "items": reference_schema(target, ctx, request)}),
            FieldKind::Inline(target) => {
                if target.is_self() {
                    json!({"$ref": "#"})
                } else {
                    json!({"$ref": format!("{}/schema#", ctx.route_prefix(target.target_name()))})
                }
            }
            FieldKind::ItemUri(_) => json!({"type": "string", "format": "uri"}),
            FieldKind::ItemType(target) => json!({"type": "string", "enum": [target.target_name()]}),
        }
    }

    /// Backend value to wire JSON. Pure: never performs I/O.
    pub fn format(&self, value: &Value, ctx: Context<'_>) -> Value {
        if let FieldKind::ItemType(target) = &self.kind {
            return json!(target.target_name());
        }
        if value.is_null() {
            return Value::Null;
        }
        match &self.kind {
            FieldKind::Integer { .. } | FieldKind::PositiveInteger { .. } => {
                integer_value(value).map(Value::from).unwrap_or_else(|| value.clone())
            }
            FieldKind::Boolean => match value {
                Value::Number(n) => Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
                other => other.clone(),
            },
            FieldKind::Date => value
                .as_str()
                .and_then(parse_date)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| json!({"$date": Utc.from_utc_datetime(&dt).timestamp_millis()}))
                .unwrap_or_else(|| value.clone()),
            FieldKind::DateTime => value
                .as_str()
                .and_then(parse_datetime)
                .map(|dt| json!({"$date": dt.timestamp_millis()}))
                .unwrap_or_else(|| value.clone()),
            FieldKind::DateTimeString => match value.as_str() {
                Some(s) => match DateTime::parse_from_rfc3339(s) {
                    Ok(dt) => json!(dt.to_rfc3339()),
                    Err(_) => parse_datetime(s).map(|dt| json!(dt.to_rfc3339())).unwrap_or_else(|| value.clone()),
                },
                None => value.clone(),
            },
            FieldKind::Array { container, .. } => match value {
                Value::Array(items) => Value::Array(items.iter().map(|v| container.format(v, ctx)).collect()),
                other => other.clone(),
            },
            FieldKind::Object(object) => object.format(value, ctx),
            FieldKind::AttributeMapped { container, mapping_attribute, .. } => match value {
                Value::Array(entries) => {
                    let mut out = Map::new();
                    for entry in entries {
                        let Value::Object(entry) = entry else { continue };
                        let Some(key) = entry.get(mapping_attribute) else { continue };
                        let mut rest = entry.clone();
                        rest.remove(mapping_attribute);
                        out.insert(id_segment(key), container.format(&Value::Object(rest), ctx));
                    }
                    Value::Object(out)
                }
                other => other.clone(),
            },
            FieldKind::ToOne(target) => item_ref(target, value, ctx),
            FieldKind::ToMany(target) => match value {
                Value::Array(ids) => Value::Array(ids.iter().map(|id| item_ref(target, id, ctx)).collect()),
                other => other.clone(),
            },
            FieldKind::Inline(target) => match (value, target.name().and_then(|n| ctx.resource(n))) {
                (Value::Object(item), Ok(resource)) => resource.schema.format(item, ctx),
                _ => value.clone(),
            },
            FieldKind::ItemUri(target) => {
                json!(format!("{}/{}", ctx.route_prefix(target.target_name()), id_segment(value)))
            }
            _ => value.clone(),
        }
    }

    /// Formats the value this field reads from `item` when stored under `key`.
    pub fn output(&self, key: &str, item: &Item, ctx: Context<'_>) -> Value {
        self.format(item.get(self.attribute_or(key)).unwrap_or(&Value::Null), ctx)
    }

    /// Validates `value` against the request schema, then converts it.
    pub async fn convert(&self, value: &Value, ctx: Context<'_>) -> Result<Value, ApiError> {
        ctx.validate(value, &self.request(ctx))?;
        self.convert_valid(value, ctx).await
    }

    /// Converts an already validated wire value to its backend form.
    pub fn convert_valid<'a>(&'a self, value: &'a Value, ctx: Context<'a>) -> BoxFuture<'a, Result<Value, ApiError>> {
        Box::pin(async move {
            if value.is_null() {
                return Ok(Value::Null);
            }
            match &self.kind {
                FieldKind::Integer { .. } | FieldKind::PositiveInteger { .. } => {
                    Ok(integer_value(value).map(Value::from).unwrap_or_else(|| value.clone()))
                }
                FieldKind::Uuid => value
                    .as_str()
                    .and_then(|s| uuid::Uuid::parse_str(s).ok())
                    .map(|u| json!(u.hyphenated().to_string()))
                    .ok_or_else(|| invalid_format("uuid", value)),
                FieldKind::Date => value
                    .get("$date")
                    .and_then(Value::as_i64)
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .map(|dt| json!(dt.date_naive().format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| invalid_format("date", value)),
                FieldKind::DateTime => value
                    .get("$date")
                    .and_then(Value::as_i64)
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .map(|dt| json!(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
                    .ok_or_else(|| invalid_format("date-time", value)),
                FieldKind::DateString => value
                    .as_str()
                    .and_then(parse_date)
                    .map(|d| json!(d.format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| invalid_format("date", value)),
                FieldKind::DateTimeString => value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| json!(dt.to_rfc3339()))
                    .ok_or_else(|| invalid_format("date-time", value)),
                FieldKind::Array { container, .. } => {
                    let Value::Array(items) = value else {
                        return Ok(value.clone());
                    };
                    let mut out = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        out.push(container.convert_valid(item, ctx).await.map_err(|e| e.prefixed(json!(index)))?);
                    }
                    Ok(Value::Array(out))
                }
                FieldKind::Object(object) => object.convert(value, ctx).await,
                FieldKind::AttributeMapped { container, mapping_attribute, .. } => {
                    let Value::Object(entries) = value else {
                        return Ok(value.clone());
                    };
                    let mut out = Vec::with_capacity(entries.len());
                    for (key, entry) in entries {
                        let converted = container
                            .convert_valid(entry, ctx)
                            .await
                            .map_err(|e| e.prefixed(json!(key)))?;
                        let mut converted = match converted {
                            Value::Object(map) => map,
                            other => {
                                let mut map = Map::new();
                                map.insert("value".into(), other);
                                map
                            }
                        };
                        converted.insert(mapping_attribute.clone(), json!(key));
                        out.push(Value::Object(converted));
                    }
                    Ok(Value::Array(out))
                }
                FieldKind::ToOne(target) => natural_keys::resolve_reference(target.name()?, value, ctx).await,
                FieldKind::ToMany(target) => {
                    let Value::Array(items) = value else {
                        return Ok(value.clone());
                    };
                    let name = target.name()?;
                    let mut ids = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        ids.push(
                            natural_keys::resolve_reference(name, item, ctx)
                                .await
                                .map_err(|e| e.prefixed(json!(index)))?,
                        );
                    }
                    Ok(Value::Array(ids))
                }
                FieldKind::Inline(target) => {
                    let resource = ctx.resource(target.name()?)?;
                    let item = resource.schema.convert(value, ConvertMode::Create, ctx).await?;
                    Ok(Value::Object(item))
                }
                _ => Ok(value.clone()),
            }
        })
    }
}

fn reference_schema(target: &ResourceRef, ctx: Context<'_>, request: bool) -> Value {
    if request {
        natural_keys::to_one_request_schema(target.target_name(), ctx)
    } else {
        natural_keys::ref_schema(&ctx.route_prefix(target.target_name()))
    }
}

fn item_ref(target: &ResourceRef, id: &Value, ctx: Context<'_>) -> Value {
    if id.is_null() {
        return Value::Null;
    }
    json!({"$ref": format!("{}/{}", ctx.route_prefix(target.target_name()), id_segment(id))})
}

/// Renders an id as a URL path segment.
pub(crate) fn id_segment(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn invalid_format(format: &str, value: &Value) -> ApiError {
    ApiError::validation(vec![], "format", json!(format), format!("{} is not a valid '{}'", value, format))
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaValidator;

    fn ctx() -> Context<'static> {
        Context::detached()
    }

    #[test]
    fn io_flags_parse() {
        assert_eq!("r".parse::<Io>().unwrap(), Io::READ);
        assert_eq!("rw".parse::<Io>().unwrap(), Io::READ_WRITE);
        assert_eq!("cr".parse::<Io>().unwrap(), Io::READ_CREATE);
        assert_eq!("w".parse::<Io>().unwrap(), Io::WRITE);
        assert!("rx".parse::<Io>().is_err());
    }

    #[test]
    fn annotations_are_emitted() {
        let field = Field::string().default(json!("Foo")).title("Name").description("A name");
        assert_eq!(
            field.response(ctx()),
            json!({"type": "string", "default": "Foo", "title": "Name", "description": "A name"})
        );
        assert_eq!(Field::integer().read_only().response(ctx()), json!({"type": "integer", "readOnly": true}));
        assert_eq!(Field::integer().read_only().request(ctx()), json!({"type": "integer"}));
    }

    #[test]
    fn nullable_schemas_accept_null() {
        let validator = crate::schema::Draft4Validator;
        let fields = vec![
            Field::string().nullable(),
            Field::integer().nullable(),
            Field::date().nullable(),
            Field::array(Field::string()).nullable(),
            Field::to_one("author").nullable(),
            Field::inline("author").nullable(),
            Field::any().nullable(),
        ];
        for field in fields {
            assert!(validator.is_valid(&Value::Null, &field.response(ctx())), "{:?}", field.kind);
            assert!(validator.is_valid(&Value::Null, &field.request(ctx())), "{:?}", field.kind);
        }
    }

    #[test]
    fn any_schema_lists_every_type() {
        assert_eq!(
            Field::any().response(ctx()),
            json!({"type": ["null", "string", "number", "boolean", "object", "array"]})
        );
    }

    #[tokio::test]
    async fn scalar_round_trips() {
        let cases = vec![
            (Field::integer(), json!(42)),
            (Field::string(), json!("Foo")),
            (Field::boolean(), json!(true)),
            (Field::positive_integer(), json!(7)),
            (Field::date_string(), json!("2020-02-29")),
        ];
        for (field, value) in cases {
            let formatted = field.format(&value, ctx());
            assert_eq!(field.convert(&formatted, ctx()).await.unwrap(), value);
        }
    }

    #[tokio::test]
    async fn convert_rejects_schema_violations() {
        let field = Field::string_with(StringOptions { max_length: Some(3), ..Default::default() });
        match field.convert(&json!("abcd"), ctx()).await {
            Err(ApiError::Validation(issues)) => assert_eq!(issues[0].validator, "maxLength"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Field::integer().convert(&json!("1"), ctx()).await.is_err());
        assert!(Field::integer().convert(&Value::Null, ctx()).await.is_err());
        assert_eq!(Field::integer().nullable().convert(&Value::Null, ctx()).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn dates_use_millisecond_wire_form() {
        let field = Field::date();
        assert_eq!(field.format(&json!("1970-01-02"), ctx()), json!({"$date": 86_400_000}));
        assert_eq!(field.convert(&json!({"$date": 86_400_000}), ctx()).await.unwrap(), json!("1970-01-02"));

        let field = Field::date_time();
        assert_eq!(field.format(&json!("1970-01-01T00:00:01.500Z"), ctx()), json!({"$date": 1500}));
        assert_eq!(
            field.convert(&json!({"$date": 1500}), ctx()).await.unwrap(),
            json!("1970-01-01T00:00:01.500Z")
        );
        assert!(field.convert(&json!({"date": 1}), ctx()).await.is_err());
    }

    #[test]
    fn naive_date_time_strings_format_as_utc() {
        assert_eq!(
            Field::date_time_string().format(&json!("2014-01-01T12:30:00"), ctx()),
            json!("2014-01-01T12:30:00+00:00")
        );
    }

    #[tokio::test]
    async fn uuid_is_normalized() {
        let value = Field::uuid()
            .convert(&json!("A1B2C3D4-0000-4000-8000-000000000001"), ctx())
            .await
            .unwrap();
        assert_eq!(value, json!("a1b2c3d4-0000-4000-8000-000000000001"));
    }

    #[tokio::test]
    async fn array_converts_element_wise_with_paths() {
        let field = Field::array_with(Field::integer(), ArrayOptions { unique: true, ..Default::default() });
        assert_eq!(
            field.request(ctx()),
            json!({"type": "array", "items": {"type": "integer"}, "uniqueItems": true})
        );
        assert_eq!(field.convert(&json!([1, 2]), ctx()).await.unwrap(), json!([1, 2]));
        match field.convert(&json!([1, "x"]), ctx()).await {
            Err(ApiError::Validation(issues)) => assert_eq!(issues[0].path, vec![json!(1)]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn attribute_mapped_swaps_keys_and_attributes() {
        let inner = Field::object(ObjectField::properties([("foo".to_string(), Field::integer())].into_iter().collect()));
        let field = Field::attribute_mapped(inner, "key", Some("^[A-Z]\\d$"));
        assert_eq!(
            field.format(&json!([{"foo": 1, "key": "A3"}, {"foo": 2, "key": "B2"}]), ctx()),
            json!({"A3": {"foo": 1}, "B2": {"foo": 2}})
        );
        assert_eq!(
            field.convert(&json!({"A3": {"foo": 1}}), ctx()).await.unwrap(),
            json!([{"foo": 1, "key": "A3"}])
        );
        assert!(field.convert(&json!({"a3": {"foo": 1}}), ctx()).await.is_err());
    }

    #[test]
    fn references_render_links() {
        let mut field = Field::to_one("author");
        field.bind("book");
        assert_eq!(field.format(&json!(3), ctx()), json!({"$ref": "/author/3"}));
        assert_eq!(field.format(&Value::Null, ctx()), Value::Null);
        let mut uri = Field::item_uri("self");
        uri.bind("book");
        assert_eq!(uri.format(&json!(1), ctx()), json!("/book/1"));
        let mut kind = Field::item_type("self");
        kind.bind("book");
        assert_eq!(kind.format(&Value::Null, ctx()), json!("book"));
    }

    #[test]
    fn bind_reaches_nested_references() {
        let mut field = Field::array(Field::to_one("self"));
        field.bind("book");
        assert_eq!(field.format(&json!([1, 2]), ctx()), json!([{"$ref": "/book/1"}, {"$ref": "/book/2"}]));
        assert!(field.resolve(&|_| false).is_ok());
    }

    #[test]
    fn ancestry_walks_to_raw() {
        let chain: Vec<FieldType> = FieldType::PositiveInteger.ancestry().collect();
        assert_eq!(chain, vec![FieldType::PositiveInteger, FieldType::Integer, FieldType::Raw]);
    }
}
