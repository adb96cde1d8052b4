//! Schema-driven structural validation.
//!
//! A single stateless walk from the bundle root through each entry's
//! resource against its schema tree. All applicable checks are emitted per
//! element and the walk never short-circuits. Every finding carries
//! `source = STRUCTURE`, a stable error code, the FHIR dotted path and the
//! RFC 6901 pointer of the offending element.
//!
//! The walk recurses by schema: unknown properties are not descended into.
//! `Bundle.entry[i].resource` is special-cased - the sub-schema is resolved
//! through the catalog from the resource's own `resourceType`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::builder::ErrorBuilder;
use crate::schema::{SchemaCatalog, SchemaNode};
use crate::types::{FhirVersion, ValidationError};
use crate::valueset::{BindingStrength, EnumIndex};
use bv_foundation::pointer;

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.-]{1,64}$").unwrap());

static RELATIVE_REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z]+/[A-Za-z0-9.-]{1,64}$").unwrap());
static UUID_URN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^urn:uuid:[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .unwrap()
});
static ABSOLUTE_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^\s]+/[A-Z][A-Za-z]+/[A-Za-z0-9.-]{1,64}$").unwrap()
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^\s]+$").unwrap());

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?$",
    )
    .unwrap()
});
static DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$",
    )
    .unwrap()
});
static INSTANT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))$",
    )
    .unwrap()
});
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?$").unwrap());

/// Traversal cursor: the JSON Pointer and FHIR dotted path of the current
/// element, plus the enclosing resource context.
#[derive(Debug, Clone)]
struct Cursor {
    pointer: String,
    path: String,
    resource_type: String,
    entry_index: Option<usize>,
    last_index: Option<usize>,
}

impl Cursor {
    fn root() -> Self {
        Self {
            pointer: String::new(),
            path: "Bundle".to_string(),
            resource_type: "Bundle".to_string(),
            entry_index: None,
            last_index: None,
        }
    }

    fn child(&self, name: &str) -> Self {
        Self {
            pointer: pointer::push_token(&self.pointer, name),
            path: format!("{}.{name}", self.path),
            resource_type: self.resource_type.clone(),
            entry_index: self.entry_index,
            last_index: self.last_index,
        }
    }

    fn index(&self, i: usize) -> Self {
        Self {
            pointer: pointer::push_index(&self.pointer, i),
            path: format!("{}[{i}]", self.path),
            resource_type: self.resource_type.clone(),
            entry_index: self.entry_index,
            last_index: Some(i),
        }
    }

    fn enter_resource(&self, resource_type: &str) -> Self {
        Self {
            pointer: self.pointer.clone(),
            path: resource_type.to_string(),
            resource_type: resource_type.to_string(),
            entry_index: self.last_index.or(self.entry_index),
            last_index: None,
        }
    }
}

/// Stateless structural walk over a bundle.
pub struct StructuralValidator<'a> {
    catalog: &'a dyn SchemaCatalog,
    enums: &'a dyn EnumIndex,
    version: FhirVersion,
}

impl<'a> StructuralValidator<'a> {
    pub fn new(
        catalog: &'a dyn SchemaCatalog,
        enums: &'a dyn EnumIndex,
        version: FhirVersion,
    ) -> Self {
        Self {
            catalog,
            enums,
            version,
        }
    }

    /// Walk the bundle, appending findings to `errors`.
    pub fn validate(&self, bundle: &Value, errors: &mut Vec<ValidationError>) {
        let Some(schema) = self.catalog.get("Bundle") else {
            return;
        };
        let cursor = Cursor::root();
        if !bundle.is_object() {
            self.emit_shape(errors, &cursor, "FHIR_OBJECT_EXPECTED", "Bundle");
            return;
        }
        self.walk_object(bundle, schema, &cursor, errors);
    }

    // Depth-first pre-order, following schema child order.
    fn walk_object(
        &self,
        value: &Value,
        schema: &SchemaNode,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        self.check_value_x(value, schema, cursor, errors);

        for child in &schema.children {
            self.walk_child(value, child, cursor, errors);
        }
    }

    fn walk_child(
        &self,
        parent: &Value,
        child: &SchemaNode,
        parent_cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        let name = child.element_name.as_str();
        let cursor = parent_cursor.child(name);

        let value = match parent.get(name) {
            // Absent: the error anchors at the parent so the pointer still
            // resolves against the document.
            None => {
                if child.min >= 1 {
                    self.emit_missing(errors, &parent_cursor.pointer, &cursor, child);
                }
                return;
            }
            Some(Value::Null) => {
                if child.min >= 1 {
                    self.emit_missing(errors, &cursor.pointer, &cursor, child);
                }
                return;
            }
            Some(value) => value,
        };

        if child.is_array {
            let Some(items) = value.as_array() else {
                errors.push(
                    self.builder("FHIR_ARRAY_EXPECTED", &cursor)
                        .detail("type", child.type_name.as_str())
                        .build(),
                );
                return;
            };
            if items.is_empty() && child.min >= 1 {
                self.emit_missing(errors, &cursor.pointer, &cursor, child);
            }
            let below_min = (items.len() as u32) < child.min && !items.is_empty();
            let above_max = child.max_count().is_some_and(|max| items.len() > max);
            if below_min || above_max {
                errors.push(
                    self.builder("ARRAY_LENGTH_OUT_OF_RANGE", &cursor)
                        .detail("min", child.min)
                        .detail("max", child.max.as_str())
                        .detail("actual", items.len())
                        .build(),
                );
            }
            for (i, item) in items.iter().enumerate() {
                self.validate_node(item, child, &cursor.index(i), errors);
            }
        } else {
            if value.is_array() {
                if is_complex_type(&child.type_name) {
                    self.emit_shape(errors, &cursor, "FHIR_OBJECT_EXPECTED", &child.type_name);
                } else {
                    errors.push(
                        self.builder("FHIR_INVALID_PRIMITIVE", &cursor)
                            .detail("type", child.type_name.as_str())
                            .detail("reason", "unexpected array")
                            .build(),
                    );
                }
                return;
            }
            if child.min >= 1 && value.as_str().is_some_and(str::is_empty) {
                self.emit_missing(errors, &cursor.pointer, &cursor, child);
            }
            self.validate_node(value, child, &cursor, errors);
        }
    }

    fn validate_node(
        &self,
        value: &Value,
        schema: &SchemaNode,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        match schema.type_name.as_str() {
            "Resource" => self.validate_resource(value, cursor, errors),
            "Extension" => self.validate_extension(value, cursor, errors),
            "Reference" => {
                if !value.is_object() {
                    self.emit_shape(errors, cursor, "FHIR_OBJECT_EXPECTED", "Reference");
                    return;
                }
                self.validate_reference(value, cursor, errors);
                self.walk_object(value, schema, cursor, errors);
            }
            type_name if is_complex_type(type_name) => {
                if !value.is_object() {
                    self.emit_shape(errors, cursor, "FHIR_OBJECT_EXPECTED", type_name);
                    return;
                }
                self.walk_object(value, schema, cursor, errors);
            }
            _ => self.validate_primitive(value, schema, cursor, errors),
        }
    }

    // Bundle.entry[i].resource: the sub-schema comes from the resource's
    // own resourceType. Unknown types are left alone.
    fn validate_resource(
        &self,
        value: &Value,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        if !value.is_object() {
            self.emit_shape(errors, cursor, "FHIR_OBJECT_EXPECTED", "Resource");
            return;
        }
        let Some(resource_type) = value.get("resourceType").and_then(Value::as_str) else {
            return;
        };
        let Some(schema) = self.catalog.get(resource_type) else {
            return;
        };
        let cursor = cursor.enter_resource(resource_type);
        self.walk_object(value, schema, &cursor, errors);
    }

    // At most one sibling named value* when the schema declares a
    // polymorphic choice.
    fn check_value_x(
        &self,
        value: &Value,
        schema: &SchemaNode,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        if schema.value_children().count() < 2 {
            return;
        }
        let Some(object) = value.as_object() else {
            return;
        };
        let present: Vec<&str> = object
            .keys()
            .filter(|k| k.starts_with("value"))
            .map(String::as_str)
            .collect();
        if present.len() > 1 {
            errors.push(
                self.builder("FHIR_MULTIPLE_VALUE_X", cursor)
                    .detail("present", present)
                    .build(),
            );
        }
    }

    fn validate_extension(
        &self,
        value: &Value,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(object) = value.as_object() else {
            self.emit_shape(errors, cursor, "FHIR_OBJECT_EXPECTED", "Extension");
            return;
        };

        let url_ok = object
            .get("url")
            .and_then(Value::as_str)
            .is_some_and(|url| !url.is_empty());
        if !url_ok {
            errors.push(self.builder("FHIR_EXTENSION_MISSING_URL", cursor).build());
        }

        let value_keys: Vec<&str> = object
            .keys()
            .filter(|k| k.starts_with("value"))
            .map(String::as_str)
            .collect();
        let has_nested = object
            .get("extension")
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty());

        if value_keys.len() > 1 {
            errors.push(
                self.builder("FHIR_MULTIPLE_VALUE_X", cursor)
                    .detail("present", value_keys.clone())
                    .build(),
            );
        }
        let has_value = !value_keys.is_empty();
        if has_value == has_nested {
            errors.push(
                self.builder("FHIR_EXTENSION_INVALID_SHAPE", cursor)
                    .detail("hasValue", has_value)
                    .detail("hasNested", has_nested)
                    .build(),
            );
        }

        if let Some(nested) = object.get("extension").and_then(Value::as_array) {
            let nested_cursor = cursor.child("extension");
            for (i, item) in nested.iter().enumerate() {
                self.validate_extension(item, &nested_cursor.index(i), errors);
            }
        }
    }

    // Both findings anchor at the Reference object itself.
    fn validate_reference(
        &self,
        value: &Value,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        let has_reference = value.get("reference").is_some();
        let has_identifier = value.get("identifier").is_some();

        if has_reference && has_identifier {
            errors.push(
                self.builder("FHIR_REFERENCE_INVALID_COMBINATION", cursor)
                    .build(),
            );
        }

        if let Some(reference) = value.get("reference").and_then(Value::as_str) {
            if !is_valid_reference_literal(reference) {
                errors.push(
                    self.builder("FHIR_INVALID_REFERENCE_FORMAT", cursor)
                        .detail("value", reference)
                        .build(),
                );
            }
        }
    }

    fn validate_primitive(
        &self,
        value: &Value,
        schema: &SchemaNode,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        let type_name = schema.type_name.as_str();
        match type_name {
            "id" => {
                let Some(s) = value.as_str() else {
                    self.emit_primitive(errors, cursor, type_name, value);
                    return;
                };
                if !ID_RE.is_match(s) {
                    errors.push(
                        self.builder("FHIR_INVALID_ID_FORMAT", cursor)
                            .detail("value", s)
                            .build(),
                    );
                }
            }
            "string" | "markdown" => {
                let Some(s) = value.as_str() else {
                    self.emit_primitive(errors, cursor, type_name, value);
                    return;
                };
                if type_name == "string" && (s.contains('\n') || s.contains('\r')) {
                    errors.push(self.builder("FHIR_INVALID_STRING_NEWLINE", cursor).build());
                }
            }
            "code" => {
                let Some(s) = value.as_str() else {
                    self.emit_primitive(errors, cursor, type_name, value);
                    return;
                };
                if !is_valid_code_literal(s) {
                    errors.push(
                        self.builder("FHIR_INVALID_CODE_LITERAL", cursor)
                            .detail("value", s)
                            .build(),
                    );
                }
                self.check_enum(s, schema, cursor, errors);
            }
            "uri" => {
                let Some(s) = value.as_str() else {
                    self.emit_primitive(errors, cursor, type_name, value);
                    return;
                };
                if s.is_empty() || s.chars().any(|c| c.is_whitespace() || is_control(c)) {
                    errors.push(
                        self.builder("FHIR_INVALID_URI", cursor)
                            .detail("value", s)
                            .build(),
                    );
                }
            }
            "url" => {
                let Some(s) = value.as_str() else {
                    self.emit_primitive(errors, cursor, type_name, value);
                    return;
                };
                if !URL_RE.is_match(s) {
                    errors.push(
                        self.builder("FHIR_INVALID_URL", cursor)
                            .detail("value", s)
                            .build(),
                    );
                }
            }
            "canonical" => {
                let Some(s) = value.as_str() else {
                    self.emit_primitive(errors, cursor, type_name, value);
                    return;
                };
                let (base, version_suffix) = match s.split_once('|') {
                    Some((base, suffix)) => (base, Some(suffix)),
                    None => (s, None),
                };
                if !URL_RE.is_match(base) || version_suffix.is_some_and(str::is_empty) {
                    errors.push(
                        self.builder("FHIR_INVALID_CANONICAL", cursor)
                            .detail("value", s)
                            .build(),
                    );
                }
            }
            "boolean" => {
                if !value.is_boolean() {
                    self.emit_primitive(errors, cursor, type_name, value);
                }
            }
            "integer" => {
                if !(value.is_i64() || value.is_u64()) {
                    self.emit_primitive(errors, cursor, type_name, value);
                }
            }
            "positiveInt" => {
                if !value.as_u64().is_some_and(|n| n >= 1) {
                    self.emit_primitive(errors, cursor, type_name, value);
                }
            }
            "unsignedInt" => {
                if value.as_u64().is_none() {
                    self.emit_primitive(errors, cursor, type_name, value);
                }
            }
            "decimal" => {
                if !value.is_number() {
                    self.emit_primitive(errors, cursor, type_name, value);
                }
            }
            "date" | "dateTime" | "instant" | "time" => {
                let re = match type_name {
                    "date" => &DATE_RE,
                    "dateTime" => &DATE_TIME_RE,
                    "instant" => &INSTANT_RE,
                    _ => &TIME_RE,
                };
                if !value.as_str().is_some_and(|s| re.is_match(s)) {
                    self.emit_primitive(errors, cursor, type_name, value);
                }
            }
            _ => {}
        }
    }

    // Enum membership for code elements. A not-indexed value set with a
    // required or preferred binding is surfaced once per element as an
    // advisory skip; extensible and example bindings stay silent.
    fn check_enum(
        &self,
        value: &str,
        schema: &SchemaNode,
        cursor: &Cursor,
        errors: &mut Vec<ValidationError>,
    ) {
        let resource_type = cursor.resource_type.as_str();
        let element = schema.element_name.as_str();
        let strength = self.enums.binding_strength(self.version, resource_type, element);

        match self.enums.allowed_values(self.version, resource_type, element) {
            Some(values) => {
                if !values.iter().any(|v| v == value) {
                    let mut builder = self
                        .builder("INVALID_ENUM_VALUE", cursor)
                        .detail("value", value)
                        .detail(
                            "allowedValues",
                            Value::Array(
                                values.iter().cloned().map(Value::String).collect(),
                            ),
                        );
                    if let Some(strength) = strength {
                        builder = builder.detail("bindingStrength", strength.to_string());
                    }
                    errors.push(builder.build());
                }
            }
            None => {
                if matches!(
                    strength,
                    Some(BindingStrength::Required) | Some(BindingStrength::Preferred)
                ) {
                    errors.push(
                        self.builder("ENUM_VALIDATION_SKIPPED", cursor)
                            .detail("reason", "ValueSet not supported by enum index")
                            .detail(
                                "bindingStrength",
                                strength.map(|s| s.to_string()).unwrap_or_default(),
                            )
                            .build(),
                    );
                }
            }
        }
    }

    fn builder(&self, code: &str, cursor: &Cursor) -> ErrorBuilder {
        let mut builder = ErrorBuilder::structural(code)
            .path(cursor.path.clone())
            .json_pointer(cursor.pointer.clone());
        if cursor.resource_type != "Bundle" {
            builder = builder.resource_type(cursor.resource_type.clone());
        }
        if let Some(entry_index) = cursor.entry_index {
            builder = builder.entry_index(entry_index);
        }
        builder
    }

    fn emit_missing(
        &self,
        errors: &mut Vec<ValidationError>,
        anchor_pointer: &str,
        cursor: &Cursor,
        child: &SchemaNode,
    ) {
        let mut builder = ErrorBuilder::structural("REQUIRED_FIELD_MISSING")
            .path(cursor.path.clone())
            .json_pointer(anchor_pointer)
            .detail("element", child.element_name.as_str())
            .detail("min", child.min);
        if cursor.resource_type != "Bundle" {
            builder = builder.resource_type(cursor.resource_type.clone());
        }
        if let Some(entry_index) = cursor.entry_index {
            builder = builder.entry_index(entry_index);
        }
        errors.push(builder.build());
    }

    fn emit_shape(
        &self,
        errors: &mut Vec<ValidationError>,
        cursor: &Cursor,
        code: &str,
        type_name: &str,
    ) {
        errors.push(self.builder(code, cursor).detail("type", type_name).build());
    }

    fn emit_primitive(
        &self,
        errors: &mut Vec<ValidationError>,
        cursor: &Cursor,
        type_name: &str,
        value: &Value,
    ) {
        let mut builder = self
            .builder("FHIR_INVALID_PRIMITIVE", cursor)
            .detail("type", type_name);
        if value.is_string() || value.is_number() || value.is_boolean() {
            builder = builder.detail("value", value.clone());
        }
        errors.push(builder.build());
    }
}

fn is_complex_type(type_name: &str) -> bool {
    type_name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn is_control(c: char) -> bool {
    let code = c as u32;
    code <= 0x1F || (0x7F..=0x9F).contains(&code)
}

fn is_valid_code_literal(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(|c| c.is_ascii_whitespace() || is_control(c))
}

/// The three accepted reference literal forms: relative `Type/id`,
/// `urn:uuid:` URN, or an absolute URL ending in `/Type/id`.
pub fn is_valid_reference_literal(s: &str) -> bool {
    RELATIVE_REFERENCE_RE.is_match(s)
        || UUID_URN_RE.is_match(s)
        || ABSOLUTE_REFERENCE_RE.is_match(s)
}

/// Classify a reference literal for resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget<'a> {
    /// `Type/id`, either bare or as the tail of an absolute URL.
    Local { resource_type: &'a str, id: &'a str },
    /// `urn:uuid:...`, matched against `entry.fullUrl`.
    Urn(&'a str),
}

/// Parse a valid reference literal into its resolution target.
pub fn reference_target(s: &str) -> Option<ReferenceTarget<'_>> {
    if UUID_URN_RE.is_match(s) {
        return Some(ReferenceTarget::Urn(s));
    }
    if RELATIVE_REFERENCE_RE.is_match(s) {
        let (resource_type, id) = s.split_once('/')?;
        return Some(ReferenceTarget::Local { resource_type, id });
    }
    if ABSOLUTE_REFERENCE_RE.is_match(s) {
        let mut tail = s.rsplitn(3, '/');
        let id = tail.next()?;
        let resource_type = tail.next()?;
        return Some(ReferenceTarget::Local { resource_type, id });
    }
    None
}
