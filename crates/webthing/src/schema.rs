use indexmap::IndexMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{Error, Result};

/// Primitive JSON types a [`DataSchema`] can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    /// The `null` value.
    Null,
    /// A boolean.
    Boolean,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// Any number.
    Number,
    /// A number without a fractional part.
    Integer,
    /// A string.
    String,
}

impl JsonType {
    fn matches(self, value: &JsonValue) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Number => value.is_number(),
            Self::Integer => match value {
                JsonValue::Number(number) => {
                    number.is_i64()
                        || number.is_u64()
                        || number.as_f64().is_some_and(|n| n.fract() == 0.0)
                }
                _ => false,
            },
            Self::String => value.is_string(),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }
}

impl std::fmt::Display for JsonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A hypermedia link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// Relation type.
    pub rel: String,
    /// Link target.
    pub href: String,
    /// Media type of the target resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Link {
    /// Creates a [`Link`].
    #[must_use]
    pub fn new(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
            media_type: None,
        }
    }

    /// Sets the media type.
    #[must_use]
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

/// A JSON-schema-like description of a piece of data.
///
/// Describes property values, action inputs, and event payloads. The
/// recognized keys are typed fields, so constraints are checked by
/// [`DataSchema::validate`]. Unrecognized keys are kept in
/// [`DataSchema::extra`] and serialized back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSchema {
    /// Semantic annotation, serialized as `@type`.
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<String>,
    /// Human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON type of the data.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub json_type: Option<JsonType>,
    /// Measurement unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Inclusive lower bound for numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    /// Inclusive upper bound for numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    /// Numbers must be a multiple of this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<Number>,
    /// Allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enumeration: Vec<JsonValue>,
    /// Whether external writes are refused.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    /// Schemas of the members of an object.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, DataSchema>,
    /// Members an object must contain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Schema of the elements of an array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<DataSchema>>,
    /// Hypermedia links.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    /// Unrecognized keys.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn into_number(value: impl Into<JsonValue>) -> Option<Number> {
    match value.into() {
        JsonValue::Number(number) => Some(number),
        _ => None,
    }
}

impl DataSchema {
    /// Creates an empty [`DataSchema`], which accepts any value.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [`DataSchema`] of the given [`JsonType`].
    #[must_use]
    pub fn of_type(json_type: JsonType) -> Self {
        Self {
            json_type: Some(json_type),
            ..Self::default()
        }
    }

    /// Sets the `@type` semantic annotation.
    #[must_use]
    pub fn semantic_type(mut self, semantic_type: impl Into<String>) -> Self {
        self.semantic_type = Some(semantic_type.into());
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the inclusive lower bound.
    ///
    /// Non-finite numbers are ignored.
    #[must_use]
    pub fn minimum(mut self, minimum: impl Into<JsonValue>) -> Self {
        self.minimum = into_number(minimum);
        self
    }

    /// Sets the inclusive upper bound.
    ///
    /// Non-finite numbers are ignored.
    #[must_use]
    pub fn maximum(mut self, maximum: impl Into<JsonValue>) -> Self {
        self.maximum = into_number(maximum);
        self
    }

    /// Requires numbers to be a multiple of the given value.
    #[must_use]
    pub fn multiple_of(mut self, multiple_of: impl Into<JsonValue>) -> Self {
        self.multiple_of = into_number(multiple_of);
        self
    }

    /// Restricts the data to the given values.
    #[must_use]
    pub fn enumeration<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        self.enumeration = values.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the data as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Adds the schema of an object member.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: DataSchema) -> Self {
        let _ = self.properties.insert(name.into(), schema);
        self
    }

    /// Adds the schema of a mandatory object member.
    #[must_use]
    pub fn required_property(mut self, name: impl Into<String>, schema: DataSchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        let _ = self.properties.insert(name, schema);
        self
    }

    /// Sets the schema of the elements of an array.
    #[must_use]
    pub fn items(mut self, items: DataSchema) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Adds a [`Link`].
    #[must_use]
    pub fn link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Adds an unrecognized key, which is serialized unchanged.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        let _ = self.extra.insert(key.into(), value.into());
        self
    }

    /// Checks a value against the constraints of this schema.
    ///
    /// The `readOnly` flag is not considered here since it concerns who
    /// writes a value, not its shape.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ErrorKind::Validation`] error describing the
    /// first violated constraint.
    pub fn validate(&self, value: &JsonValue) -> Result<()> {
        self.validate_at("value", value)
    }

    fn validate_at(&self, path: &str, value: &JsonValue) -> Result<()> {
        if let Some(json_type) = self.json_type
            && !json_type.matches(value)
        {
            return Err(Error::validation(format!(
                "Expected `{path}` of type `{json_type}`, found `{value}`"
            )));
        }

        if !self.enumeration.is_empty() && !self.enumeration.contains(value) {
            return Err(Error::validation(format!(
                "`{path}` is `{value}`, which is not one of {}",
                JsonValue::Array(self.enumeration.clone())
            )));
        }

        if let JsonValue::Number(number) = value {
            self.validate_number(path, number)?;
        }

        if let JsonValue::Object(members) = value {
            for name in &self.required {
                if !members.contains_key(name) {
                    return Err(Error::validation(format!(
                        "`{path}` is missing the required member `{name}`"
                    )));
                }
            }

            for (name, schema) in &self.properties {
                if let Some(member) = members.get(name) {
                    schema.validate_at(&format!("{path}.{name}"), member)?;
                }
            }
        }

        if let (JsonValue::Array(elements), Some(items)) = (value, &self.items) {
            for (index, element) in elements.iter().enumerate() {
                items.validate_at(&format!("{path}[{index}]"), element)?;
            }
        }

        Ok(())
    }

    fn validate_number(&self, path: &str, number: &Number) -> Result<()> {
        let Some(n) = number.as_f64() else {
            return Ok(());
        };

        if let Some(minimum) = &self.minimum
            && minimum.as_f64().is_some_and(|minimum| n < minimum)
        {
            return Err(Error::validation(format!(
                "`{path}` is {number}, which is less than the minimum {minimum}"
            )));
        }

        if let Some(maximum) = &self.maximum
            && maximum.as_f64().is_some_and(|maximum| n > maximum)
        {
            return Err(Error::validation(format!(
                "`{path}` is {number}, which is greater than the maximum {maximum}"
            )));
        }

        if let Some(multiple_of) = &self.multiple_of
            && let Some(step) = multiple_of.as_f64()
            && step != 0.0
        {
            let quotient = n / step;
            if (quotient - quotient.round()).abs() > f64::EPSILON * quotient.abs().max(1.0) {
                return Err(Error::validation(format!(
                    "`{path}` is {number}, which is not a multiple of {multiple_of}"
                )));
            }
        }

        Ok(())
    }
}

/// The declaration of an action a Thing can perform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    /// Semantic annotation, serialized as `@type`.
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<String>,
    /// Human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schema of the action input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<DataSchema>,
    /// Hypermedia links.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    /// Unrecognized keys.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ActionMetadata {
    /// Creates an empty [`ActionMetadata`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `@type` semantic annotation.
    #[must_use]
    pub fn semantic_type(mut self, semantic_type: impl Into<String>) -> Self {
        self.semantic_type = Some(semantic_type.into());
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the input schema.
    #[must_use]
    pub fn input(mut self, input: DataSchema) -> Self {
        self.input = Some(input);
        self
    }

    /// Checks an action input against the input schema.
    ///
    /// An action without an input schema accepts any input.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ErrorKind::Validation`] error if the input
    /// violates the schema, or if the schema requires an input and none
    /// was given.
    pub fn validate_input(&self, input: Option<&JsonValue>) -> Result<()> {
        let Some(schema) = &self.input else {
            return Ok(());
        };

        match input {
            Some(input) => schema.validate(input),
            None if schema.required.is_empty() && schema.json_type.is_none() => Ok(()),
            None => Err(Error::validation("Missing action input")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::error::ErrorKind;

    use super::{ActionMetadata, DataSchema, JsonType, Link};

    fn level() -> DataSchema {
        DataSchema::of_type(JsonType::Integer)
            .title("Level")
            .minimum(0)
            .maximum(100)
            .unit("percent")
    }

    #[test]
    fn integer_range() {
        let schema = level();

        assert!(schema.validate(&json!(0)).is_ok());
        assert!(schema.validate(&json!(100)).is_ok());
        assert!(schema.validate(&json!(42.0)).is_ok());

        let error = schema.validate(&json!(150)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(
            error.description(),
            "`value` is 150, which is greater than the maximum 100"
        );

        assert!(schema.validate(&json!(-1)).is_err());
        assert!(schema.validate(&json!(4.5)).is_err());
        assert!(schema.validate(&json!("50")).is_err());
    }

    #[test]
    fn enumeration_and_multiple_of() {
        let mode = DataSchema::of_type(JsonType::String).enumeration(["auto", "manual"]);
        assert!(mode.validate(&json!("auto")).is_ok());
        assert!(mode.validate(&json!("off")).is_err());

        let step = DataSchema::of_type(JsonType::Number).multiple_of(0.5);
        assert!(step.validate(&json!(2.5)).is_ok());
        assert!(step.validate(&json!(2.25)).is_err());
    }

    #[test]
    fn nested_object() {
        let input = DataSchema::of_type(JsonType::Object)
            .required_property("level", level())
            .required_property(
                "duration",
                DataSchema::of_type(JsonType::Integer).minimum(1),
            );

        assert!(input.validate(&json!({"level": 50, "duration": 1000})).is_ok());

        let error = input.validate(&json!({"level": 50})).unwrap_err();
        assert_eq!(
            error.description(),
            "`value` is missing the required member `duration`"
        );

        let error = input
            .validate(&json!({"level": 101, "duration": 1000}))
            .unwrap_err();
        assert_eq!(
            error.description(),
            "`value.level` is 101, which is greater than the maximum 100"
        );
    }

    #[test]
    fn array_items() {
        let schema = DataSchema::of_type(JsonType::Array).items(DataSchema::of_type(JsonType::Boolean));
        assert!(schema.validate(&json!([true, false])).is_ok());
        assert!(schema.validate(&json!([true, 1])).is_err());
    }

    #[test]
    fn serialization_keeps_keys_and_order() {
        let schema = DataSchema::of_type(JsonType::Integer)
            .semantic_type("BrightnessProperty")
            .title("Brightness")
            .minimum(0)
            .maximum(100)
            .read_only()
            .link(Link::new("property", "/properties/brightness"))
            .extra("x-vendor", "acme");

        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value,
            json!({
                "@type": "BrightnessProperty",
                "title": "Brightness",
                "type": "integer",
                "minimum": 0,
                "maximum": 100,
                "readOnly": true,
                "links": [{"rel": "property", "href": "/properties/brightness"}],
                "x-vendor": "acme",
            })
        );

        let parsed: DataSchema = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn action_input() {
        let metadata = ActionMetadata::new().title("Fade").input(
            DataSchema::of_type(JsonType::Object).required_property("level", level()),
        );

        assert!(metadata.validate_input(Some(&json!({"level": 10}))).is_ok());
        assert!(metadata.validate_input(Some(&json!({"level": 200}))).is_err());
        assert!(metadata.validate_input(None).is_err());

        assert!(ActionMetadata::new().validate_input(None).is_ok());
    }
}
