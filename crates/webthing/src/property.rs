use parking_lot::RwLock;

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::schema::{DataSchema, Link};
use crate::value::{UpdateReport, Value};

/// A named, typed, schema-constrained piece of Thing state.
///
/// A [`Property`] owns its [`Value`] and checks every external write
/// against its metadata before the value is touched.
#[derive(Debug)]
pub struct Property {
    name: String,
    value: Value,
    metadata: DataSchema,
    href_prefix: RwLock<String>,
}

impl Property {
    /// Creates a [`Property`].
    #[must_use]
    pub fn new(name: impl Into<String>, value: Value, metadata: DataSchema) -> Self {
        Self {
            name: name.into(),
            value,
            metadata,
            href_prefix: RwLock::new(String::new()),
        }
    }

    /// Returns the property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the property metadata.
    #[must_use]
    pub const fn metadata(&self) -> &DataSchema {
        &self.metadata
    }

    /// Returns the underlying [`Value`].
    ///
    /// Device code uses it to report new readings through
    /// [`Value::notify_of_external_update`]. Listeners of the value must not
    /// write it: such writes are refused.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Returns the property path.
    #[must_use]
    pub fn href(&self) -> String {
        format!("{}/properties/{}", self.href_prefix.read(), self.name)
    }

    /// Sets the prefix of all paths of this property.
    pub fn set_href_prefix(&self, prefix: &str) {
        *self.href_prefix.write() = prefix.to_owned();
    }

    /// Checks whether a value can be written into this property.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ErrorKind::Validation`] error if the
    /// property is read-only or the value violates the metadata.
    pub fn validate_value(&self, value: &JsonValue) -> Result<()> {
        if self.metadata.read_only {
            return Err(Error::validation(format!(
                "Property `{}` is read-only",
                self.name
            )));
        }

        self.metadata.validate(value)
    }

    /// Returns the current value.
    #[must_use]
    pub fn get_value(&self) -> JsonValue {
        self.value.get()
    }

    /// Writes a value requested through the API.
    ///
    /// # Errors
    ///
    /// - [`crate::error::ErrorKind::Validation`] when the property is
    ///   read-only or the value violates the metadata; the value is not
    ///   touched.
    /// - [`crate::error::ErrorKind::ForwardRejected`] when the device refuses
    ///   the value.
    pub fn set_value(&self, value: impl Into<JsonValue>) -> Result<UpdateReport> {
        let value = value.into();
        self.validate_value(&value)?;
        self.value.set(value)
    }

    /// Returns the property description: its metadata plus a link to the
    /// property itself.
    #[must_use]
    pub fn as_description(&self) -> DataSchema {
        let mut description = self.metadata.clone();
        description.links.push(Link::new("property", self.href()));
        description
    }
}
