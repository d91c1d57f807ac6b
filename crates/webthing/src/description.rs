use indexmap::IndexMap;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};

use crate::schema::{ActionMetadata, DataSchema, Link};

/// The default `@context` of a Thing.
pub const DEFAULT_CONTEXT: &str = "https://webthings.io/schemas";

/// The name of the security scheme advertised when no authentication is
/// performed.
const NO_SECURITY: &str = "nosec_sc";

/// The description document of a Thing.
///
/// Produced on demand by [`crate::thing::Thing::as_thing_description`]; the
/// server completes it with the fields that depend on the request, see
/// [`ThingDescription::base`], [`ThingDescription::link`] and
/// [`ThingDescription::no_security`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThingDescription {
    /// Thing identifier.
    pub id: String,
    /// Thing title.
    pub title: String,
    /// Vocabulary context.
    #[serde(rename = "@context")]
    pub context: String,
    /// Semantic capabilities.
    #[serde(rename = "@type", skip_serializing_if = "Vec::is_empty")]
    pub semantic_types: Vec<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Property descriptions, in insertion order.
    pub properties: IndexMap<String, DataSchema>,
    /// Available action descriptions.
    pub actions: IndexMap<String, ActionMetadata>,
    /// Available event descriptions.
    pub events: IndexMap<String, DataSchema>,
    /// Hypermedia links.
    pub links: Vec<Link>,
    /// Thing path, set when several Things are listed together.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Base `URL` of every relative link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Security schemes.
    #[serde(
        rename = "securityDefinitions",
        skip_serializing_if = "Option::is_none"
    )]
    pub security_definitions: Option<Map<String, JsonValue>>,
    /// Security scheme in use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
}

impl ThingDescription {
    /// Sets the Thing path.
    #[must_use]
    pub fn href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    /// Sets the base `URL`.
    #[must_use]
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Adds a link.
    #[must_use]
    pub fn link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Declares that no authentication is required.
    #[must_use]
    pub fn no_security(mut self) -> Self {
        let mut definitions = Map::new();
        let _ = definitions.insert(NO_SECURITY.into(), json!({"scheme": "nosec"}));
        self.security_definitions = Some(definitions);
        self.security = Some(NO_SECURITY.into());
        self
    }
}
