use crate::thing::Thing;

/// The Things served by a single server.
///
/// A single Thing is served at the root of the server, while each Thing of
/// a multiple group is served under its index.
#[derive(Debug, Clone)]
pub enum ThingGroup {
    /// A single Thing.
    Single(Thing),
    /// Several Things, exposed under a common name.
    Multiple {
        /// The Things, in serving order.
        things: Vec<Thing>,
        /// The group name.
        name: String,
    },
}

impl ThingGroup {
    /// Creates a [`ThingGroup`] containing a single Thing.
    #[must_use]
    pub const fn single(thing: Thing) -> Self {
        Self::Single(thing)
    }

    /// Creates a [`ThingGroup`] containing several Things.
    ///
    /// Each Thing gets the `/{index}` path prefix.
    #[must_use]
    pub fn multiple(things: Vec<Thing>, name: impl Into<String>) -> Self {
        for (index, thing) in things.iter().enumerate() {
            thing.set_href_prefix(&format!("/{index}"));
        }
        Self::Multiple {
            things,
            name: name.into(),
        }
    }

    /// Whether the group contains several Things.
    #[must_use]
    pub const fn is_multiple(&self) -> bool {
        matches!(self, Self::Multiple { .. })
    }

    /// Returns a Thing by index.
    ///
    /// A single group ignores the index.
    #[must_use]
    pub fn get_thing(&self, index: usize) -> Option<&Thing> {
        match self {
            Self::Single(thing) => Some(thing),
            Self::Multiple { things, .. } => things.get(index),
        }
    }

    /// Returns all Things.
    #[must_use]
    pub fn things(&self) -> &[Thing] {
        match self {
            Self::Single(thing) => std::slice::from_ref(thing),
            Self::Multiple { things, .. } => things,
        }
    }

    /// Returns the group name: the Thing title of a single group.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Single(thing) => thing.title(),
            Self::Multiple { name, .. } => name,
        }
    }

    /// Prefixes the path of every Thing with a base path, such as `/api`.
    ///
    /// An empty base path restores the default paths.
    pub fn set_base_path(&self, base_path: &str) {
        let base_path = base_path.trim_end_matches('/');
        match self {
            Self::Single(thing) => thing.set_href_prefix(base_path),
            Self::Multiple { things, .. } => {
                for (index, thing) in things.iter().enumerate() {
                    thing.set_href_prefix(&format!("{base_path}/{index}"));
                }
            }
        }
    }
}
