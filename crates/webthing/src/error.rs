use std::borrow::Cow;

/// All possible error kinds produced by a Thing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A property write or an action input violates its declared schema.
    Validation,
    /// The device refused to apply a requested property value.
    ForwardRejected,
    /// No property, action, or event with the given name exists.
    UnknownName,
    /// No action with the given identifier exists.
    UnknownId,
    /// The body of an action failed.
    ActionExecution,
    /// A message could not be delivered to a subscriber.
    SubscriberDelivery,
    /// An internal failure, such as a missing asynchronous runtime.
    Internal,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::ForwardRejected => "Forward Rejected",
            Self::UnknownName => "Unknown Name",
            Self::UnknownId => "Unknown Identifier",
            Self::ActionExecution => "Action Execution",
            Self::SubscriberDelivery => "Subscriber Delivery",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A Thing error.
///
/// Contains the [`ErrorKind`] and a description of what went wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Creates a [`ErrorKind::Validation`] error.
    #[inline]
    pub fn validation(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Validation, description)
    }

    /// Creates a [`ErrorKind::ForwardRejected`] error.
    ///
    /// Value forwarders return this error to refuse a value.
    #[inline]
    pub fn forward_rejected(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ForwardRejected, description)
    }

    /// Creates a [`ErrorKind::ActionExecution`] error.
    ///
    /// Action bodies return this error to signal a failure.
    #[inline]
    pub fn action_execution(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ActionExecution, description)
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn unknown_name(what: &str, name: &str) -> Self {
        Self::new(ErrorKind::UnknownName, format!("No {what} named `{name}`"))
    }

    pub(crate) fn unknown_id(name: &str, id: &str) -> Self {
        Self::new(
            ErrorKind::UnknownId,
            format!("No `{name}` action with identifier `{id}`"),
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Internal, format!("Serialization failure: {e}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
