/// Error responses and the status codes of Thing errors.
pub mod error;
