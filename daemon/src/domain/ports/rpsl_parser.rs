//! Driven port for turning object text into [`RpslObject`]s.

use crate::domain::RpslObject;

use super::define_port_error;

define_port_error! {
    /// Errors raised when object text is not a usable RPSL object.
    pub enum RpslParseError {
        /// The text has no attributes.
        Empty => "empty RPSL object",
        /// A required attribute is missing.
        MissingAttribute { object_class: String, attribute: String } =>
            "{object_class} object has no {attribute} attribute",
        /// The object is structurally invalid.
        Invalid { message: String } => "invalid RPSL object: {message}",
    }
}

/// Port for parsing object text.
#[cfg_attr(test, mockall::automock)]
pub trait RpslParser: Send + Sync {
    /// Parse one object.
    ///
    /// # Errors
    ///
    /// Returns [`RpslParseError`] when the class, primary key or source
    /// cannot be determined.
    fn parse(&self, text: &str) -> Result<RpslObject, RpslParseError>;
}
