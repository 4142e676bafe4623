//! Documents
//!
//! A [`Document`] is a JSON object. Records are stored as the MessagePack
//! encoding of the document; the encoded length is the document's size for
//! limit checks and for the in-place eligibility test (an update whose result
//! encodes to exactly the stored length can be written without reallocating).
//!
//! Field names starting with `$` are operator names in update expressions and
//! are never allowed at the top level of a stored document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};

/// Name of the unique identifier field
pub const ID_FIELD: &str = "_id";

/// Prefix marking an operator field name
pub const OPERATOR_PREFIX: char = '$';

/// Default maximum encoded document size (16 MB)
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// A JSON object document
///
/// Newtype around `serde_json::Map` with direct access via `Deref`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Document(Map::new())
    }

    /// Wrap an existing map
    pub fn from_map(map: Map<String, Value>) -> Self {
        Document(map)
    }

    /// Unwrap into the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// View as a `serde_json::Value::Object`
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Convert into a `serde_json::Value::Object`
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// The `_id` value, if present
    pub fn id(&self) -> Option<&Value> {
        self.0.get(ID_FIELD)
    }

    /// Name of the first top-level field
    pub fn first_field_name(&self) -> Option<&str> {
        self.0.keys().next().map(String::as_str)
    }

    /// True if the first top-level field is an operator
    ///
    /// This is how an update expression is classified: an operator program
    /// starts with `$`, a literal replacement does not.
    pub fn is_operator_expression(&self) -> bool {
        self.first_field_name()
            .map_or(false, |name| name.starts_with(OPERATOR_PREFIX))
    }

    /// Reject documents with any top-level operator field
    ///
    /// # Errors
    ///
    /// Returns [`Error::MixedModifiers`] if a field name starts with `$`.
    pub fn check_no_operators(&self) -> Result<()> {
        if self.0.keys().any(|k| k.starts_with(OPERATOR_PREFIX)) {
            return Err(Error::MixedModifiers);
        }
        Ok(())
    }

    /// Encode to the stored record format (MessagePack)
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&self.0)?)
    }

    /// Decode from the stored record format
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let map: Map<String, Value> = rmp_serde::from_slice(bytes)?;
        Ok(Document(map))
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(self.encode()?.len())
    }

    /// Validate the encoded size against a limit
    ///
    /// # Errors
    ///
    /// Returns [`Error::DocumentTooLarge`] if the document exceeds `max`.
    pub fn validate_size(&self, max: usize) -> Result<()> {
        let size = self.encoded_len()?;
        if size > max {
            return Err(Error::DocumentTooLarge { size, max });
        }
        Ok(())
    }
}

impl Deref for Document {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl TryFrom<Value> for Document {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Document(map)),
            other => Err(Error::InvalidUpdate(format!(
                "expected an object, found {}",
                crate::path::type_name(&other)
            ))),
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.0)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}
