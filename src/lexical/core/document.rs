//! Documents as written to and read back from an index.
//!
//! A [`Document`] is a transient set of named fields. Each field carries one or
//! more values and a boost; the document carries a boost of its own. How a
//! field is stored or indexed is decided by the index's field catalog, not by
//! the document.
//!
//! Reading a document back yields a [`StoredDocument`] holding the stored
//! fields only, or a [`LazyDocument`] that decodes values on demand.

use std::fmt;

pub use crate::lexical::index::inverted::fields_store::{LazyDocField, LazyDocument};

/// One field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Analyzed (or indexed verbatim) when the field is indexed.
    Text(String),
    /// Stored only; binary values are never inverted.
    Binary(Vec<u8>),
}

impl FieldValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FieldValue::Text(s) => s.as_bytes(),
            FieldValue::Binary(b) => b,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Binary(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, FieldValue::Binary(_))
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Binary(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A named field with one or more values.
#[derive(Debug, Clone, PartialEq)]
pub struct DocField {
    name: String,
    values: Vec<FieldValue>,
    boost: f32,
}

impl DocField {
    pub fn new<S: Into<String>>(name: S) -> Self {
        DocField {
            name: name.into(),
            values: Vec::new(),
            boost: 1.0,
        }
    }

    pub fn with_value<V: Into<FieldValue>>(mut self, value: V) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn add_value<V: Into<FieldValue>>(&mut self, value: V) {
        self.values.push(value.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub(crate) fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    /// All values joined with a single space; binary values are rendered lossily.
    pub fn text(&self) -> String {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        parts.join(" ")
    }
}

/// A document to be indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    fields: Vec<DocField>,
    boost: f32,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Document {
            fields: Vec::new(),
            boost: 1.0,
        }
    }

    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::new()
    }

    /// Add a value, appending to an existing field of the same name.
    pub fn with_field<S: Into<String>, V: Into<FieldValue>>(mut self, name: S, value: V) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.add_value(value),
            None => self.fields.push(DocField::new(name).with_value(value)),
        }
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// Add a field, merging its values into an existing field of the same
    /// name. The boost of the added field wins.
    pub fn add_field(&mut self, field: DocField) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => {
                existing.values.extend(field.values);
                existing.boost = field.boost;
            }
            None => self.fields.push(field),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&DocField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// First value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.get_field(name).and_then(|f| f.values.first())
    }

    pub fn fields(&self) -> &[DocField] {
        &self.fields
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub(crate) fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A document read back from an index: its stored fields, in field-number
/// order, with the boosts recorded at indexing time.
pub type StoredDocument = Document;

/// Fluent construction of a [`Document`].
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        DocumentBuilder {
            document: Document::new(),
        }
    }

    pub fn add_text<S: Into<String>, T: Into<String>>(mut self, name: S, value: T) -> Self {
        self.document = self.document.with_field(name, FieldValue::Text(value.into()));
        self
    }

    pub fn add_binary<S: Into<String>>(mut self, name: S, value: Vec<u8>) -> Self {
        self.document = self.document.with_field(name, FieldValue::Binary(value));
        self
    }

    pub fn add_field(mut self, field: DocField) -> Self {
        self.document.add_field(field);
        self
    }

    pub fn boost(mut self, boost: f32) -> Self {
        self.document.boost = boost;
        self
    }

    pub fn build(self) -> Document {
        self.document
    }
}
