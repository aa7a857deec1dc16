use indexmap::IndexMap;
use serde::Serialize;

pub const ID_FIELD: &str = "CMIT ID";
pub const VARIANT_FIELD: &str = "Variant ID";
pub const MEASURE_NAME_FIELD: &str = "Measure Name";
pub const METADATA_FIELD: &str = "Metadata";

/// Placeholder for a field that exists on the page but has no value.
pub const NOT_AVAILABLE: &str = "Not Available";

pub type Fields = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Nested(Fields),
}

/// One exported row before flattening, keyed by the external CMIT ID.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: &str, variant_id: u64) -> Self {
        let mut fields = IndexMap::new();
        fields.insert(ID_FIELD.to_string(), FieldValue::Text(id.to_string()));
        fields.insert(
            VARIANT_FIELD.to_string(),
            FieldValue::Text(variant_id.to_string()),
        );
        Self { fields }
    }

    pub fn id(&self) -> &str {
        match self.fields.get(ID_FIELD) {
            Some(FieldValue::Text(id)) => id,
            _ => "",
        }
    }

    pub fn insert_text(&mut self, name: &str, value: impl Into<String>) {
        self.fields
            .insert(name.to_string(), FieldValue::Text(value.into()));
    }

    pub fn insert_nested(&mut self, name: &str, value: Fields) {
        self.fields.insert(name.to_string(), FieldValue::Nested(value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when nothing beyond the identity fields was collected.
    pub fn is_identity_only(&self) -> bool {
        self.fields
            .keys()
            .all(|k| k == ID_FIELD || k == VARIANT_FIELD)
    }
}
