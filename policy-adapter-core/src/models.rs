//! Stored rule records and field selectors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::CoreError;

/// Name of the collection holding rule records
pub const COLLECTION_NAME: &str = "casbin_rule";

/// Database used when the connection target names none
pub const DEFAULT_DATABASE: &str = "casbin_rule";

/// Number of positional value fields on a record
pub const MAX_FIELDS: usize = 6;

/// Document key of the store-assigned identifier
pub const ID_FIELD: &str = "_id";

/// Document key of the rule type label
pub const PTYPE_FIELD: &str = "ptype";

/// Document keys of the positional value fields
pub const VALUE_FIELDS: [&str; MAX_FIELDS] = ["v0", "v1", "v2", "v3", "v4", "v5"];

/// Fields that jointly identify a rule; covered by the unique index
pub const RULE_KEY_FIELDS: [&str; MAX_FIELDS + 1] = ["ptype", "v0", "v1", "v2", "v3", "v4", "v5"];

/// A rule as stored in the document database
///
/// Unused trailing fields are stored as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CasbinRule {
    /// Store-assigned identifier, absent until inserted
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Rule type label, e.g. `p` or `g`
    pub ptype: String,
    #[serde(default)]
    pub v0: String,
    #[serde(default)]
    pub v1: String,
    #[serde(default)]
    pub v2: String,
    #[serde(default)]
    pub v3: String,
    #[serde(default)]
    pub v4: String,
    #[serde(default)]
    pub v5: String,
}

impl CasbinRule {
    /// Build a record from a rule type and its ordered fields.
    ///
    /// Fields fill `v0..v5` left to right; positions past the end of `rule`
    /// stay empty.
    pub fn from_policy<S: AsRef<str>>(ptype: &str, rule: &[S]) -> Result<Self, CoreError> {
        if rule.len() > MAX_FIELDS {
            return Err(CoreError::TooManyFields(rule.len()));
        }

        let mut line = Self {
            ptype: ptype.to_string(),
            ..Self::default()
        };
        for (index, value) in rule.iter().enumerate() {
            line.set_value(index, value.as_ref());
        }
        Ok(line)
    }

    /// Positional values `v0..v5` in order
    pub fn values(&self) -> [&str; MAX_FIELDS] {
        [
            self.v0.as_str(),
            self.v1.as_str(),
            self.v2.as_str(),
            self.v3.as_str(),
            self.v4.as_str(),
            self.v5.as_str(),
        ]
    }

    fn set_value(&mut self, index: usize, value: &str) {
        let slot = match index {
            0 => &mut self.v0,
            1 => &mut self.v1,
            2 => &mut self.v2,
            3 => &mut self.v3,
            4 => &mut self.v4,
            5 => &mut self.v5,
            _ => return,
        };
        *slot = value.to_string();
    }

    /// Rebuild the rule's fields.
    ///
    /// The field count is the highest non-empty position plus one, so empty
    /// values below a populated one are kept as empty strings.
    pub fn policy_fields(&self) -> Vec<String> {
        let values = self.values();
        let len = values
            .iter()
            .rposition(|value| !value.is_empty())
            .map_or(0, |index| index + 1);
        values[..len].iter().map(|value| value.to_string()).collect()
    }

    /// Policy text line `ptype, v0, v1, ...`, or `None` when every value is empty
    pub fn to_policy_line(&self) -> Option<String> {
        let fields = self.policy_fields();
        if fields.is_empty() {
            return None;
        }

        let mut parts = Vec::with_capacity(fields.len() + 1);
        parts.push(self.ptype.clone());
        parts.extend(fields);
        Some(parts.join(", "))
    }

    /// Selector matching this rule exactly on all seven key fields
    pub fn key_filter(&self) -> RuleFilter {
        let mut filter = RuleFilter::new().with(PTYPE_FIELD, &self.ptype);
        for (name, value) in VALUE_FIELDS.iter().zip(self.values()) {
            filter = filter.with(name, value);
        }
        filter
    }

    /// Copy without the store identifier
    pub fn without_id(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }
}

/// Equality selector over document fields
///
/// Every entry must equal the document's field of the same name. An empty
/// selector matches every document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleFilter(BTreeMap<String, String>);

impl RuleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality constraint on `field`
    pub fn with(mut self, field: &str, value: &str) -> Self {
        self.0.insert(field.to_string(), value.to_string());
        self
    }

    /// Constrain the rule type
    pub fn ptype(self, ptype: &str) -> Self {
        self.with(PTYPE_FIELD, ptype)
    }

    /// Constrain positional field `index`; ignored past the last field
    pub fn value(self, index: usize, value: &str) -> Self {
        match VALUE_FIELDS.get(index) {
            Some(field) => self.with(field, value),
            None => self,
        }
    }

    /// Selector for removing rules by a run of field values.
    ///
    /// Always constrains the type. Value `i` of `field_values` constrains
    /// position `field_index + i` unless it is empty, which leaves that
    /// position unconstrained.
    pub fn partial<S: AsRef<str>>(ptype: &str, field_index: usize, field_values: &[S]) -> Self {
        let mut filter = Self::new().ptype(ptype);
        for (offset, value) in field_values.iter().enumerate() {
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }
            filter = filter.value(field_index + offset, value);
        }
        filter
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a raw document satisfies every constraint
    pub fn matches_document(&self, document: &serde_json::Value) -> bool {
        self.iter().all(|(field, expected)| {
            document
                .get(field)
                .and_then(serde_json::Value::as_str)
                .is_some_and(|actual| actual == expected)
        })
    }

}
