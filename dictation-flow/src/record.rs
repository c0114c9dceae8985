//! The medical-procedure record and the deltas that incrementally fill it.
//!
//! A [`Record`] always has the same three sections with the same fixed fields.
//! Deltas arriving from the interpreter are merged with a shallow per-field
//! overwrite: any field present in the delta replaces the stored value, every
//! other field is left alone. Values are not type-checked against the field's
//! default; the interpreter is trusted to send something sensible.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

/// One of the three fixed groupings of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Patient,
    Procedure,
    Coding,
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Text,
    Number,
    List,
}

impl FieldKind {
    fn empty(self) -> FieldValue {
        match self {
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Number => FieldValue::Number(0.into()),
            FieldKind::List => FieldValue::List(Vec::new()),
        }
    }
}

const PATIENT_FIELDS: &[(&str, FieldKind)] = &[
    ("name", FieldKind::Text),
    ("age", FieldKind::Number),
    ("sex", FieldKind::Text),
];

const PROCEDURE_FIELDS: &[(&str, FieldKind)] = &[
    ("date", FieldKind::Text),
    ("location", FieldKind::Text),
    ("preoperative_diagnosis", FieldKind::Text),
    ("postoperative_diagnosis", FieldKind::Text),
    ("procedures_performed", FieldKind::List),
    ("surgeon", FieldKind::Text),
    ("assistant_surgeon", FieldKind::Text),
];

const CODING_FIELDS: &[(&str, FieldKind)] = &[
    ("cpt", FieldKind::List),
    ("snomed_ct", FieldKind::List),
    ("icd_10", FieldKind::List),
];

impl SectionKind {
    pub const ALL: [SectionKind; 3] = [
        SectionKind::Patient,
        SectionKind::Procedure,
        SectionKind::Coding,
    ];

    /// Key used for this section on the wire.
    pub fn key(self) -> &'static str {
        match self {
            SectionKind::Patient => "patient",
            SectionKind::Procedure => "procedure",
            SectionKind::Coding => "coding",
        }
    }

    /// Human-readable label shown next to the section's progress.
    pub fn label(self) -> &'static str {
        match self {
            SectionKind::Patient => "Patient Info",
            SectionKind::Procedure => "Procedure Details",
            SectionKind::Coding => "Coding",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    /// Field names of this section, in display order.
    pub fn field_names(self) -> impl Iterator<Item = &'static str> {
        self.schema().iter().map(|(name, _)| *name)
    }

    fn schema(self) -> &'static [(&'static str, FieldKind)] {
        match self {
            SectionKind::Patient => PATIENT_FIELDS,
            SectionKind::Procedure => PROCEDURE_FIELDS,
            SectionKind::Coding => CODING_FIELDS,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A coded diagnosis or procedure (CPT, SNOMED CT, ICD-10).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedItem {
    pub code: String,
    pub description: String,
}

impl CodedItem {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

/// Entry of a sequence-valued field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListItem {
    Coded(CodedItem),
    Plain(Value),
}

impl ListItem {
    fn display(&self) -> String {
        match self {
            ListItem::Coded(item) => format!("{}: {}", item.code, item.description),
            ListItem::Plain(Value::String(text)) => text.clone(),
            ListItem::Plain(other) => other.to_string(),
        }
    }
}

impl From<CodedItem> for ListItem {
    fn from(item: CodedItem) -> Self {
        ListItem::Coded(item)
    }
}

impl From<&str> for ListItem {
    fn from(text: &str) -> Self {
        ListItem::Plain(Value::String(text.to_string()))
    }
}

/// Value held by a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<ListItem>),
    Object(Map<String, Value>),
}

impl FieldValue {
    /// A value is complete when it is a non-empty sequence or a scalar that is
    /// not empty text, zero or null.
    pub fn is_complete(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Bool(_) => true,
            FieldValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            FieldValue::Text(text) => !text.is_empty(),
            FieldValue::List(items) => !items.is_empty(),
            FieldValue::Object(_) => true,
        }
    }

    /// Text form of the value. Falsy scalars render as empty text; sequences
    /// render one item per line.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Null | FieldValue::Bool(false) => String::new(),
            FieldValue::Bool(true) => "true".to_string(),
            FieldValue::Number(n) if n.as_f64() == Some(0.0) => String::new(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(text) => text.clone(),
            FieldValue::List(items) => items
                .iter()
                .map(ListItem::display)
                .collect::<Vec<_>>()
                .join("\n"),
            FieldValue::Object(map) => Value::Object(map.clone()).to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(FieldValue::Number)
            .unwrap_or(FieldValue::Null)
    }
}

impl From<bool> for FieldValue {
    fn from(flag: bool) -> Self {
        FieldValue::Bool(flag)
    }
}

impl From<Vec<CodedItem>> for FieldValue {
    fn from(items: Vec<CodedItem>) -> Self {
        FieldValue::List(items.into_iter().map(ListItem::Coded).collect())
    }
}

impl From<Vec<ListItem>> for FieldValue {
    fn from(items: Vec<ListItem>) -> Self {
        FieldValue::List(items)
    }
}

impl From<ListItem> for Value {
    fn from(item: ListItem) -> Self {
        match item {
            ListItem::Coded(CodedItem { code, description }) => {
                let mut map = Map::new();
                map.insert("code".to_string(), Value::String(code));
                map.insert("description".to_string(), Value::String(description));
                Value::Object(map)
            }
            ListItem::Plain(value) => value,
        }
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(flag) => Value::Bool(flag),
            FieldValue::Number(n) => Value::Number(n),
            FieldValue::Text(text) => Value::String(text),
            FieldValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            FieldValue::Object(map) => Value::Object(map),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub value: FieldValue,
}

/// A named group of fields. Serializes as a JSON object in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    kind: SectionKind,
    fields: Vec<Field>,
}

impl Section {
    /// Section with every field at its empty default.
    pub fn new(kind: SectionKind) -> Self {
        let fields = kind
            .schema()
            .iter()
            .map(|&(name, field_kind)| Field {
                name,
                value: field_kind.empty(),
            })
            .collect();
        Self::with_fields(kind, fields)
    }

    pub(crate) fn with_fields(kind: SectionKind, fields: Vec<Field>) -> Self {
        Self { kind, fields }
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    /// Overwrite a field. Returns `false` when the section has no such field.
    pub fn set(&mut self, name: &str, value: FieldValue) -> bool {
        match self.fields.iter_mut().find(|field| field.name == name) {
            Some(field) => {
                field.value = value;
                true
            }
            None => false,
        }
    }
}

impl Serialize for Section {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(field.name, &field.value)?;
        }
        map.end()
    }
}

/// Partial record describing field-level overwrites.
///
/// Sections are kept as raw JSON until merged so that one malformed section
/// does not cost the rest of the delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordDelta(BTreeMap<String, Value>);

impl RecordDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper used by hosts and tests.
    pub fn with(
        mut self,
        section: SectionKind,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        let value: FieldValue = value.into();
        let entry = self
            .0
            .entry(section.key().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(fields) = entry {
            fields.insert(field.into(), value.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of field overwrites carried by the delta.
    pub fn len(&self) -> usize {
        self.0
            .values()
            .filter_map(Value::as_object)
            .map(Map::len)
            .sum()
    }
}

/// The structured medical-procedure document being filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    patient: Section,
    procedure: Section,
    coding: Section,
}

impl Record {
    /// Fresh record with the fixed shape and all fields empty.
    pub fn new() -> Self {
        Self {
            patient: Section::new(SectionKind::Patient),
            procedure: Section::new(SectionKind::Procedure),
            coding: Section::new(SectionKind::Coding),
        }
    }

    pub fn section(&self, kind: SectionKind) -> &Section {
        match kind {
            SectionKind::Patient => &self.patient,
            SectionKind::Procedure => &self.procedure,
            SectionKind::Coding => &self.coding,
        }
    }

    fn section_mut(&mut self, kind: SectionKind) -> &mut Section {
        match kind {
            SectionKind::Patient => &mut self.patient,
            SectionKind::Procedure => &mut self.procedure,
            SectionKind::Coding => &mut self.coding,
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        SectionKind::ALL.into_iter().map(|kind| self.section(kind))
    }

    pub fn get(&self, section: SectionKind, field: &str) -> Option<&FieldValue> {
        self.section(section).get(field)
    }

    /// Apply a delta with shallow per-field overwrite.
    ///
    /// Sections and fields outside the fixed shape are skipped, as are `null`
    /// sections. Returns the `section.field` paths that were written.
    pub fn merge(&mut self, delta: RecordDelta) -> Vec<String> {
        let mut applied = Vec::with_capacity(delta.len());
        for (section_key, fields) in delta.0 {
            let Some(kind) = SectionKind::from_key(&section_key) else {
                warn!(section = %section_key, "ignoring unknown section in record delta");
                continue;
            };
            let fields = match fields {
                Value::Object(fields) => fields,
                Value::Null => continue,
                _ => {
                    warn!(section = %kind, "ignoring non-object section in record delta");
                    continue;
                }
            };
            let section = self.section_mut(kind);
            for (name, value) in fields {
                let value = match serde_json::from_value::<FieldValue>(value) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(section = %kind, field = %name, error = %e, "ignoring undecodable field in record delta");
                        continue;
                    }
                };
                if section.set(&name, value) {
                    applied.push(format!("{kind}.{name}"));
                } else {
                    warn!(section = %kind, field = %name, "ignoring unknown field in record delta");
                }
            }
        }
        applied
    }

    /// Replace the record wholesale with an empty one.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let delta = RecordDelta::deserialize(deserializer)?;
        let mut record = Record::new();
        record.merge(delta);
        Ok(record)
    }
}
