//! Data-source descriptors
//!
//! A descriptor is the immutable metadata for one logical record set: its
//! fields, primary key, engine kind and back-end attributes. Descriptors are
//! loaded once from `<id>.ds.xml` or `<id>.ds.js` under the configured
//! descriptor path and cached for the life of the process.
//!
//! Both file formats normalise into the same shape before parsing: XML is
//! converted element-by-element into JSON, so the field list and attributes
//! are handled by one code path.

use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Scalar kind of a field. `Sequence` marks an auto-generated primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldType {
    /// Free text
    #[default]
    Text,
    /// Integral number
    Integer,
    /// Floating-point number
    Float,
    /// Boolean
    Boolean,
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Date and time
    Datetime,
    /// Auto-generated integral key
    Sequence,
}

impl FieldType {
    /// Parse a descriptor `type` attribute; unrecognised kinds degrade to text.
    pub fn from_name(name: &str) -> FieldType {
        match name {
            "integer" | "int" => Self::Integer,
            "float" | "number" | "decimal" => Self::Float,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" | "timestamp" => Self::Datetime,
            "sequence" => Self::Sequence,
            _ => Self::Text,
        }
    }
}

/// Immutable metadata for one field of a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name, unique within the data source
    pub name: String,
    /// Back-end column name when it differs from `name`
    pub native_name: Option<String>,
    /// Scalar kind
    pub field_type: FieldType,
    /// Whether the field is part of the primary key
    pub primary_key: bool,
}

impl FieldDescriptor {
    /// The back-end column this field maps to.
    pub fn column(&self) -> &str {
        self.native_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether this field's value is generated by the back end.
    pub fn is_sequence(&self) -> bool {
        self.field_type == FieldType::Sequence
    }
}

/// Which engine serves a data source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServerType {
    /// Base engine with no storage; custom logic only
    #[default]
    Generic,
    /// SQL engine over a pooled database connection
    Sql,
    /// JSON-file engine
    Json,
    /// Custom engine registered under this constructor name
    Custom(String),
}

/// Immutable metadata for one logical record set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSourceDescriptor {
    /// Unique data-source id
    pub id: String,
    /// Engine selection
    pub server_type: ServerType,
    /// Ordered field list
    pub fields: Vec<FieldDescriptor>,
    /// Back-end table; defaults to `id` for SQL engines
    pub table_name: Option<String>,
    /// Named database; defaults to the configured default database
    pub db_name: Option<String>,
    /// Backing file for JSON-file engines
    pub file_name: Option<String>,
    /// Security prefix for JSON responses of this data source
    pub json_prefix: Option<String>,
    /// Security suffix for JSON responses of this data source
    pub json_suffix: Option<String>,
}

impl DataSourceDescriptor {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Primary-key fields in descriptor order.
    pub fn pk_fields(&self) -> Vec<&FieldDescriptor> {
        self.fields.iter().filter(|f| f.primary_key).collect()
    }

    /// Non-primary-key fields in descriptor order.
    pub fn non_pk_fields(&self) -> Vec<&FieldDescriptor> {
        self.fields.iter().filter(|f| !f.primary_key).collect()
    }

    /// The back-end table for SQL engines.
    pub fn table_name(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.id)
    }

    /// Project the primary key out of a record. Every PK field must be
    /// present and non-null.
    pub fn pk_value(&self, record: &Map<String, Value>) -> Result<Map<String, Value>> {
        let pk_fields = self.pk_fields();
        if pk_fields.is_empty() {
            return Err(Error::missing_pk(format!(
                "(data source '{}' declares no primary key)",
                self.id
            )));
        }
        let mut pk = Map::new();
        for field in pk_fields {
            match record.get(&field.name) {
                Some(value) if !value.is_null() => {
                    pk.insert(field.name.clone(), value.clone());
                }
                _ => return Err(Error::missing_pk(&field.name)),
            }
        }
        Ok(pk)
    }

    /// Project the non-primary-key fields out of a record, keeping only
    /// fields the record actually carries.
    pub fn non_pk_value(&self, record: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for field in self.non_pk_fields() {
            if let Some(value) = record.get(&field.name) {
                out.insert(field.name.clone(), value.clone());
            }
        }
        out
    }

    /// Project an object onto exactly the descriptor's fields; missing
    /// values become null. The projection is idempotent.
    pub fn to_record(&self, obj: &Map<String, Value>) -> Map<String, Value> {
        let mut record = Map::new();
        for field in &self.fields {
            record.insert(
                field.name.clone(),
                obj.get(&field.name).cloned().unwrap_or(Value::Null),
            );
        }
        record
    }

    /// Project a single object or a list of objects into records.
    pub fn to_records(&self, value: &Value) -> Vec<Map<String, Value>> {
        match value {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_object)
                .map(|obj| self.to_record(obj))
                .collect(),
            Value::Object(obj) => vec![self.to_record(obj)],
            _ => Vec::new(),
        }
    }

    /// Parse a descriptor from its normalised JSON shape.
    pub fn from_json(id: &str, doc: &Value) -> Result<DataSourceDescriptor> {
        let obj = doc.as_object().ok_or_else(|| Error::DescriptorParse {
            id: id.to_string(),
            message: "descriptor document is not an object".into(),
        })?;

        let declared_id = attr(obj, "ID")
            .or_else(|| attr(obj, "id"))
            .ok_or_else(|| Error::DescriptorParse {
                id: id.to_string(),
                message: "descriptor has no ID attribute".into(),
            })?;
        if declared_id != id {
            return Err(Error::TypeMismatch {
                requested: id.to_string(),
                found: declared_id,
            });
        }

        let server_type = match (attr(obj, "serverConstructor"), attr(obj, "serverType")) {
            (Some(constructor), _) => ServerType::Custom(constructor),
            (None, Some(kind)) => match kind.as_str() {
                "sql" => ServerType::Sql,
                "json" => ServerType::Json,
                "generic" => ServerType::Generic,
                other => ServerType::Custom(other.to_string()),
            },
            (None, None) => ServerType::Generic,
        };

        let fields = parse_fields(id, obj.get("fields"))?;

        Ok(DataSourceDescriptor {
            id: declared_id,
            server_type,
            fields,
            table_name: attr(obj, "tableName"),
            db_name: attr(obj, "dbName"),
            file_name: attr(obj, "fileName"),
            json_prefix: attr(obj, "jsonPrefix"),
            json_suffix: attr(obj, "jsonSuffix"),
        })
    }

    /// Parse a descriptor from XML (`<id>.ds.xml`).
    pub fn from_xml(id: &str, xml: &str) -> Result<DataSourceDescriptor> {
        let doc = roxmltree::Document::parse(xml).map_err(|e| Error::DescriptorParse {
            id: id.to_string(),
            message: e.to_string(),
        })?;
        let json = xml_element_to_json(doc.root_element());
        Self::from_json(id, &json)
    }

    /// Render the client-visible descriptor shape used by the loader route.
    pub fn to_client_json(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|f| {
                let mut obj = Map::new();
                obj.insert("name".into(), Value::String(f.name.clone()));
                obj.insert(
                    "type".into(),
                    Value::String(
                        match f.field_type {
                            FieldType::Text => "text",
                            FieldType::Integer => "integer",
                            FieldType::Float => "float",
                            FieldType::Boolean => "boolean",
                            FieldType::Date => "date",
                            FieldType::Time => "time",
                            FieldType::Datetime => "datetime",
                            FieldType::Sequence => "sequence",
                        }
                        .to_string(),
                    ),
                );
                if f.primary_key {
                    obj.insert("primaryKey".into(), Value::Bool(true));
                }
                Value::Object(obj)
            })
            .collect();

        let mut obj = Map::new();
        obj.insert("ID".into(), Value::String(self.id.clone()));
        obj.insert("fields".into(), Value::Array(fields));
        Value::Object(obj)
    }
}

/// Read a string-ish attribute, tolerating XML's stringly-typed values.
fn attr(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn parse_fields(id: &str, fields: Option<&Value>) -> Result<Vec<FieldDescriptor>> {
    // XML normalisation wraps a lone <field> in an object keyed "field";
    // JSON descriptors carry a plain list.
    let items: Vec<&Value> = match fields {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(obj)) => match obj.get("field") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        },
        _ => Vec::new(),
    };

    if items.is_empty() {
        return Err(Error::DescriptorParse {
            id: id.to_string(),
            message: "descriptor declares no fields".into(),
        });
    }

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let obj = item.as_object().ok_or_else(|| Error::DescriptorParse {
            id: id.to_string(),
            message: "field entry is not an object".into(),
        })?;
        let name = attr(obj, "name").ok_or_else(|| Error::DescriptorParse {
            id: id.to_string(),
            message: "field entry has no name".into(),
        })?;
        let field_type = attr(obj, "type")
            .map(|t| FieldType::from_name(&t))
            .unwrap_or_default();
        let primary_key = truthy(obj.get("primaryKey")) || field_type == FieldType::Sequence;
        out.push(FieldDescriptor {
            name,
            native_name: attr(obj, "nativeName"),
            field_type,
            primary_key,
        });
    }
    Ok(out)
}

/// Convert an XML element into the JSON shape descriptor parsing expects:
/// attributes become string entries, repeated child elements group into
/// arrays, text-only elements collapse to their text.
pub fn xml_element_to_json(element: roxmltree::Node<'_, '_>) -> Value {
    let mut obj = Map::new();

    for attribute in element.attributes() {
        obj.insert(
            attribute.name().to_string(),
            Value::String(attribute.value().to_string()),
        );
    }

    let mut text = String::new();
    for child in element.children() {
        if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        } else if child.is_element() {
            let value = xml_element_to_json(child);
            let key = child.tag_name().name().to_string();
            match obj.remove(&key) {
                Some(Value::Array(mut items)) => {
                    items.push(value);
                    obj.insert(key, Value::Array(items));
                }
                Some(existing) => {
                    obj.insert(key, Value::Array(vec![existing, value]));
                }
                None => {
                    obj.insert(key, value);
                }
            }
        }
    }

    let text = text.trim();
    if obj.is_empty() {
        return Value::String(text.to_string());
    }
    Value::Object(obj)
}

/// Load a descriptor from disk, trying `<id>.ds.xml` then `<id>.ds.js`.
pub async fn load_descriptor(dir: &Path, id: &str) -> Result<DataSourceDescriptor> {
    let xml_path = dir.join(format!("{id}.ds.xml"));
    if let Ok(content) = tokio::fs::read_to_string(&xml_path).await {
        debug!(id, path = %xml_path.display(), "loading XML descriptor");
        return DataSourceDescriptor::from_xml(id, &content);
    }

    let js_path = dir.join(format!("{id}.ds.js"));
    if let Ok(content) = tokio::fs::read_to_string(&js_path).await {
        debug!(id, path = %js_path.display(), "loading JSON descriptor");
        let doc: Value = serde_json::from_str(&content).map_err(|e| Error::DescriptorParse {
            id: id.to_string(),
            message: e.to_string(),
        })?;
        return DataSourceDescriptor::from_json(id, &doc);
    }

    Err(Error::DescriptorNotFound {
        id: id.to_string(),
        path: dir.display().to_string(),
    })
}
