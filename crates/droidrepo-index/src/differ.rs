//! Structural diffing of index records.
//!
//! Diffs follow JSON Merge Patch (RFC 7386): `null` clears a field, a scalar replaces it, an
//! object patches the nested record or localized map, and absent fields keep their value.
//!
//! Each diffable record declares its shape as a [`Schema`], a static table of field names and
//! kinds. [`apply_diff`] walks that table against the record's JSON form, so any value whose
//! shape does not match the declared kind is rejected with [`IndexError::Serialization`] instead
//! of being coerced or dropped.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{IndexError, Result},
    v2::{AntiFeatureV2, CategoryV2, CoreRepository, FileV2, MetadataV2, ReleaseChannelV2},
};

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Int,
    Long,
    Text,
    /// A list of strings.
    TextList,
    /// `locale -> string`
    LocalizedText,
    /// `locale -> FileV2`
    LocalizedFile,
    /// `locale -> [FileV2]`
    LocalizedFileList,
    Record(&'static Schema),
}

#[derive(Debug)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    /// `null` in a diff clears the field.
    pub nullable: bool,
    /// The field must be present when the record is constructed from a diff.
    pub required: bool,
}

impl Field {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            required: false,
        }
    }

    /// Not nullable, but falls back to its default when absent or cleared.
    pub const fn defaulted(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            required: false,
        }
    }
}

#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

/// A record that can be patched by [`apply_diff`].
///
/// `SCHEMA` field names must equal the serialized names of the record.
pub trait Diffable: Serialize + DeserializeOwned {
    const SCHEMA: &'static Schema;
}

/// Applies `diff` to `record` and returns the patched copy.
pub fn apply_diff<T: Diffable>(record: &T, diff: &Map<String, Value>) -> Result<T> {
    let mut current = match serde_json::to_value(record)? {
        Value::Object(map) => map,
        _ => return Err(err(format!("{} is not a record", T::SCHEMA.name))),
    };
    patch_record(T::SCHEMA, &mut current, diff)?;
    Ok(serde_json::from_value(Value::Object(current))?)
}

/// Builds a record from scratch out of a diff that introduces it.
pub fn construct_from_json<T: Diffable>(diff: &Map<String, Value>) -> Result<T> {
    let map = construct_record(T::SCHEMA, diff)?;
    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Untyped RFC 7386 merge patch.
pub fn merge_patch_value(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch_value(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Merge-patches any serializable record, validating the result by deserializing it.
///
/// Used for records whose shape has no schema table, such as package versions.
pub fn merge_patch<T: Serialize + DeserializeOwned>(record: &T, patch: &Value) -> Result<T> {
    let mut value = serde_json::to_value(record)?;
    merge_patch_value(&mut value, patch);
    Ok(serde_json::from_value(value)?)
}

fn err(msg: String) -> IndexError {
    IndexError::Serialization(msg)
}

fn patch_record(
    schema: &Schema,
    current: &mut Map<String, Value>,
    diff: &Map<String, Value>,
) -> Result<()> {
    for field in schema.fields {
        let Some(value) = diff.get(field.name) else {
            continue;
        };
        if value.is_null() {
            if !field.nullable && field.required {
                return Err(err(format!("not nullable: {}", field.name)));
            }
            current.remove(field.name);
            continue;
        }
        let new_value = convert(field, current.get(field.name), value)?;
        current.insert(field.name.to_string(), new_value);
    }
    Ok(())
}

fn construct_record(schema: &Schema, diff: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for field in schema.fields {
        match diff.get(field.name) {
            None if field.required => {
                return Err(err(format!("{} required but not found", field.name)));
            }
            None => {}
            Some(Value::Null) if field.required && !field.nullable => {
                return Err(err(format!("not nullable: {}", field.name)));
            }
            Some(Value::Null) => {}
            Some(value) => {
                map.insert(field.name.to_string(), convert(field, None, value)?);
            }
        }
    }
    Ok(map)
}

fn convert(field: &Field, current: Option<&Value>, value: &Value) -> Result<Value> {
    let name = field.name;
    match field.kind {
        FieldKind::Int => {
            value
                .as_i64()
                .filter(|n| i32::try_from(*n).is_ok())
                .map(Value::from)
                .ok_or_else(|| err(format!("{name} no int")))
        }
        FieldKind::Long => {
            value
                .as_i64()
                .map(Value::from)
                .ok_or_else(|| err(format!("{name} no long")))
        }
        FieldKind::Text => {
            value
                .as_str()
                .map(Value::from)
                .ok_or_else(|| err(format!("{name} no string")))
        }
        FieldKind::TextList => {
            let items = value
                .as_array()
                .ok_or_else(|| err(format!("{name} no array")))?;
            items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(Value::from)
                        .ok_or_else(|| err(format!("{name} non-primitive array")))
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        FieldKind::LocalizedText => {
            patch_map(name, current, value, |entry| {
                entry.as_str().map(Value::from)
            })
        }
        FieldKind::LocalizedFile => {
            patch_map(name, current, value, |entry| {
                entry
                    .as_object()
                    .and_then(|obj| construct_record(&FILE_SCHEMA, obj).ok())
                    .map(Value::Object)
            })
        }
        FieldKind::LocalizedFileList => {
            patch_map(name, current, value, |entry| {
                entry.as_array().and_then(|files| {
                    files
                        .iter()
                        .map(|file| {
                            file.as_object()
                                .and_then(|obj| construct_record(&FILE_SCHEMA, obj).ok())
                                .map(Value::Object)
                        })
                        .collect::<Option<Vec<_>>>()
                        .map(Value::Array)
                })
            })
        }
        FieldKind::Record(schema) => {
            let diff = value
                .as_object()
                .ok_or_else(|| err(format!("{name} no dict")))?;
            let record = match current {
                Some(Value::Object(existing)) => {
                    let mut existing = existing.clone();
                    patch_record(schema, &mut existing, diff)?;
                    existing
                }
                _ => construct_record(schema, diff)?,
            };
            Ok(Value::Object(record))
        }
    }
}

/// Patches a `locale -> value` map: `null` removes a locale, anything else is converted by
/// `entry` and stored.
fn patch_map<F>(name: &str, current: Option<&Value>, value: &Value, entry: F) -> Result<Value>
where
    F: Fn(&Value) -> Option<Value>,
{
    let diff = value
        .as_object()
        .ok_or_else(|| err(format!("{name} no map")))?;
    let mut map = match current {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    for (key, new_value) in diff {
        if new_value.is_null() {
            map.remove(key);
            continue;
        }
        let converted =
            entry(new_value).ok_or_else(|| err(format!("unsupported map value: {new_value}")))?;
        map.insert(key.clone(), converted);
    }
    Ok(Value::Object(map))
}

pub const FILE_SCHEMA: Schema = Schema {
    name: "FileV2",
    fields: &[
        Field::required("name", FieldKind::Text),
        Field::optional("sha256", FieldKind::Text),
        Field::optional("size", FieldKind::Long),
        Field::optional("ipfsCIDv1", FieldKind::Text),
    ],
};

pub const CORE_REPOSITORY_SCHEMA: Schema = Schema {
    name: "CoreRepository",
    fields: &[
        Field::defaulted("name", FieldKind::LocalizedText),
        Field::defaulted("icon", FieldKind::LocalizedFile),
        Field::required("address", FieldKind::Text),
        Field::optional("webBaseUrl", FieldKind::Text),
        Field::required("timestamp", FieldKind::Long),
        Field::defaulted("description", FieldKind::LocalizedText),
        Field::optional("maxAge", FieldKind::Int),
    ],
};

pub const ANTI_FEATURE_SCHEMA: Schema = Schema {
    name: "AntiFeatureV2",
    fields: &[
        Field::defaulted("icon", FieldKind::LocalizedFile),
        Field::required("name", FieldKind::LocalizedText),
        Field::defaulted("description", FieldKind::LocalizedText),
    ],
};

pub const CATEGORY_SCHEMA: Schema = Schema {
    name: "CategoryV2",
    fields: &[
        Field::defaulted("icon", FieldKind::LocalizedFile),
        Field::required("name", FieldKind::LocalizedText),
        Field::defaulted("description", FieldKind::LocalizedText),
    ],
};

pub const RELEASE_CHANNEL_SCHEMA: Schema = Schema {
    name: "ReleaseChannelV2",
    fields: &[
        Field::required("name", FieldKind::LocalizedText),
        Field::defaulted("description", FieldKind::LocalizedText),
    ],
};

pub const SCREENSHOTS_SCHEMA: Schema = Schema {
    name: "Screenshots",
    fields: &[
        Field::optional("phone", FieldKind::LocalizedFileList),
        Field::optional("sevenInch", FieldKind::LocalizedFileList),
        Field::optional("tenInch", FieldKind::LocalizedFileList),
        Field::optional("wear", FieldKind::LocalizedFileList),
        Field::optional("tv", FieldKind::LocalizedFileList),
    ],
};

pub const METADATA_SCHEMA: Schema = Schema {
    name: "MetadataV2",
    fields: &[
        Field::optional("name", FieldKind::LocalizedText),
        Field::optional("summary", FieldKind::LocalizedText),
        Field::optional("description", FieldKind::LocalizedText),
        Field::required("added", FieldKind::Long),
        Field::required("lastUpdated", FieldKind::Long),
        Field::optional("webSite", FieldKind::Text),
        Field::optional("changelog", FieldKind::Text),
        Field::optional("license", FieldKind::Text),
        Field::optional("sourceCode", FieldKind::Text),
        Field::optional("issueTracker", FieldKind::Text),
        Field::optional("translation", FieldKind::Text),
        Field::optional("preferredSigner", FieldKind::Text),
        Field::defaulted("categories", FieldKind::TextList),
        Field::optional("authorName", FieldKind::Text),
        Field::optional("authorEmail", FieldKind::Text),
        Field::optional("authorWebSite", FieldKind::Text),
        Field::optional("authorPhone", FieldKind::Text),
        Field::defaulted("donate", FieldKind::TextList),
        Field::optional("liberapayID", FieldKind::Text),
        Field::optional("liberapay", FieldKind::Text),
        Field::optional("openCollective", FieldKind::Text),
        Field::optional("bitcoin", FieldKind::Text),
        Field::optional("litecoin", FieldKind::Text),
        Field::optional("flattrID", FieldKind::Text),
        Field::optional("icon", FieldKind::LocalizedFile),
        Field::optional("featureGraphic", FieldKind::LocalizedFile),
        Field::optional("promoGraphic", FieldKind::LocalizedFile),
        Field::optional("tvBanner", FieldKind::LocalizedFile),
        Field::optional("video", FieldKind::LocalizedText),
        Field::optional("screenshots", FieldKind::Record(&SCREENSHOTS_SCHEMA)),
    ],
};

impl Diffable for FileV2 {
    const SCHEMA: &'static Schema = &FILE_SCHEMA;
}

impl Diffable for CoreRepository {
    const SCHEMA: &'static Schema = &CORE_REPOSITORY_SCHEMA;
}

impl Diffable for AntiFeatureV2 {
    const SCHEMA: &'static Schema = &ANTI_FEATURE_SCHEMA;
}

impl Diffable for CategoryV2 {
    const SCHEMA: &'static Schema = &CATEGORY_SCHEMA;
}

impl Diffable for ReleaseChannelV2 {
    const SCHEMA: &'static Schema = &RELEASE_CHANNEL_SCHEMA;
}

impl Diffable for MetadataV2 {
    const SCHEMA: &'static Schema = &METADATA_SCHEMA;
}
