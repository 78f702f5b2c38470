//! JSON encoding of type descriptors.
//!
//! Every descriptor encodes as `{"wb_type": <name>, "params": {...}}`:
//!
//! | descriptor | `wb_type` | params |
//! | --- | --- | --- |
//! | `Unknown` / `Invalid` | `unknown` / `invalid` | none |
//! | `Primitive` | `number`, `string`, `boolean`, `none`, `binary` | none |
//! | `Const` | `const` | `val` |
//! | `Optional` | `optional` | `inner_type` |
//! | `Union` | `union` | `allowed_types` |
//! | `Record` | `dictionary` | `type_map` |
//! | `Custom` | the registry tag | kind-specific |
//!
//! Encoding takes an optional manifest so custom kinds can persist auxiliary
//! values (the class set behind a class-id type) next to the descriptor.

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use snafu::prelude::*;

use super::{PrimitiveKind, TypeDescriptor, TypeRegistry};
use crate::destination::{Manifest, SourceManifest, reborrow};
use crate::media::MediaError;
use crate::value::Value;

/// Errors from encoding or decoding type JSON.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TypeJsonError {
    /// The JSON does not have the expected shape.
    #[snafu(display("Malformed type JSON: {reason}"))]
    Malformed {
        /// What was wrong.
        reason: String,
    },

    /// `wb_type` names neither a builtin descriptor nor a registered kind.
    #[snafu(display("Unknown type name: {name}"))]
    UnknownType {
        /// The unrecognized name.
        name: String,
    },

    /// Persisting or loading an auxiliary rich value failed.
    #[snafu(display("Failed to persist or load an auxiliary value: {source}"))]
    Media {
        /// Underlying media error.
        #[snafu(source(from(MediaError, Box::new)))]
        source: Box<MediaError>,
    },
}

fn wrap(name: &str, params: Option<Map<String, Json>>) -> Json {
    let mut obj = Map::new();
    obj.insert("wb_type".to_string(), Json::String(name.to_string()));
    if let Some(params) = params {
        obj.insert("params".to_string(), Json::Object(params));
    }
    Json::Object(obj)
}

fn single(key: &str, value: Json) -> Map<String, Json> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn malformed(reason: impl Into<String>) -> TypeJsonError {
    TypeJsonError::Malformed {
        reason: reason.into(),
    }
}

impl TypeDescriptor {
    /// Encode as type JSON.
    ///
    /// With a manifest context, custom kinds register their auxiliary values
    /// in it; without one they inline them.
    pub fn to_json(&self, mut context: Option<&mut dyn Manifest>) -> Result<Json, TypeJsonError> {
        let json = match self {
            TypeDescriptor::Unknown => wrap("unknown", None),
            TypeDescriptor::Invalid => wrap("invalid", None),
            TypeDescriptor::Primitive(kind) => wrap(kind.name(), None),
            TypeDescriptor::Const(value) => {
                let val = value
                    .to_plain_json()
                    .ok_or_else(|| malformed("const values cannot hold rich values"))?;
                wrap("const", Some(single("val", val)))
            }
            TypeDescriptor::Optional(inner) => {
                let inner = inner.to_json(reborrow(&mut context))?;
                wrap("optional", Some(single("inner_type", inner)))
            }
            TypeDescriptor::Union(members) => {
                let mut allowed = Vec::with_capacity(members.len());
                for member in members.iter() {
                    allowed.push(member.to_json(reborrow(&mut context))?);
                }
                wrap("union", Some(single("allowed_types", Json::Array(allowed))))
            }
            TypeDescriptor::Record(fields) => {
                let mut type_map = Map::with_capacity(fields.len());
                for (key, field) in fields {
                    type_map.insert(key.clone(), field.to_json(reborrow(&mut context))?);
                }
                wrap("dictionary", Some(single("type_map", Json::Object(type_map))))
            }
            TypeDescriptor::Custom(custom) => {
                let kind = TypeRegistry::global()
                    .kind(&custom.tag)
                    .context(UnknownTypeSnafu {
                        name: custom.tag.clone(),
                    })?;
                let params = (kind.to_json)(custom, context)?;
                wrap(&custom.tag, Some(params))
            }
        };
        Ok(json)
    }

    /// Decode type JSON.
    ///
    /// `source` resolves auxiliary values that were persisted as manifest
    /// entries; inline values decode without it.
    pub fn from_json(
        json: &Json,
        source: Option<&dyn SourceManifest>,
    ) -> Result<TypeDescriptor, TypeJsonError> {
        let obj = json
            .as_object()
            .ok_or_else(|| malformed("type JSON must be an object"))?;
        let name = obj
            .get("wb_type")
            .and_then(Json::as_str)
            .ok_or_else(|| malformed("missing string field `wb_type`"))?;
        let empty = Map::new();
        let params = match obj.get("params") {
            None | Some(Json::Null) => &empty,
            Some(Json::Object(params)) => params,
            Some(_) => return Err(malformed("`params` must be an object")),
        };

        if let Some(kind) = PrimitiveKind::from_name(name) {
            return Ok(TypeDescriptor::Primitive(kind));
        }

        let ty = match name {
            "unknown" => TypeDescriptor::Unknown,
            "invalid" => TypeDescriptor::Invalid,
            "const" => {
                let val = params
                    .get("val")
                    .ok_or_else(|| malformed("const type without `val`"))?;
                let value = Value::from_plain_json(val)
                    .ok_or_else(|| malformed("const `val` has no value form"))?;
                TypeDescriptor::Const(value)
            }
            "optional" => {
                let inner = params
                    .get("inner_type")
                    .ok_or_else(|| malformed("optional type without `inner_type`"))?;
                TypeDescriptor::Optional(Box::new(TypeDescriptor::from_json(inner, source)?))
            }
            "union" => {
                let allowed = params
                    .get("allowed_types")
                    .and_then(Json::as_array)
                    .ok_or_else(|| malformed("union type without `allowed_types` array"))?;
                let members = allowed
                    .iter()
                    .map(|m| TypeDescriptor::from_json(m, source))
                    .collect::<Result<Vec<_>, _>>()?;
                TypeDescriptor::union(members)
            }
            "dictionary" => {
                let type_map = params
                    .get("type_map")
                    .and_then(Json::as_object)
                    .ok_or_else(|| malformed("dictionary type without `type_map` object"))?;
                let mut fields = IndexMap::with_capacity(type_map.len());
                for (key, field) in type_map {
                    fields.insert(key.clone(), TypeDescriptor::from_json(field, source)?);
                }
                TypeDescriptor::Record(fields)
            }
            tag => {
                let kind = TypeRegistry::global()
                    .kind(tag)
                    .context(UnknownTypeSnafu { name: tag })?;
                TypeDescriptor::Custom((kind.from_json)(tag, params, source)?)
            }
        };
        Ok(ty)
    }
}

/// Encode every param of a custom type as type JSON.
pub(crate) fn params_to_json(
    params: &IndexMap<String, TypeDescriptor>,
    mut context: Option<&mut dyn Manifest>,
) -> Result<Map<String, Json>, TypeJsonError> {
    let mut out = Map::with_capacity(params.len());
    for (key, ty) in params {
        out.insert(key.clone(), ty.to_json(reborrow(&mut context))?);
    }
    Ok(out)
}

/// Decode every param that looks like type JSON (an object with `wb_type`).
pub(crate) fn params_from_json(
    params: &Map<String, Json>,
    source: Option<&dyn SourceManifest>,
) -> Result<IndexMap<String, TypeDescriptor>, TypeJsonError> {
    let mut out = IndexMap::with_capacity(params.len());
    for (key, value) in params {
        if value.get("wb_type").is_some() {
            out.insert(key.clone(), TypeDescriptor::from_json(value, source)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(ty: &TypeDescriptor) -> TypeDescriptor {
        let json = ty.to_json(None).expect("encode");
        TypeDescriptor::from_json(&json, None).expect("decode")
    }

    #[test]
    fn builtin_variants_round_trip() {
        let cases = [
            TypeDescriptor::Unknown,
            TypeDescriptor::Invalid,
            TypeDescriptor::NUMBER,
            TypeDescriptor::BINARY,
            TypeDescriptor::Const(Value::from("cat")),
            TypeDescriptor::optional(TypeDescriptor::STRING),
            TypeDescriptor::union([TypeDescriptor::NUMBER, TypeDescriptor::NONE]),
            TypeDescriptor::record([
                ("a", TypeDescriptor::optional(TypeDescriptor::NUMBER)),
                ("b", TypeDescriptor::record([("c", TypeDescriptor::BOOLEAN)])),
            ]),
        ];
        for ty in &cases {
            assert_eq!(&round_trip(ty), ty);
        }
    }

    #[test]
    fn wire_shape_uses_wb_type_and_params() {
        let ty = TypeDescriptor::record([("a", TypeDescriptor::optional(TypeDescriptor::NUMBER))]);
        assert_eq!(
            ty.to_json(None).expect("encode"),
            json!({
                "wb_type": "dictionary",
                "params": {
                    "type_map": {
                        "a": {"wb_type": "optional", "params": {"inner_type": {"wb_type": "number"}}}
                    }
                }
            })
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = TypeDescriptor::from_json(&json!({"wb_type": "not-a-type"}), None)
            .expect_err("unknown");
        assert!(matches!(err, TypeJsonError::UnknownType { .. }));

        let err = TypeDescriptor::from_json(&json!({"params": {}}), None).expect_err("no name");
        assert!(matches!(err, TypeJsonError::Malformed { .. }));
    }
}
