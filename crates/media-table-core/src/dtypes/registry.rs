//! Registry of custom type kinds.
//!
//! Rich values type themselves through [`CustomKind`] entries: plain tables
//! of function pointers keyed by a tag. The process-wide registry is built
//! once, on first use, from [`TypeRegistry::builtin`]; a caller that needs
//! extra kinds installs its own registry with [`TypeRegistry::install`]
//! before anything is typed.
//!
//! Builtin kinds:
//! - `wandb.Table`: narrows nested column types.
//! - `wandb.Image`: narrows the sets of bounding-box and mask keys.
//! - `wandb.Classes_id`: accepts only the ids of a class set.
//! - one opaque kind per other rich value (audio, joined and partitioned
//!   tables, box and mask annotations), accepting values of the same kind.
//!
//! The `wandb.` prefix is part of the wire format: documents written by
//! existing run logs and manifests carry these exact tags in `wb_type`.

use std::fmt;
use std::sync::OnceLock;

use indexmap::IndexMap;
use serde_json::{Map, Value as Json, json};

use super::json::{MediaSnafu, params_from_json, params_to_json};
use super::{CustomType, TypeDescriptor, TypeJsonError};
use crate::destination::{Manifest, SourceManifest};
use crate::layout::CLASSES_ENTRY_NAME;
use crate::media::classes::Classes;
use crate::media::{MediaError, RichValue, add_to_manifest};
use crate::value::Value;

use snafu::ResultExt;

// Wire-compatibility names; renaming them breaks reading existing documents.

/// Tag of nested table types.
pub const TABLE_TAG: &str = "wandb.Table";
/// Tag of image types.
pub const IMAGE_TAG: &str = "wandb.Image";
/// Tag of class-id types.
pub const CLASSES_ID_TAG: &str = "wandb.Classes_id";
/// Tag of audio types.
pub const AUDIO_TAG: &str = "wandb.Audio";
/// Tag of joined table types.
pub const JOINED_TABLE_TAG: &str = "wandb.JoinedTable";
/// Tag of partitioned table types.
pub const PARTITIONED_TABLE_TAG: &str = "wandb.PartitionedTable";
/// Tag of bounding box annotation types.
pub const BOXES_TAG: &str = "wandb.BoundingBoxes2D";
/// Tag of image mask types.
pub const MASK_TAG: &str = "wandb.ImageMask";

/// Narrowing, typing and JSON behavior of one custom kind.
#[derive(Clone, Copy)]
pub struct CustomKind {
    /// Tag identifying the kind in descriptors and type JSON.
    pub tag: &'static str,
    /// Type a rich value of this kind.
    pub from_value: fn(&RichValue) -> Option<CustomType>,
    /// Narrow a descriptor of this kind by a value.
    pub assign: fn(&CustomType, &Value) -> TypeDescriptor,
    /// Narrow a descriptor of this kind by another descriptor.
    pub assign_type: fn(&CustomType, &TypeDescriptor) -> TypeDescriptor,
    /// Encode the `params` object.
    pub to_json: fn(&CustomType, Option<&mut dyn Manifest>) -> Result<Map<String, Json>, TypeJsonError>,
    /// Decode from the tag and `params` object.
    pub from_json:
        fn(&str, &Map<String, Json>, Option<&dyn SourceManifest>) -> Result<CustomType, TypeJsonError>,
}

impl fmt::Debug for CustomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomKind").field("tag", &self.tag).finish()
    }
}

/// Custom kinds keyed by tag.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    kinds: IndexMap<&'static str, CustomKind>,
}

static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

impl TypeRegistry {
    /// A registry with no kinds.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every builtin kind.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(CustomKind {
            tag: TABLE_TAG,
            from_value: table_from_value,
            assign: table_assign,
            assign_type: table_assign_type,
            to_json: generic_to_json,
            from_json: generic_from_json,
        });
        registry.register(CustomKind {
            tag: IMAGE_TAG,
            from_value: image_from_value,
            assign: image_assign,
            assign_type: image_assign_type,
            to_json: generic_to_json,
            from_json: generic_from_json,
        });
        registry.register(CustomKind {
            tag: CLASSES_ID_TAG,
            from_value: classes_from_value,
            assign: classes_assign,
            assign_type: classes_assign_type,
            to_json: classes_to_json,
            from_json: classes_from_json,
        });
        for tag in [
            AUDIO_TAG,
            JOINED_TABLE_TAG,
            PARTITIONED_TABLE_TAG,
            BOXES_TAG,
            MASK_TAG,
        ] {
            registry.register(CustomKind {
                tag,
                from_value: opaque_from_value,
                assign: opaque_assign,
                assign_type: opaque_assign_type,
                to_json: generic_to_json,
                from_json: generic_from_json,
            });
        }
        registry
    }

    /// Add or replace a kind, returning the replaced one.
    pub fn register(&mut self, kind: CustomKind) -> Option<CustomKind> {
        self.kinds.insert(kind.tag, kind)
    }

    /// Look up a kind by tag.
    pub fn kind(&self, tag: &str) -> Option<&CustomKind> {
        self.kinds.get(tag)
    }

    /// Tags of all registered kinds, in registration order.
    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.keys().copied()
    }

    /// The process-wide registry, initialized with [`TypeRegistry::builtin`]
    /// unless one was installed first.
    pub fn global() -> &'static TypeRegistry {
        GLOBAL.get_or_init(TypeRegistry::builtin)
    }

    /// Install the process-wide registry.
    ///
    /// Fails, handing the registry back, once the global registry has been
    /// initialized (by an earlier install or by first use).
    pub fn install(registry: TypeRegistry) -> Result<(), TypeRegistry> {
        GLOBAL.set(registry)
    }

    /// Type a rich value through the kind registered for its tag.
    ///
    /// Values whose kind is not registered type as `Invalid`.
    pub fn type_of_rich(&self, rich: &RichValue) -> TypeDescriptor {
        self.kind(rich.custom_tag())
            .and_then(|kind| (kind.from_value)(rich))
            .map_or(TypeDescriptor::Invalid, TypeDescriptor::Custom)
    }
}

fn same_tag<'a>(custom: &CustomType, other: &'a TypeDescriptor) -> Option<&'a CustomType> {
    match other {
        TypeDescriptor::Custom(other) if other.tag == custom.tag => Some(other),
        _ => None,
    }
}

fn generic_to_json(
    custom: &CustomType,
    context: Option<&mut dyn Manifest>,
) -> Result<Map<String, Json>, TypeJsonError> {
    params_to_json(&custom.params, context)
}

fn generic_from_json(
    tag: &str,
    params: &Map<String, Json>,
    source: Option<&dyn SourceManifest>,
) -> Result<CustomType, TypeJsonError> {
    Ok(CustomType {
        tag: tag.to_string(),
        params: params_from_json(params, source)?,
        classes: None,
    })
}

// ==== tables ====

fn table_from_value(rich: &RichValue) -> Option<CustomType> {
    match rich {
        RichValue::Table(table) => Some(
            CustomType::new(TABLE_TAG).with_param("column_types", table.column_types().clone()),
        ),
        _ => None,
    }
}

fn table_assign(custom: &CustomType, value: &Value) -> TypeDescriptor {
    table_assign_type(custom, &TypeDescriptor::of(value))
}

fn table_assign_type(custom: &CustomType, other: &TypeDescriptor) -> TypeDescriptor {
    let Some(other) = same_tag(custom, other) else {
        return TypeDescriptor::Invalid;
    };
    match custom
        .param("column_types")
        .assign_type(&other.param("column_types"))
    {
        TypeDescriptor::Invalid => TypeDescriptor::Invalid,
        column_types => TypeDescriptor::Custom(
            CustomType::new(TABLE_TAG).with_param("column_types", column_types),
        ),
    }
}

// ==== images ====

/// A set of annotation keys as a const descriptor.
pub(crate) fn key_set<'a>(keys: impl Iterator<Item = &'a String>) -> TypeDescriptor {
    let mut keys: Vec<&String> = keys.collect();
    keys.sort();
    TypeDescriptor::Const(Value::Record(
        keys.into_iter()
            .map(|k| (k.clone(), Value::Bool(true)))
            .collect(),
    ))
}

fn image_from_value(rich: &RichValue) -> Option<CustomType> {
    match rich {
        RichValue::Image(image) => Some(
            CustomType::new(IMAGE_TAG)
                .with_param("box_keys", key_set(image.boxes().keys()))
                .with_param("mask_keys", key_set(image.masks().keys())),
        ),
        _ => None,
    }
}

fn image_assign(custom: &CustomType, value: &Value) -> TypeDescriptor {
    image_assign_type(custom, &TypeDescriptor::of(value))
}

fn image_assign_type(custom: &CustomType, other: &TypeDescriptor) -> TypeDescriptor {
    let Some(other) = same_tag(custom, other) else {
        return TypeDescriptor::Invalid;
    };
    let box_keys = custom.param("box_keys").assign_type(&other.param("box_keys"));
    let mask_keys = custom
        .param("mask_keys")
        .assign_type(&other.param("mask_keys"));
    if box_keys.is_invalid() || mask_keys.is_invalid() {
        return TypeDescriptor::Invalid;
    }
    TypeDescriptor::Custom(
        CustomType::new(IMAGE_TAG)
            .with_param("box_keys", box_keys)
            .with_param("mask_keys", mask_keys),
    )
}

// ==== class ids ====

fn classes_from_value(rich: &RichValue) -> Option<CustomType> {
    match rich {
        RichValue::Classes(classes) => Some(classes.id_type()),
        _ => None,
    }
}

fn classes_assign(custom: &CustomType, value: &Value) -> TypeDescriptor {
    match custom.params.get("valid_ids") {
        Some(TypeDescriptor::Union(ids)) if ids.contains(&TypeDescriptor::Const(value.clone())) => {
            TypeDescriptor::Custom(custom.clone())
        }
        _ => TypeDescriptor::Invalid,
    }
}

fn classes_assign_type(custom: &CustomType, other: &TypeDescriptor) -> TypeDescriptor {
    match other {
        TypeDescriptor::Const(value) => classes_assign(custom, value),
        TypeDescriptor::Custom(other) if other == custom => TypeDescriptor::Custom(custom.clone()),
        _ => TypeDescriptor::Invalid,
    }
}

fn classes_of(custom: &CustomType) -> Classes {
    match &custom.classes {
        Some(classes) => classes.clone(),
        None => {
            let ids = match custom.params.get("valid_ids") {
                Some(TypeDescriptor::Union(ids)) => ids
                    .iter()
                    .filter_map(|id| match id {
                        TypeDescriptor::Const(value) => Some(value.clone()),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            };
            Classes::from_id_values(&ids)
        }
    }
}

fn classes_to_json(
    custom: &CustomType,
    context: Option<&mut dyn Manifest>,
) -> Result<Map<String, Json>, TypeJsonError> {
    let mut params = Map::new();
    params.insert(
        "valid_ids".to_string(),
        custom.param("valid_ids").to_json(None)?,
    );

    let classes = classes_of(custom);
    let classes_obj = match context {
        Some(manifest) => {
            let mut rich = RichValue::Classes(classes);
            let entry =
                add_to_manifest(manifest, &mut rich, CLASSES_ENTRY_NAME).context(MediaSnafu)?;
            json!({
                "type": "classes-file",
                "path": entry.path,
                "digest": entry.digest,
            })
        }
        None => classes.to_inline_json(),
    };
    params.insert("classes_obj".to_string(), classes_obj);
    Ok(params)
}

fn classes_from_json(
    _tag: &str,
    params: &Map<String, Json>,
    source: Option<&dyn SourceManifest>,
) -> Result<CustomType, TypeJsonError> {
    let Some(classes_obj) = params.get("classes_obj") else {
        let valid_ids = match params.get("valid_ids") {
            Some(json) => TypeDescriptor::from_json(json, source)?,
            None => TypeDescriptor::empty_union(),
        };
        let custom = CustomType::new(CLASSES_ID_TAG).with_param("valid_ids", valid_ids);
        return Ok(classes_of(&custom).id_type());
    };

    let classes = if classes_obj.get("type").and_then(Json::as_str) == Some("classes-file") {
        let path = classes_obj
            .get("path")
            .and_then(Json::as_str)
            .ok_or_else(|| TypeJsonError::Malformed {
                reason: "classes-file reference without `path`".to_string(),
            })?;
        let source = source.ok_or_else(|| TypeJsonError::Malformed {
            reason: format!("classes-file reference {path} needs a source manifest"),
        })?;
        match source.get(path).context(MediaSnafu)? {
            Some(RichValue::Classes(classes)) => classes,
            _ => {
                return Err(MediaError::UnresolvedReference {
                    path: path.to_string(),
                })
                .context(MediaSnafu);
            }
        }
    } else {
        Classes::from_json(classes_obj).context(MediaSnafu)?
    };
    Ok(classes.id_type())
}

// ==== opaque kinds ====

fn opaque_from_value(rich: &RichValue) -> Option<CustomType> {
    Some(CustomType::new(rich.custom_tag()))
}

fn opaque_assign(custom: &CustomType, value: &Value) -> TypeDescriptor {
    opaque_assign_type(custom, &TypeDescriptor::of(value))
}

fn opaque_assign_type(custom: &CustomType, other: &TypeDescriptor) -> TypeDescriptor {
    match same_tag(custom, other) {
        Some(_) => TypeDescriptor::Custom(custom.clone()),
        None => TypeDescriptor::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::audio::Audio;
    use crate::media::image::Image;
    use crate::table::Table;
    use crate::media::annotations::BoundingBoxes2D;

    fn image_with_boxes(keys: &[&str]) -> Value {
        let mut image = Image::new(vec![1, 2, 3], "png", 2, 2);
        for key in keys {
            image = image.with_boxes(*key, BoundingBoxes2D::empty(*key));
        }
        RichValue::Image(image).into()
    }

    #[test]
    fn builtin_registry_covers_every_rich_tag() {
        let registry = TypeRegistry::builtin();
        let tags: Vec<_> = registry.tags().collect();
        for tag in [
            TABLE_TAG,
            IMAGE_TAG,
            CLASSES_ID_TAG,
            AUDIO_TAG,
            JOINED_TABLE_TAG,
            PARTITIONED_TABLE_TAG,
            BOXES_TAG,
            MASK_TAG,
        ] {
            assert!(tags.contains(&tag), "missing {tag}");
        }
    }

    #[test]
    fn nested_tables_narrow_their_column_types() {
        let table = Table::from_rows(vec!["x".into()], vec![vec![1.into()]]).expect("table");
        let ty = TypeDescriptor::Unknown.assign(&RichValue::Table(table).into());
        let TypeDescriptor::Custom(custom) = &ty else {
            panic!("expected custom type, got {ty}");
        };
        assert_eq!(custom.tag, TABLE_TAG);

        let other = Table::from_rows(vec!["x".into()], vec![vec!["s".into()]]).expect("table");
        assert!(ty.assign(&RichValue::Table(other).into()).is_invalid());
    }

    #[test]
    fn images_with_different_box_keys_conflict() {
        let ty = TypeDescriptor::Unknown.assign(&image_with_boxes(&["pred"]));
        assert!(!ty.assign(&image_with_boxes(&["pred"])).is_invalid());
        assert!(ty.assign(&image_with_boxes(&["truth"])).is_invalid());
    }

    #[test]
    fn class_ids_accept_only_members() {
        let classes = Classes::from_pairs([(1, "cat"), (2, "dog")]);
        let ty = TypeDescriptor::Custom(classes.id_type());
        assert_eq!(ty.assign(&1.into()), ty);
        assert!(ty.assign(&3.into()).is_invalid());
        assert!(ty.assign(&"cat".into()).is_invalid());
    }

    #[test]
    fn class_id_type_round_trips_inline() {
        let classes = Classes::from_pairs([(1, "cat"), (2, "dog")]);
        let ty = TypeDescriptor::Custom(classes.id_type());
        let json = ty.to_json(None).expect("encode");
        assert_eq!(json["params"]["classes_obj"]["_type"], "classes");
        let back = TypeDescriptor::from_json(&json, None).expect("decode");
        assert_eq!(back, ty);
        let TypeDescriptor::Custom(custom) = back else {
            panic!("expected custom");
        };
        assert_eq!(custom.classes, Some(classes));
    }

    #[test]
    fn opaque_kinds_accept_their_own_kind_only() {
        let audio: Value = RichValue::Audio(Audio::new(vec![0; 4], "wav", Some(8000))).into();
        let ty = TypeDescriptor::Unknown.assign(&audio);
        assert_eq!(ty, TypeDescriptor::Custom(CustomType::new(AUDIO_TAG)));
        assert_eq!(ty.assign(&audio), ty);
        assert!(ty.assign(&image_with_boxes(&[])).is_invalid());
    }

    #[test]
    fn empty_registry_types_rich_values_as_invalid() {
        let registry = TypeRegistry::empty();
        let rich = RichValue::Audio(Audio::new(vec![0; 4], "wav", None));
        assert!(registry.type_of_rich(&rich).is_invalid());
    }
}
