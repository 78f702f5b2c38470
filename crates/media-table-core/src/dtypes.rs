//! Type descriptors and the narrowing lattice.
//!
//! A [`TypeDescriptor`] describes which values a column (or a nested field)
//! may hold. Descriptors are immutable: [`TypeDescriptor::assign`] returns a
//! new descriptor narrowed by an observed value, or
//! [`TypeDescriptor::Invalid`] when the value cannot be accepted. Folding
//! `assign` over a stream of rows yields a column's inferred type.
//!
//! Rules, by receiver:
//! - `Unknown` becomes the type of the value.
//! - `Primitive` and `Const` accept only matching values.
//! - `Optional` accepts `None` unchanged and narrows its inner type otherwise.
//! - `Union` narrows the first member that accepts the value and widens with
//!   the value's type when none does.
//! - `Record` narrows field by field; missing fields become optional and new
//!   fields are added as optional.
//! - `Custom` delegates to the kind registered in [`TypeRegistry`].
//!
//! [`TypeDescriptor::assign_type`] applies the same lattice between two
//! descriptors and is what custom kinds use for nested types.

pub mod json;
pub mod registry;

pub use json::TypeJsonError;
pub use registry::{CustomKind, TypeRegistry};

use std::fmt::{self, Write as _};

use indexmap::IndexMap;

use crate::media::classes::Classes;
use crate::value::Value;

/// Scalar kinds a [`TypeDescriptor::Primitive`] can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Any JSON number.
    Number,
    /// UTF-8 text.
    String,
    /// `true` / `false`.
    Boolean,
    /// The absent value.
    None,
    /// Opaque bytes.
    Binary,
}

impl PrimitiveKind {
    /// Wire name used in type JSON.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Number => "number",
            PrimitiveKind::String => "string",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::None => "none",
            PrimitiveKind::Binary => "binary",
        }
    }

    /// Parse a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "number" => PrimitiveKind::Number,
            "string" => PrimitiveKind::String,
            "boolean" => PrimitiveKind::Boolean,
            "none" => PrimitiveKind::None,
            "binary" => PrimitiveKind::Binary,
            _ => return None,
        })
    }
}

/// Members of a union type.
///
/// Nested unions are flattened and duplicates removed on construction.
/// Equality ignores member order.
#[derive(Debug, Clone, Default)]
pub struct UnionMembers(Vec<TypeDescriptor>);

impl UnionMembers {
    /// Build a member set, flattening nested unions and dropping duplicates.
    pub fn new(members: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        let mut out: Vec<TypeDescriptor> = Vec::new();
        for member in members {
            match member {
                TypeDescriptor::Union(nested) => {
                    for inner in nested.0 {
                        if !out.contains(&inner) {
                            out.push(inner);
                        }
                    }
                }
                other => {
                    if !out.contains(&other) {
                        out.push(other);
                    }
                }
            }
        }
        UnionMembers(out)
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.0.iter()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty union.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `member` is one of the members.
    pub fn contains(&self, member: &TypeDescriptor) -> bool {
        self.0.contains(member)
    }
}

impl PartialEq for UnionMembers {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|m| other.0.contains(m))
    }
}

/// A descriptor owned by a registered custom kind.
///
/// `params` hold nested descriptors (for example a nested table's column
/// types). `classes` carries the class set behind a class-id type; it is
/// auxiliary data and does not take part in equality.
#[derive(Debug, Clone)]
pub struct CustomType {
    /// Registry tag, for example `wandb.Table`.
    pub tag: String,
    /// Named nested descriptors.
    pub params: IndexMap<String, TypeDescriptor>,
    /// Class set for class-id types.
    pub classes: Option<Classes>,
}

impl CustomType {
    /// A custom type with no params.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            params: IndexMap::new(),
            classes: None,
        }
    }

    /// Add a param.
    pub fn with_param(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.params.insert(name.into(), ty);
        self
    }

    /// A param by name, `Unknown` when absent.
    pub fn param(&self, name: &str) -> TypeDescriptor {
        self.params
            .get(name)
            .cloned()
            .unwrap_or(TypeDescriptor::Unknown)
    }
}

impl PartialEq for CustomType {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.params == other.params
    }
}

/// A node of the type lattice.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// Nothing observed yet.
    Unknown,
    /// Result of a failed narrowing.
    Invalid,
    /// Exactly one allowed value.
    Const(Value),
    /// A scalar kind.
    Primitive(PrimitiveKind),
    /// The inner type or `None`.
    Optional(Box<TypeDescriptor>),
    /// Any one of the members.
    Union(UnionMembers),
    /// A fixed-shape record of named fields.
    Record(IndexMap<String, TypeDescriptor>),
    /// A type provided by a registered custom kind.
    Custom(CustomType),
}

impl TypeDescriptor {
    /// `Primitive(Number)`.
    pub const NUMBER: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Number);
    /// `Primitive(String)`.
    pub const STRING: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::String);
    /// `Primitive(Boolean)`.
    pub const BOOLEAN: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Boolean);
    /// `Primitive(None)`.
    pub const NONE: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::None);
    /// `Primitive(Binary)`.
    pub const BINARY: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Binary);

    /// Wrap in `Optional` unless already optional.
    pub fn optional(inner: TypeDescriptor) -> TypeDescriptor {
        match inner {
            TypeDescriptor::Optional(_) => inner,
            other => TypeDescriptor::Optional(Box::new(other)),
        }
    }

    /// A union over `members` (flattened, deduplicated).
    pub fn union(members: impl IntoIterator<Item = TypeDescriptor>) -> TypeDescriptor {
        TypeDescriptor::Union(UnionMembers::new(members))
    }

    /// The empty union, a seed that accepts every typeable value.
    pub fn empty_union() -> TypeDescriptor {
        TypeDescriptor::Union(UnionMembers::default())
    }

    /// A record over `(name, type)` pairs.
    pub fn record<K: Into<String>>(
        fields: impl IntoIterator<Item = (K, TypeDescriptor)>,
    ) -> TypeDescriptor {
        TypeDescriptor::Record(fields.into_iter().map(|(k, t)| (k.into(), t)).collect())
    }

    /// True for [`TypeDescriptor::Invalid`].
    pub fn is_invalid(&self) -> bool {
        matches!(self, TypeDescriptor::Invalid)
    }

    /// The type of a single value.
    pub fn of(value: &Value) -> TypeDescriptor {
        match value {
            Value::None => TypeDescriptor::NONE,
            Value::Bool(_) => TypeDescriptor::BOOLEAN,
            Value::Number(_) => TypeDescriptor::NUMBER,
            Value::String(_) => TypeDescriptor::STRING,
            Value::Binary(_) => TypeDescriptor::BINARY,
            Value::Record(fields) => TypeDescriptor::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), TypeDescriptor::of(v)))
                    .collect(),
            ),
            Value::Rich(rich) => TypeRegistry::global().type_of_rich(rich),
        }
    }

    /// Narrow this descriptor by an observed value.
    ///
    /// Never fails; incompatibility yields [`TypeDescriptor::Invalid`].
    pub fn assign(&self, value: &Value) -> TypeDescriptor {
        match self {
            TypeDescriptor::Unknown => TypeDescriptor::of(value),
            TypeDescriptor::Invalid => TypeDescriptor::Invalid,
            TypeDescriptor::Primitive(kind) => {
                if TypeDescriptor::of_scalar(value) == Some(*kind) {
                    self.clone()
                } else {
                    TypeDescriptor::Invalid
                }
            }
            TypeDescriptor::Const(expected) => {
                if expected == value {
                    self.clone()
                } else {
                    TypeDescriptor::Invalid
                }
            }
            TypeDescriptor::Optional(inner) => {
                if value.is_none() {
                    return self.clone();
                }
                match inner.assign(value) {
                    TypeDescriptor::Invalid => TypeDescriptor::Invalid,
                    narrowed => TypeDescriptor::optional(narrowed),
                }
            }
            TypeDescriptor::Union(members) => {
                union_narrow(members, |m| m.assign(value), || TypeDescriptor::of(value))
            }
            TypeDescriptor::Record(fields) => match value {
                Value::Record(incoming) => {
                    record_narrow(fields, incoming, |field, v| field.assign(v))
                }
                _ => TypeDescriptor::Invalid,
            },
            TypeDescriptor::Custom(custom) => match TypeRegistry::global().kind(&custom.tag) {
                Some(kind) => (kind.assign)(custom, value),
                None => TypeDescriptor::Invalid,
            },
        }
    }

    /// Narrow this descriptor by another descriptor.
    pub fn assign_type(&self, other: &TypeDescriptor) -> TypeDescriptor {
        use TypeDescriptor as T;
        match (self, other) {
            (T::Invalid, _) | (_, T::Invalid) => T::Invalid,
            (T::Unknown, other) => other.clone(),
            (this, T::Unknown) => this.clone(),
            (T::Primitive(a), T::Primitive(b)) if a == b => self.clone(),
            (T::Primitive(kind), T::Const(v)) if TypeDescriptor::of_scalar(v) == Some(*kind) => {
                self.clone()
            }
            (T::Const(a), T::Const(b)) if a == b => self.clone(),
            (T::Optional(_), T::Primitive(PrimitiveKind::None)) => self.clone(),
            (T::Optional(inner), T::Optional(other_inner)) => {
                match inner.assign_type(other_inner) {
                    T::Invalid => T::Invalid,
                    narrowed => TypeDescriptor::optional(narrowed),
                }
            }
            (T::Optional(inner), other) => match inner.assign_type(other) {
                T::Invalid => T::Invalid,
                narrowed => TypeDescriptor::optional(narrowed),
            },
            (T::Union(members), T::Union(incoming)) => {
                let mut current = T::Union(members.clone());
                for member in incoming.iter() {
                    current = current.assign_type(member);
                    if current.is_invalid() {
                        return T::Invalid;
                    }
                }
                current
            }
            (T::Union(members), other) => {
                union_narrow(members, |m| m.assign_type(other), || other.clone())
            }
            (T::Record(fields), T::Record(incoming)) => {
                record_narrow(fields, incoming, |field, t| field.assign_type(t))
            }
            (T::Custom(custom), other) => match TypeRegistry::global().kind(&custom.tag) {
                Some(kind) => (kind.assign_type)(custom, other),
                None => T::Invalid,
            },
            _ => T::Invalid,
        }
    }

    /// Human-readable description of why `value` does not narrow `self`.
    ///
    /// Record mismatches name each failing key, with nested keys indented
    /// one level deeper. Returns an empty string when `value` is accepted.
    pub fn explain(&self, value: &Value) -> String {
        let mut out = String::new();
        self.explain_into(value, 0, &mut out);
        out
    }

    fn explain_into(&self, value: &Value, depth: usize, out: &mut String) {
        if !self.assign(value).is_invalid() {
            return;
        }
        let indent = "  ".repeat(depth);
        let record = match self {
            TypeDescriptor::Record(fields) => Some(fields),
            TypeDescriptor::Optional(inner) => match inner.as_ref() {
                TypeDescriptor::Record(fields) => Some(fields),
                _ => None,
            },
            _ => None,
        };
        match (record, value) {
            (Some(fields), Value::Record(incoming)) => {
                for (key, field) in fields {
                    let Some(cell) = incoming.get(key) else {
                        continue;
                    };
                    if field.assign(cell).is_invalid() {
                        let _ = writeln!(out, "{indent}Key '{key}':");
                        field.explain_into(cell, depth + 1, out);
                    }
                }
            }
            _ => {
                let _ = writeln!(
                    out,
                    "{indent}Type {} is not assignable to {self}",
                    TypeDescriptor::of(value)
                );
            }
        }
    }

    fn of_scalar(value: &Value) -> Option<PrimitiveKind> {
        match TypeDescriptor::of(value) {
            TypeDescriptor::Primitive(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Shared union rule: narrow the first accepting member, widen otherwise.
fn union_narrow(
    members: &UnionMembers,
    narrow: impl Fn(&TypeDescriptor) -> TypeDescriptor,
    widen_with: impl FnOnce() -> TypeDescriptor,
) -> TypeDescriptor {
    let mut out: Vec<TypeDescriptor> = members.iter().cloned().collect();
    for slot in out.iter_mut() {
        let narrowed = narrow(slot);
        if !narrowed.is_invalid() {
            *slot = narrowed;
            return TypeDescriptor::union(out);
        }
    }
    match widen_with() {
        TypeDescriptor::Invalid => TypeDescriptor::Invalid,
        added => {
            out.push(added);
            TypeDescriptor::union(out)
        }
    }
}

/// Shared record rule for values and descriptors: narrow present fields,
/// make missing fields optional, add unseen fields as optional.
fn record_narrow<I: RecordItem>(
    fields: &IndexMap<String, TypeDescriptor>,
    incoming: &IndexMap<String, I>,
    narrow: impl Fn(&TypeDescriptor, &I) -> TypeDescriptor,
) -> TypeDescriptor {
    let mut out = IndexMap::with_capacity(fields.len());
    for (key, field) in fields {
        match incoming.get(key) {
            Some(item) => match narrow(field, item) {
                TypeDescriptor::Invalid => return TypeDescriptor::Invalid,
                narrowed => {
                    out.insert(key.clone(), narrowed);
                }
            },
            None => {
                out.insert(key.clone(), TypeDescriptor::optional(field.clone()));
            }
        }
    }
    for (key, item) in incoming {
        if !fields.contains_key(key) {
            out.insert(key.clone(), TypeDescriptor::optional(item.descriptor()));
        }
    }
    TypeDescriptor::Record(out)
}

/// Something a record field can be narrowed by.
trait RecordItem {
    fn descriptor(&self) -> TypeDescriptor;
}

impl RecordItem for Value {
    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::of(self)
    }
}

impl RecordItem for TypeDescriptor {
    fn descriptor(&self) -> TypeDescriptor {
        self.clone()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Unknown => f.write_str("unknown"),
            TypeDescriptor::Invalid => f.write_str("invalid"),
            TypeDescriptor::Primitive(kind) => f.write_str(kind.name()),
            TypeDescriptor::Const(value) => match value.to_plain_json() {
                Some(json) => write!(f, "const({json})"),
                None => write!(f, "const({})", value.kind_name()),
            },
            TypeDescriptor::Optional(inner) => write!(f, "optional({inner})"),
            TypeDescriptor::Union(members) => {
                f.write_str("union(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(")")
            }
            TypeDescriptor::Record(fields) => {
                f.write_str("{")?;
                for (i, (key, field)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {field}")?;
                }
                f.write_str("}")
            }
            TypeDescriptor::Custom(custom) => f.write_str(&custom.tag),
        }
    }
}
