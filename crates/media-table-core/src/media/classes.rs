//! Class sets: the `{id, name}` pairs annotations refer to.

use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use snafu::prelude::*;

use super::{JsonSnafu, MediaError, MissingFieldSnafu, UnsupportedDestinationSnafu};
use crate::destination::Destination;
use crate::dtypes::registry::CLASSES_ID_TAG;
use crate::dtypes::{CustomType, TypeDescriptor};
use crate::value::Value;

/// Identifier of one class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassId {
    /// Integer id.
    Int(i64),
    /// String id.
    Str(String),
}

impl ClassId {
    /// The id as a cell value.
    pub fn to_value(&self) -> Value {
        match self {
            ClassId::Int(id) => Value::from(*id),
            ClassId::Str(id) => Value::from(id.as_str()),
        }
    }

    fn from_value(value: &Value) -> Option<ClassId> {
        match value {
            Value::Number(n) => n.as_i64().map(ClassId::Int),
            Value::String(s) => Some(ClassId::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for ClassId {
    fn from(id: i64) -> Self {
        ClassId::Int(id)
    }
}

impl From<i32> for ClassId {
    fn from(id: i32) -> Self {
        ClassId::Int(i64::from(id))
    }
}

impl From<&str> for ClassId {
    fn from(id: &str) -> Self {
        ClassId::Str(id.to_string())
    }
}

impl From<String> for ClassId {
    fn from(id: String) -> Self {
        ClassId::Str(id)
    }
}

/// One `{id, name}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    /// Class id.
    pub id: ClassId,
    /// Display name.
    pub name: String,
}

/// An ordered class set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classes {
    class_set: Vec<ClassEntry>,
}

impl Classes {
    /// A class set from its entries.
    pub fn new(class_set: Vec<ClassEntry>) -> Self {
        Self { class_set }
    }

    /// A class set from `(id, name)` pairs.
    pub fn from_pairs<I, N>(pairs: impl IntoIterator<Item = (I, N)>) -> Self
    where
        I: Into<ClassId>,
        N: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(id, name)| ClassEntry {
                    id: id.into(),
                    name: name.into(),
                })
                .collect(),
        )
    }

    /// Rebuild a class set from bare id values, naming each class by its id.
    ///
    /// Values that are neither integers nor strings are skipped.
    pub fn from_id_values(ids: &[Value]) -> Self {
        Self::new(
            ids.iter()
                .filter_map(ClassId::from_value)
                .map(|id| {
                    let name = match &id {
                        ClassId::Int(n) => n.to_string(),
                        ClassId::Str(s) => s.clone(),
                    };
                    ClassEntry { id, name }
                })
                .collect(),
        )
    }

    /// The entries, in order.
    pub fn entries(&self) -> &[ClassEntry] {
        &self.class_set
    }

    /// The `wandb.Classes_id` type accepting exactly this set's ids.
    pub fn id_type(&self) -> CustomType {
        let ids = self
            .class_set
            .iter()
            .map(|entry| TypeDescriptor::Const(entry.id.to_value()));
        let mut custom =
            CustomType::new(CLASSES_ID_TAG).with_param("valid_ids", TypeDescriptor::union(ids));
        custom.classes = Some(self.clone());
        custom
    }

    /// `{"_type": "classes", "class_set": [...]}`.
    pub fn to_inline_json(&self) -> Json {
        json!({
            "_type": "classes",
            "class_set": self.class_set,
        })
    }

    /// Serialize toward a manifest. Class sets are not logged to runs.
    pub fn to_json(&mut self, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
        ensure!(
            matches!(destination, Destination::Manifest(_)),
            UnsupportedDestinationSnafu {
                kind: "classes",
                destination: destination.kind_name(),
            }
        );
        Ok(self.to_inline_json())
    }

    /// Load from `{"class_set": [...]}`.
    pub fn from_json(json: &Json) -> Result<Classes, MediaError> {
        let class_set = json.get("class_set").context(MissingFieldSnafu {
            kind: "classes",
            field: "class_set",
        })?;
        let class_set = Vec::<ClassEntry>::deserialize(class_set).context(JsonSnafu)?;
        Ok(Self::new(class_set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{LocalRun, Step};
    use tempfile::TempDir;

    #[test]
    fn mixed_ids_serialize_untagged() {
        let classes = Classes::from_pairs([(ClassId::from(1), "cat"), (ClassId::from("bg"), "background")]);
        let json = classes.to_inline_json();
        assert_eq!(
            json["class_set"],
            json!([{"id": 1, "name": "cat"}, {"id": "bg", "name": "background"}])
        );
        assert_eq!(Classes::from_json(&json).expect("decode"), classes);
    }

    #[test]
    fn class_set_is_required() {
        let err = Classes::from_json(&json!({"_type": "classes"})).expect_err("missing");
        assert!(matches!(err, MediaError::MissingField { field: "class_set", .. }));
    }

    #[test]
    fn id_values_rebuild_a_class_set() {
        let classes = Classes::from_id_values(&[Value::from(3), Value::from("x"), Value::Bool(true)]);
        assert_eq!(classes.entries().len(), 2);
        assert_eq!(classes.entries()[0].name, "3");
    }

    #[test]
    fn run_logs_are_not_a_destination() {
        let tmp = TempDir::new().expect("tmp");
        let mut run = LocalRun::new(tmp.path()).expect("run");
        let mut classes = Classes::from_pairs([(1, "cat")]);
        let err = classes
            .to_json(&mut Destination::log(&mut run, "c", Step::Index(0)))
            .expect_err("log");
        assert!(matches!(err, MediaError::UnsupportedDestination { kind: "classes", .. }));
    }
}
