//! Integration tests for column type inference.
//!
//! These tests exercise the public `Table` surface end to end:
//! - narrowing on `add_data` and atomic rejection,
//! - permissive union widening for mixed-type columns,
//! - `cast` re-checking stored values,
//! - incremental typing agreeing with a full recompute.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use media_table_core::dtypes::TypeDescriptor;
use media_table_core::table::{Table, TableError};
use media_table_core::value::{ColumnName, Value};
use proptest::prelude::*;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn cols(names: &[&str]) -> Vec<ColumnName> {
    names.iter().map(|n| ColumnName::from(*n)).collect()
}

#[test]
fn required_columns_narrow_to_primitives_and_reject_other_kinds() -> TestResult {
    let mut table = Table::new(cols(&["a", "b"]), false, TypeDescriptor::Unknown)?;
    table.add_data(vec![1.into(), "x".into()])?;
    assert_eq!(
        *table.column_types(),
        TypeDescriptor::record([("a", TypeDescriptor::NUMBER), ("b", TypeDescriptor::STRING)])
    );

    let before = table.column_types().clone();
    let err = table
        .add_data(vec!["y".into(), "z".into()])
        .expect_err("string into number column");
    match err {
        TableError::TypeNarrowing { columns, explanation } => {
            assert_eq!(columns, vec!["a".to_string()]);
            assert!(!explanation.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*table.column_types(), before);
    assert_eq!(table.len(), 1);
    Ok(())
}

#[test]
fn shape_errors_leave_the_table_untouched() -> TestResult {
    let mut table = Table::with_columns(cols(&["a", "b"]))?;
    let err = table.add_data(vec![1.into()]).expect_err("short row");
    assert!(matches!(err, TableError::Shape { expected: 2, found: 1 }));
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn mixed_type_columns_widen_into_a_union() -> TestResult {
    let mut table = Table::with_mixed_types(cols(&["v"]))?;
    for cell in [Value::from(1), Value::from("a"), Value::from(2)] {
        table.add_data(vec![cell])?;
    }
    assert_eq!(
        *table.column_type(&"v".into())?,
        TypeDescriptor::union([TypeDescriptor::NUMBER, TypeDescriptor::STRING])
    );
    Ok(())
}

#[test]
fn optional_columns_accept_missing_values() -> TestResult {
    let mut table = Table::with_columns(cols(&["score"]))?;
    table.add_data(vec![Value::None])?;
    table.add_data(vec![0.5.into()])?;
    table.add_data(vec![Value::None])?;
    assert_eq!(
        *table.column_type(&"score".into())?,
        TypeDescriptor::optional(TypeDescriptor::NUMBER)
    );
    Ok(())
}

#[test]
fn cast_rechecks_stored_values() -> TestResult {
    let mut table = Table::with_columns(cols(&["label"]))?;
    table.add_data(vec!["cat".into()])?;
    table.add_data(vec![Value::None])?;

    let before = table.column_type(&"label".into())?.clone();
    let err = table
        .cast("label", TypeDescriptor::NUMBER, true)
        .expect_err("strings are not numbers");
    assert!(matches!(err, TableError::TypeNarrowing { .. }));
    assert_eq!(*table.column_type(&"label".into())?, before);

    let ty = table.cast("label", TypeDescriptor::STRING, true)?;
    assert_eq!(ty, TypeDescriptor::optional(TypeDescriptor::STRING));
    table.add_data(vec!["dog".into()])?;
    table.add_data(vec![Value::None])?;

    let err = table.cast("missing", TypeDescriptor::STRING, true).expect_err("no column");
    assert!(matches!(err, TableError::UnknownColumn { .. }));
    Ok(())
}

#[test]
fn cast_to_an_enumeration_restricts_new_rows() -> TestResult {
    let mut table = Table::with_columns(cols(&["split"]))?;
    table.add_data(vec!["train".into()])?;
    let allowed = TypeDescriptor::union([
        TypeDescriptor::Const("train".into()),
        TypeDescriptor::Const("test".into()),
    ]);
    table.cast("split", allowed, false)?;
    table.add_data(vec!["test".into()])?;
    Ok(())
}

#[test]
fn duplicate_columns_and_bad_broadcasts_are_rejected() {
    let err = Table::with_columns(cols(&["a", "a"])).expect_err("duplicate");
    assert!(matches!(err, TableError::DuplicateColumn { .. }));

    let err = Table::new(cols(&["a", "b"]), vec![true], TypeDescriptor::Unknown)
        .expect_err("one flag for two columns");
    assert!(matches!(err, TableError::BroadcastLength { .. }));
}

fn cell() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::None),
        any::<bool>().prop_map(Value::from),
        (-1000i64..1000).prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn incremental_typing_matches_recompute(rows in prop::collection::vec((cell(), cell()), 0..40)) {
        let mut table = Table::with_columns(cols(&["x", "y"])).unwrap();
        for (x, y) in rows {
            // Rejected rows must not change anything either.
            let _ = table.add_data(vec![x, y]);
            prop_assert_eq!(table.column_types(), &table.recompute_column_types());
        }
    }

    #[test]
    fn mixed_type_tables_accept_every_scalar(rows in prop::collection::vec(cell(), 1..30)) {
        let mut table = Table::with_mixed_types(cols(&["v"])).unwrap();
        for v in rows {
            prop_assert!(table.add_data(vec![v]).is_ok());
        }
        prop_assert_eq!(table.column_types(), &table.recompute_column_types());
    }
}
