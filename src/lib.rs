/// LiveSummary - Incrementally Maintained Summary Tables
///
/// Groups the rows of a source table by an ordered set of columns and keeps a
/// summary table of every distinct combination up to date as the source
/// changes. Grouping columns may be multi-valued label sets; a row then takes
/// part in every combination of its labels.
///
/// Summaries grouped only by scalar columns use an equality index. Summaries
/// with any multi-valued column use per-column posting lists and answer a
/// combination by intersection.

pub mod value;
pub mod column;
pub mod table;
pub mod changeset;
pub mod key;
pub mod index;
pub mod adapter;
pub mod summary;
pub mod engine;
mod journal;
pub mod config;
pub mod error;

pub use value::{Atom, LabelSet, Value};
pub use column::{ColumnDecl, ColumnKind};
pub use table::{RowId, Schema, SourceTable};
pub use changeset::TableChange;
pub use key::{GroupingKey, KeyTuple};
pub use index::{EqualityIndex, IndexOp, LookupIndex, MembershipIndex};
pub use adapter::{IndexPlan, SourceChangeAdapter};
pub use summary::{ReconcileReport, SummaryId, SummaryRecord, SummaryRow, SummarySnapshot, SummaryTable};
pub use engine::{SourceAction, SummaryEngine, TransactionReport};
pub use config::{EngineConfig, GroupingSpec};
pub use error::{Result, SummaryError};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::collections::HashMap;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn choice_source() -> SourceTable {
        let schema = Schema::new(vec![
            ColumnDecl::scalar("other"),
            ColumnDecl::multi_valued("choices1"),
            ColumnDecl::multi_valued("choices2"),
        ]);
        SourceTable::new("Source".to_string(), schema)
    }

    fn engine(source: SourceTable) -> SummaryEngine {
        init_logging();
        SummaryEngine::with_config(source, EngineConfig::default().with_invariant_checks(true))
    }

    fn choices(c1: &[&str], c2: &[&str]) -> HashMap<String, Value> {
        let mut row = HashMap::new();
        row.insert("choices1".to_string(), Value::labels(c1.iter().copied()));
        row.insert("choices2".to_string(), Value::labels(c2.iter().copied()));
        row
    }

    fn full_row(other: &str, c1: &[&str], c2: &[&str]) -> HashMap<String, Value> {
        let mut row = choices(c1, c2);
        row.insert("other".to_string(), Value::scalar(other));
        row
    }

    /// (grouping values, group) for every summary row, in row id order
    fn table_data(engine: &SummaryEngine, summary: SummaryId) -> Vec<(RowId, String, Vec<RowId>)> {
        engine
            .summary(summary)
            .unwrap()
            .rows()
            .map(|row| {
                assert_eq!(row.count(), row.group.len());
                (row.id, row.grouping_values.to_string(), row.group.iter().copied().collect())
            })
            .collect()
    }

    fn data(expected: &[(RowId, &str, &[RowId])]) -> Vec<(RowId, String, Vec<RowId>)> {
        expected
            .iter()
            .map(|(id, tuple, group)| (*id, tuple.to_string(), group.to_vec()))
            .collect()
    }

    #[test]
    fn test_summary_by_choice_list() {
        let mut e = engine(choice_source());
        e.apply(SourceAction::insert_with_id(21, full_row("foo", &["a", "b"], &["c", "d"])))
            .unwrap();

        let by_choices1 = e.create_summary(GroupingSpec::new(["choices1"])).unwrap();
        let by_both = e.create_summary(GroupingSpec::new(["choices1", "choices2"])).unwrap();
        let by_other = e.create_summary(GroupingSpec::new(["other"])).unwrap();
        let by_other_choices1 = e.create_summary(GroupingSpec::new(["other", "choices1"])).unwrap();

        assert_eq!(table_data(&e, by_choices1), data(&[(1, "(a)", &[21]), (2, "(b)", &[21])]));
        assert_eq!(
            table_data(&e, by_both),
            data(&[
                (1, "(a, c)", &[21]),
                (2, "(a, d)", &[21]),
                (3, "(b, c)", &[21]),
                (4, "(b, d)", &[21]),
            ])
        );
        assert_eq!(table_data(&e, by_other), data(&[(1, "(foo)", &[21])]));
        assert_eq!(
            table_data(&e, by_other_choices1),
            data(&[(1, "(foo, a)", &[21]), (2, "(foo, b)", &[21])])
        );

        // Only the summary without label-set columns runs in simple mode
        assert!(!e.summary(by_choices1).unwrap().is_simple());
        assert!(!e.summary(by_both).unwrap().is_simple());
        assert!(e.summary(by_other).unwrap().is_simple());
        assert!(!e.summary(by_other_choices1).unwrap().is_simple());
        assert!(e.source().index(by_other).unwrap().is_simple());
        assert!(!e.source().index(by_both).unwrap().is_simple());

        // Remove 'b' from choices1
        e.update_row(21, HashMap::from([("choices1".to_string(), Value::labels(["a"]))]))
            .unwrap();
        assert_eq!(table_data(&e, by_choices1), data(&[(1, "(a)", &[21]), (2, "(b)", &[])]));
        assert_eq!(
            table_data(&e, by_both),
            data(&[
                (1, "(a, c)", &[21]),
                (2, "(a, d)", &[21]),
                (3, "(b, c)", &[]),
                (4, "(b, d)", &[]),
            ])
        );

        // Add 'e' to choices2
        let report = e
            .update_row(21, HashMap::from([("choices2".to_string(), Value::labels(["c", "d", "e"]))]))
            .unwrap();
        assert!(!report.summaries.contains_key(&by_choices1));
        assert_eq!(report.created(by_both), &[5]);
        assert_eq!(table_data(&e, by_choices1), data(&[(1, "(a)", &[21]), (2, "(b)", &[])]));
        assert_eq!(
            table_data(&e, by_both),
            data(&[
                (1, "(a, c)", &[21]),
                (2, "(a, d)", &[21]),
                (3, "(b, c)", &[]),
                (4, "(b, d)", &[]),
                (5, "(a, e)", &[21]),
            ])
        );

        // Remove the record; every summary row stays, emptied
        e.delete_row(21).unwrap();
        assert_eq!(table_data(&e, by_choices1), data(&[(1, "(a)", &[]), (2, "(b)", &[])]));
        assert_eq!(e.summary(by_both).unwrap().len(), 5);
        assert!(e.summary(by_both).unwrap().rows().all(|row| row.count() == 0));
        assert_eq!(table_data(&e, by_other), data(&[(1, "(foo)", &[])]));

        // Every combination of {a,b,ab} and {c,d,cd}
        let combos: [(&[&str], &[&str]); 9] = [
            (&["a"], &["c"]),
            (&["b"], &["c"]),
            (&["a", "b"], &["c"]),
            (&["a"], &["d"]),
            (&["b"], &["d"]),
            (&["a", "b"], &["d"]),
            (&["a"], &["c", "d"]),
            (&["b"], &["c", "d"]),
            (&["a", "b"], &["c", "d"]),
        ];
        let actions = combos
            .iter()
            .zip(101..)
            .map(|((c1, c2), id)| SourceAction::insert_with_id(id, full_row("", c1, c2)));
        let report = e.apply_all(actions).unwrap();
        assert_eq!(report.inserted, (101..=109).collect::<Vec<_>>());
        assert!(report.created(by_both).is_empty());

        assert_eq!(
            table_data(&e, by_choices1),
            data(&[
                (1, "(a)", &[101, 103, 104, 106, 107, 109]),
                (2, "(b)", &[102, 103, 105, 106, 108, 109]),
            ])
        );
        assert_eq!(
            table_data(&e, by_both),
            data(&[
                (1, "(a, c)", &[101, 103, 107, 109]),
                (2, "(a, d)", &[104, 106, 107, 109]),
                (3, "(b, c)", &[102, 103, 108, 109]),
                (4, "(b, d)", &[105, 106, 108, 109]),
                (5, "(a, e)", &[]),
            ])
        );
        e.verify().unwrap();
    }

    #[test]
    fn test_rename_choices() {
        let mut e = engine(choice_source());
        e.apply(SourceAction::insert_with_id(21, full_row("foo", &["a", "b"], &["c", "d"])))
            .unwrap();
        let s = e.create_summary(GroupingSpec::new(["choices1", "choices2"])).unwrap();

        let report = e
            .apply(SourceAction::rename_labels("choices1", [("a", "aa"), ("b", "bb")]))
            .unwrap();
        assert_eq!(report.created(s), &[5, 6, 7, 8]);
        assert_eq!(report.summaries[&s].changed, vec![1, 2, 3, 4]);

        e.apply(SourceAction::rename_labels("choices2", [("c", "cc"), ("d", "dd")]))
            .unwrap();

        assert_eq!(e.source().get_value(21, "choices1").unwrap(), &Value::labels(["aa", "bb"]));
        assert_eq!(e.source().get_value(21, "choices2").unwrap(), &Value::labels(["cc", "dd"]));

        assert_eq!(
            table_data(&e, s),
            data(&[
                (1, "(a, c)", &[]),
                (2, "(a, d)", &[]),
                (3, "(b, c)", &[]),
                (4, "(b, d)", &[]),
                (5, "(aa, c)", &[]),
                (6, "(aa, d)", &[]),
                (7, "(bb, c)", &[]),
                (8, "(bb, d)", &[]),
                (9, "(aa, cc)", &[21]),
                (10, "(aa, dd)", &[21]),
                (11, "(bb, cc)", &[21]),
                (12, "(bb, dd)", &[21]),
            ])
        );
    }

    #[test]
    fn test_rename_cycle_restores_groups() {
        let mut e = engine(choice_source());
        e.insert_row(full_row("x", &["a"], &["c"])).unwrap();
        e.insert_row(full_row("y", &["a", "b"], &["c"])).unwrap();
        e.insert_row(full_row("z", &["b"], &["d"])).unwrap();
        let s = e.create_summary(GroupingSpec::new(["choices1", "choices2"])).unwrap();
        let before = table_data(&e, s);

        e.rename_labels("choices1", vec![(Atom::from("a"), Atom::from("y"))]).unwrap();
        e.rename_labels("choices1", vec![(Atom::from("y"), Atom::from("a"))]).unwrap();

        let after = table_data(&e, s);
        assert_eq!(after[..before.len()], before[..]);
        // The intermediate tuples remain, empty
        assert_eq!(&after[before.len()..], &data(&[(4, "(y, c)", &[])])[..]);

        // Ids keep increasing and are never handed out twice
        let ids: Vec<RowId> = after.iter().map(|(id, _, _)| *id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_swap_labels_in_one_rename() {
        let mut e = engine(choice_source());
        e.insert_row(full_row("x", &["a"], &[])).unwrap();
        e.insert_row(full_row("y", &["b", "a"], &[])).unwrap();
        let s = e.create_summary(GroupingSpec::new(["choices1"])).unwrap();

        e.apply(SourceAction::rename_labels("choices1", [("a", "b"), ("b", "a")]))
            .unwrap();

        assert_eq!(e.source().get_value(1, "choices1").unwrap(), &Value::labels(["b"]));
        assert_eq!(e.source().get_value(2, "choices1").unwrap(), &Value::labels(["a", "b"]));
        assert_eq!(table_data(&e, s), data(&[(1, "(a)", &[2]), (2, "(b)", &[1, 2])]));
    }

    #[test]
    fn test_rename_scalar_labels() {
        let mut e = engine(choice_source());
        e.insert_row(full_row("foo", &[], &[])).unwrap();
        e.insert_row(full_row("bar", &[], &[])).unwrap();
        let s = e.create_summary(GroupingSpec::new(["other"])).unwrap();

        e.apply(SourceAction::rename_label("other", "foo", "bar")).unwrap();
        assert_eq!(table_data(&e, s), data(&[(1, "(foo)", &[]), (2, "(bar)", &[1, 2])]));
    }

    #[test]
    fn test_change_choice_to_choice_list() {
        let schema = Schema::new(vec![ColumnDecl::scalar("other"), ColumnDecl::scalar("choices1")]);
        let mut e = engine(SourceTable::new("Source".to_string(), schema));
        let rows = [(21, "a", "foo"), (22, "b", "bar")].map(|(id, choice, other)| {
            let values = HashMap::from([
                ("choices1".to_string(), Value::scalar(choice)),
                ("other".to_string(), Value::scalar(other)),
            ]);
            SourceAction::insert_with_id(id, values)
        });
        e.apply_all(rows).unwrap();

        let s = e.create_summary(GroupingSpec::new(["choices1"])).unwrap();
        let by_other = e.create_summary(GroupingSpec::new(["other"])).unwrap();
        let expected = data(&[(1, "(a)", &[21]), (2, "(b)", &[22])]);
        assert_eq!(table_data(&e, s), expected);
        assert!(e.summary(s).unwrap().is_simple());

        let recreated = e.change_column_kind("choices1", ColumnKind::MultiValued).unwrap();
        assert_eq!(recreated, vec![s]);
        assert_eq!(e.source().get_value(21, "choices1").unwrap(), &Value::labels(["a"]));

        let summary = e.summary(s).unwrap();
        assert!(!summary.is_simple());
        assert_eq!(summary.name(), "Summary_Source");
        assert_eq!(summary.key().roles()[0], ColumnKind::MultiValued);
        assert_eq!(summary.key().columns()[0].kind, ColumnKind::Scalar);
        assert_eq!(table_data(&e, s), expected);
        assert_eq!(table_data(&e, by_other).len(), 2);

        // Values are now label sets; scalars are rejected
        let err = e
            .update_row(21, HashMap::from([("choices1".to_string(), Value::scalar("c"))]))
            .unwrap_err();
        assert!(matches!(err, SummaryError::TypeMismatch { .. }));
    }

    #[test]
    fn test_change_kind_that_cannot_convert_rolls_back() {
        let mut e = engine(choice_source());
        e.insert_row(full_row("x", &["a", "b"], &[])).unwrap();
        let s = e.create_summary(GroupingSpec::new(["choices1"])).unwrap();

        assert!(e.change_column_kind("choices1", ColumnKind::Scalar).is_err());
        assert_eq!(e.source().schema().get_column_kind("choices1"), Some(ColumnKind::MultiValued));
        assert_eq!(table_data(&e, s), data(&[(1, "(a)", &[1]), (2, "(b)", &[1])]));
    }

    #[test]
    fn test_total_summary() {
        let mut e = engine(choice_source());
        let s = e.create_summary(GroupingSpec::new(Vec::<String>::new())).unwrap();
        assert!(e.summary(s).unwrap().is_simple());
        assert!(e.summary(s).unwrap().is_empty());

        e.insert_row(full_row("x", &[], &[])).unwrap();
        e.insert_row(full_row("y", &["a"], &["c"])).unwrap();
        e.update_row(1, HashMap::from([("other".to_string(), Value::scalar("z"))]))
            .unwrap();
        assert_eq!(table_data(&e, s), data(&[(1, "()", &[1, 2])]));

        e.delete_row(1).unwrap();
        assert_eq!(table_data(&e, s), data(&[(1, "()", &[2])]));
    }

    #[test]
    fn test_empty_label_set_joins_nothing() {
        let mut e = engine(choice_source());
        let s = e.create_summary(GroupingSpec::new(["choices1", "choices2"])).unwrap();
        e.insert_row(full_row("x", &["a", "b"], &[])).unwrap();
        assert!(e.summary(s).unwrap().is_empty());

        let report = e
            .update_row(1, HashMap::from([("choices2".to_string(), Value::labels(["c", "d", "e"]))]))
            .unwrap();
        // 2 x 3 combinations, first column outermost
        assert_eq!(report.created(s), &[1, 2, 3, 4, 5, 6]);
        let tuples: Vec<String> = table_data(&e, s).into_iter().map(|(_, t, _)| t).collect();
        assert_eq!(
            tuples,
            vec!["(a, c)", "(a, d)", "(a, e)", "(b, c)", "(b, d)", "(b, e)"]
        );
    }

    #[test]
    fn test_new_tuples_follow_source_row_order() {
        let mut e = engine(choice_source());
        e.insert_row(full_row("x", &["a"], &["c"])).unwrap();
        e.insert_row(full_row("y", &["b"], &["c"])).unwrap();
        let s = e.create_summary(GroupingSpec::new(["choices1", "choices2"])).unwrap();

        // Both rows gain new combinations in the same rename
        e.apply(SourceAction::rename_label("choices2", "c", "z")).unwrap();
        assert_eq!(
            table_data(&e, s),
            data(&[
                (1, "(a, c)", &[]),
                (2, "(b, c)", &[]),
                (3, "(a, z)", &[1]),
                (4, "(b, z)", &[2]),
            ])
        );
    }

    #[test]
    fn test_snapshot_reflects_rows() {
        let mut e = engine(choice_source());
        let s = e.create_summary(GroupingSpec::new(["other", "choices1"])).unwrap();
        e.insert_row(full_row("foo", &["a", "b"], &[])).unwrap();

        let snapshot = e.summary(s).unwrap().snapshot();
        assert!(!snapshot.simple);
        let names: Vec<&str> = snapshot.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["other", "choices1", "group", "count"]);
        assert_eq!(snapshot.rows[1].grouping, KeyTuple::from_iter(["foo", "b"]));
        assert_eq!(snapshot.rows[1].group, vec![1]);

        // Grouping columns hold one atom per row, even for a label-set source
        let grouping = &snapshot.columns[..2];
        assert_eq!(grouping[1].source_column.as_deref(), Some("choices1"));
        for record in &snapshot.rows {
            for (column, atom) in grouping.iter().zip(record.grouping.components()) {
                Value::Scalar(atom.clone()).check_kind(&column.name, column.kind).unwrap();
            }
        }
    }
}
