//! Property-based tests for statement classification

#[cfg(test)]
mod tests {
    use crate::statement::StatementKind;
    use proptest::prelude::*;

    fn arb_table() -> impl Strategy<Value = String> {
        "t_[a-z0-9_]{0,12}"
    }

    fn arb_condition() -> impl Strategy<Value = String> {
        ("c_[a-z0-9_]{0,8}", 0i64..10_000).prop_map(|(column, value)| format!("{} = {}", column, value))
    }

    proptest! {
        /// UPDATE statements always keep their table and top-level condition
        #[test]
        fn prop_update_round_trips_table_and_condition(
            table in arb_table(),
            condition in arb_condition(),
            quoted in any::<bool>(),
        ) {
            let target = if quoted { format!("\"{}\"", table) } else { table.clone() };
            let sql = format!("UPDATE {} SET value = value + 1 WHERE {}", target, condition);
            let kind = StatementKind::parse(&sql);

            prop_assert_eq!(kind.table(), Some(table.as_str()));
            prop_assert_eq!(kind.where_clause(), Some(condition.as_str()));
            prop_assert!(kind.needs_snapshot());
        }

        /// DELETE statements without a condition target the whole table
        #[test]
        fn prop_delete_without_where_has_no_condition(table in arb_table()) {
            let kind = StatementKind::parse(&format!("DELETE FROM {};", table));
            prop_assert_eq!(kind.table(), Some(table.as_str()));
            prop_assert_eq!(kind.where_clause(), None);
        }

        /// INSERT statements never ask for a snapshot
        #[test]
        fn prop_insert_is_mutation_without_snapshot(table in arb_table()) {
            let kind = StatementKind::parse(&format!("INSERT INTO {} (a) VALUES (1)", table));
            prop_assert!(kind.is_mutation());
            prop_assert!(!kind.needs_snapshot());
        }
    }
}
