use std::collections::BTreeMap;

use crate::row::LedgerRow;

/// Current projection of a ledger: logical key to the last row carrying it.
pub type LatestState<'a, R> = BTreeMap<String, &'a R>;

/// Reduces an ordered row stream to its latest state per `key_field`.
///
/// Rows with an empty or missing key are skipped. Later rows replace earlier
/// ones, so the surviving row for each key is the one with the highest
/// file position.
pub fn materialize_latest<'a, R: LedgerRow>(rows: &'a [R], key_field: &str) -> LatestState<'a, R> {
    let mut latest = BTreeMap::new();
    for row in rows {
        let key = row.value(key_field);
        if key.is_empty() {
            continue;
        }
        latest.insert(key.to_string(), row);
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::EventRow;
    use proptest::prelude::*;

    fn run_row(row_number: usize, run_id: &str, status: &str) -> EventRow {
        EventRow::from_pairs(row_number, [("run_id", run_id), ("status", status)])
    }

    #[test]
    fn later_row_wins() {
        let rows = vec![run_row(1, "R9", "active"), run_row(2, "R9", "resolved")];
        let latest = materialize_latest(&rows, "run_id");

        assert_eq!(latest.len(), 1);
        assert_eq!(latest.get("R9").map(|row| row.value("status")), Some("resolved"));
    }

    #[test]
    fn empty_keys_are_ignored() {
        let rows = vec![run_row(1, "", "active"), run_row(2, "   ", "active")];
        assert!(materialize_latest(&rows, "run_id").is_empty());
    }

    #[test]
    fn keys_are_trimmed_before_grouping() {
        let rows = vec![run_row(1, "R1 ", "active"), run_row(2, " R1", "blocked")];
        let latest = materialize_latest(&rows, "run_id");
        assert_eq!(latest.get("R1").map(|row| row.row_number()), Some(2));
    }

    proptest! {
        #[test]
        fn lookup_returns_highest_row_number_for_key(keys in proptest::collection::vec(0_u8..6, 0..40)) {
            let rows: Vec<EventRow> = keys
                .iter()
                .enumerate()
                .map(|(index, key)| run_row(index + 1, &format!("R{key}"), "active"))
                .collect();
            let latest = materialize_latest(&rows, "run_id");

            for row in &rows {
                let key = row.value("run_id");
                let expected = rows
                    .iter()
                    .filter(|candidate| candidate.value("run_id") == key)
                    .map(LedgerRow::row_number)
                    .max();
                prop_assert_eq!(latest.get(key).map(|found| found.row_number()), expected);
            }
        }
    }
}
