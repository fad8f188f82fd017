//! Delta computation against the warehouse's known identifiers

use crate::record::{KnownIds, RecordBatch};

/// Whether a unit of work is filtered against the warehouse before loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    /// Load the whole batch; used when the warehouse is known to be empty
    Disabled,
    /// Drop records whose identifier the warehouse already holds
    Enabled,
}

impl DeltaMode {
    pub fn is_enabled(self) -> bool {
        matches!(self, DeltaMode::Enabled)
    }
}

/// Keep the records of `batch` whose identifier is not in `known`, in order
pub fn filter(batch: RecordBatch, known: &KnownIds) -> RecordBatch {
    if known.is_empty() {
        return batch;
    }

    let source = batch.source().to_string();
    let fresh = batch
        .into_records()
        .into_iter()
        .filter(|record| !known.contains(record.id()))
        .collect();

    RecordBatch::new(source, fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(id: &str) -> Record {
        Record::from_document(json!({ "cve": { "CVE_data_meta": { "ID": id } } })).unwrap()
    }

    fn batch(ids: &[&str]) -> RecordBatch {
        RecordBatch::new("nvdcve-1.1-recent.json.gz", ids.iter().map(|id| record(id)).collect())
    }

    fn known(ids: &[&str]) -> KnownIds {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_filter_drops_known_ids() {
        let filtered = filter(batch(&["CVE-2020-0001", "CVE-2023-9999"]), &known(&["CVE-2020-0001"]));

        assert_eq!(filtered.ids().collect::<Vec<_>>(), vec!["CVE-2023-9999"]);
        assert_eq!(filtered.source(), "nvdcve-1.1-recent.json.gz");
    }

    #[test]
    fn test_filter_everything_known() {
        let filtered = filter(batch(&["CVE-2020-0001"]), &known(&["CVE-2020-0001", "CVE-2020-0002"]));
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_filter_keeps_duplicates_within_batch() {
        // The feed itself is authoritative about its contents; only the
        // warehouse snapshot removes records.
        let filtered = filter(batch(&["CVE-1", "CVE-2", "CVE-1"]), &known(&["CVE-2"]));
        assert_eq!(filtered.ids().collect::<Vec<_>>(), vec!["CVE-1", "CVE-1"]);
    }

    fn arb_ids() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("CVE-20[0-2][0-9]-[0-9]{1,3}", 0..40)
    }

    fn to_batch(ids: &[String]) -> RecordBatch {
        RecordBatch::new("prop", ids.iter().map(|id| record(id)).collect())
    }

    proptest! {
        #[test]
        fn prop_filter_is_exact_stable_subset(ids in arb_ids(), known_ids in arb_ids()) {
            let known: KnownIds = known_ids.into_iter().collect();
            let filtered = filter(to_batch(&ids), &known);

            let expected: Vec<&str> = ids
                .iter()
                .map(String::as_str)
                .filter(|id| !known.contains(*id))
                .collect();
            prop_assert_eq!(filtered.ids().collect::<Vec<_>>(), expected);
        }

        #[test]
        fn prop_filter_with_empty_set_is_identity(ids in arb_ids()) {
            let original = to_batch(&ids);
            prop_assert_eq!(filter(original.clone(), &KnownIds::new()), original);
        }

        #[test]
        fn prop_filter_is_idempotent(ids in arb_ids(), known_ids in arb_ids()) {
            let known: KnownIds = known_ids.into_iter().collect();
            let once = filter(to_batch(&ids), &known);
            let twice = filter(once.clone(), &known);
            prop_assert_eq!(twice, once);
        }
    }
}
