//! Rewriting of tag operations before they reach the connector.
//!
//! Two rewrites exist:
//!
//! - [`optimize_writes`] removes writes whose bits are fully overwritten by a
//!   later write of the same operation, and reports success for them.
//! - [`split_on_epc_change`] cuts an operation after every write that changes
//!   the EPC, for connectors that lose the tag once its EPC changes.
//!
//! [`merge_results`] folds the results of split parts back into one tag.

use readerlink_core::{Filter, OperationResult, Tag, TagOperation};
use std::collections::BTreeMap;

/// Remove writes made redundant by a later write.
///
/// Scanning backwards, each write that is still sent looks at the writes
/// directly before it. A preceding write whose field it contains is dropped,
/// writes already dropped are stepped over, and the scan for that position
/// stops at the first read, kill, lock or password operation and at the
/// first write it does not cover. The optimization is therefore block-wise
/// and not globally minimal.
///
/// Returns the operation to send and a success result for every dropped id.
///
/// # Examples
///
/// ```
/// use readerlink_controller::optimizer::optimize_writes;
/// use readerlink_core::{Field, MemoryBank, Operation, TagOperation};
///
/// let a = Operation::write("a", Field::new(MemoryBank::User, 16, 16).unwrap(), vec![0, 1]).unwrap();
/// let b = Operation::write("b", Field::new(MemoryBank::User, 0, 64).unwrap(), vec![0; 8]).unwrap();
///
/// let (optimized, skipped) = optimize_writes(&TagOperation::new(vec![], vec![a, b]));
///
/// assert_eq!(optimized.operation_ids().collect::<Vec<_>>(), vec!["b"]);
/// assert!(skipped["a"].is_success());
/// ```
pub fn optimize_writes(operation: &TagOperation) -> (TagOperation, BTreeMap<String, OperationResult>) {
    let operations = &operation.operations;
    let mut skipped = vec![false; operations.len()];

    for i in (0..operations.len()).rev() {
        if skipped[i] {
            continue;
        }
        let Some(covering) = operations[i].written_field() else {
            continue;
        };

        for j in (0..i).rev() {
            let Some(field) = operations[j].written_field() else {
                break;
            };
            if skipped[j] {
                continue;
            }
            if !covering.contains(field) {
                break;
            }
            skipped[j] = true;
        }
    }

    let mut kept = Vec::with_capacity(operations.len());
    let mut synthetic = BTreeMap::new();
    for (op, skip) in operations.iter().zip(skipped) {
        if skip {
            synthetic.insert(op.id().to_string(), OperationResult::success(op));
        } else {
            kept.push(op.clone());
        }
    }

    (TagOperation::new(operation.filter.clone(), kept), synthetic)
}

/// Split an operation after every write that changes the EPC.
///
/// Each part carries the filter identifying the tag at the point it starts:
/// the original filter for the first part, an exact match on the predicted
/// EPC for the following ones. An operation without EPC changes comes back
/// as a single part.
///
/// # Examples
///
/// ```
/// use readerlink_controller::optimizer::split_on_epc_change;
/// use readerlink_core::{Field, Filter, MemoryBank, Operation, TagOperation};
///
/// let filter = vec![Filter::equals(MemoryBank::Epc, 32, vec![0x11, 0x11]).unwrap()];
/// let epc = Field::new(MemoryBank::Epc, 32, 16).unwrap();
/// let tid = Field::new(MemoryBank::Tid, 0, 32).unwrap();
///
/// let operation = TagOperation::new(filter, vec![
///     Operation::write("epc", epc, vec![0x22, 0x22]).unwrap(),
///     Operation::read("tid", tid),
/// ]);
///
/// let parts = split_on_epc_change(&operation);
/// assert_eq!(parts.len(), 2);
/// assert_eq!(parts[1].filter[0].data, vec![0x22, 0x22]);
/// ```
pub fn split_on_epc_change(operation: &TagOperation) -> Vec<TagOperation> {
    let mut tag = Tag::from_filter(&operation.filter);
    let mut filter = operation.filter.clone();
    let mut parts = Vec::new();
    let mut current = Vec::new();

    for op in &operation.operations {
        current.push(op.clone());
        if tag.apply(op) {
            parts.push(TagOperation::new(
                std::mem::take(&mut filter),
                std::mem::take(&mut current),
            ));
            filter = Filter::rebase_on_epc(&operation.filter, &tag);
        }
    }

    if !current.is_empty() || parts.is_empty() {
        parts.push(TagOperation::new(filter, current));
    }
    parts
}

/// Fold the results of split parts into one tag.
///
/// The identity (EPC, PC, TID) comes from the last part that resolved one,
/// so it reflects every successful write. Results of all parts are merged.
pub fn merge_results(parts: Vec<Tag>) -> Tag {
    let mut parts = parts.into_iter();
    let Some(mut merged) = parts.next() else {
        return Tag::completed_empty();
    };

    for part in parts {
        if part.epc.is_some() {
            merged.epc = part.epc;
            merged.pc = part.pc;
            merged.antenna = part.antenna;
            merged.rssi = part.rssi;
        }
        if part.tid.is_some() {
            merged.tid = part.tid;
        }
        merged.results.extend(part.results);
    }
    merged.completed = true;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use readerlink_core::{Field, MemoryBank, Operation, ResultState};
    use rstest::rstest;

    fn write(id: &str, bank: MemoryBank, offset: u16, length: u16) -> Operation {
        let data = vec![0xAA; usize::from(length).div_ceil(8)];
        Operation::write(id, Field::new(bank, offset, length).unwrap(), data).unwrap()
    }

    fn read(id: &str) -> Operation {
        Operation::read(id, Field::new(MemoryBank::Tid, 0, 32).unwrap())
    }

    fn ids(operation: &TagOperation) -> Vec<&str> {
        operation.operation_ids().collect()
    }

    #[test]
    fn test_later_covering_write_drops_earlier() {
        let operation = TagOperation::new(
            vec![],
            vec![
                write("a", MemoryBank::User, 0, 16),
                write("b", MemoryBank::User, 0, 32),
            ],
        );

        let (optimized, synthetic) = optimize_writes(&operation);
        assert_eq!(ids(&optimized), vec!["b"]);
        assert_eq!(
            synthetic["a"],
            OperationResult::Write {
                state: ResultState::Success,
                words_written: 1
            }
        );
    }

    #[rstest]
    #[case::different_bank(vec![write("a", MemoryBank::User, 0, 16), write("b", MemoryBank::Epc, 0, 32)], vec!["a", "b"])]
    #[case::partial_overlap(vec![write("a", MemoryBank::User, 16, 32), write("b", MemoryBank::User, 0, 32)], vec!["a", "b"])]
    #[case::earlier_is_larger(vec![write("a", MemoryBank::User, 0, 64), write("b", MemoryBank::User, 0, 16)], vec!["a", "b"])]
    #[case::read_in_between(vec![write("a", MemoryBank::User, 0, 16), read("r"), write("b", MemoryBank::User, 0, 32)], vec!["a", "r", "b"])]
    #[case::chain(vec![write("a", MemoryBank::User, 0, 16), write("b", MemoryBank::User, 16, 16), write("c", MemoryBank::User, 0, 32)], vec!["c"])]
    #[case::stops_at_first_uncovered(vec![write("a", MemoryBank::User, 0, 16), write("x", MemoryBank::User, 64, 16), write("c", MemoryBank::User, 0, 32)], vec!["a", "x", "c"])]
    #[case::steps_over_skipped(vec![write("a", MemoryBank::User, 0, 16), write("b", MemoryBank::User, 0, 16), write("c", MemoryBank::User, 0, 16)], vec!["c"])]
    fn test_optimization_cases(#[case] operations: Vec<Operation>, #[case] expected: Vec<&str>) {
        let (optimized, synthetic) = optimize_writes(&TagOperation::new(vec![], operations.clone()));
        assert_eq!(ids(&optimized), expected);
        assert_eq!(synthetic.len() + expected.len(), operations.len());
    }

    #[test]
    fn test_filter_is_kept() {
        let filter = vec![Filter::equals(MemoryBank::Epc, 32, vec![0x01]).unwrap()];
        let (optimized, _) = optimize_writes(&TagOperation::new(filter.clone(), vec![read("r")]));
        assert_eq!(optimized.filter, filter);
    }

    #[test]
    fn test_split_without_epc_change() {
        let operation = TagOperation::new(
            vec![],
            vec![write("u", MemoryBank::User, 0, 16), read("r")],
        );
        assert_eq!(split_on_epc_change(&operation), vec![operation]);
    }

    #[test]
    fn test_split_empty_operation() {
        let operation = TagOperation::default();
        assert_eq!(split_on_epc_change(&operation), vec![operation]);
    }

    #[test]
    fn test_split_after_each_epc_change() {
        let original = vec![
            Filter::equals(MemoryBank::Epc, 32, vec![0x11, 0x11]).unwrap(),
            Filter::equals(MemoryBank::Tid, 0, vec![0xE2]).unwrap(),
        ];
        let epc = Field::new(MemoryBank::Epc, 32, 16).unwrap();
        let operation = TagOperation::new(
            original.clone(),
            vec![
                Operation::write("w1", epc, vec![0x22, 0x22]).unwrap(),
                read("r1"),
                Operation::write("w2", epc, vec![0x33, 0x33]).unwrap(),
            ],
        );

        let parts = split_on_epc_change(&operation);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].filter, original);
        assert_eq!(ids(&parts[0]), vec!["w1"]);
        assert_eq!(ids(&parts[1]), vec!["r1", "w2"]);

        // Non-EPC filters survive, the EPC filter follows the write
        assert_eq!(parts[1].filter[0].bank, MemoryBank::Tid);
        assert_eq!(parts[1].filter[1].data, vec![0x22, 0x22]);
    }

    #[test]
    fn test_split_ignores_rewrite_with_same_epc() {
        let epc = Field::new(MemoryBank::Epc, 32, 16).unwrap();
        let operation = TagOperation::new(
            vec![Filter::equals(MemoryBank::Epc, 32, vec![0x11, 0x11]).unwrap()],
            vec![Operation::write("same", epc, vec![0x11, 0x11]).unwrap()],
        );
        assert_eq!(split_on_epc_change(&operation).len(), 1);
    }

    #[test]
    fn test_merge_results() {
        let first = Tag::new(vec![0x11, 0x11])
            .with_tid(vec![0xE2])
            .with_result("w1", OperationResult::Kill { state: ResultState::Success });
        let second = Tag::new(vec![0x22, 0x22])
            .with_result("r1", OperationResult::Kill { state: ResultState::Success });

        let merged = merge_results(vec![first, second]);
        assert_eq!(merged.epc, Some(vec![0x22, 0x22]));
        assert_eq!(merged.tid, Some(vec![0xE2]));
        assert_eq!(merged.results.len(), 2);
        assert!(merged.completed);
    }

    #[test]
    fn test_merge_keeps_identity_over_empty_part() {
        let first = Tag::new(vec![0x11, 0x11]);
        let merged = merge_results(vec![first, Tag::completed_empty()]);
        assert_eq!(merged.epc, Some(vec![0x11, 0x11]));
    }

    #[test]
    fn test_merge_nothing() {
        let merged = merge_results(Vec::new());
        assert!(merged.completed);
        assert!(merged.epc.is_none());
    }

    fn arb_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            (0u8..4).prop_map(|i| read(&format!("r{}", i))),
            (0u16..4, 1u16..4).prop_map(|(offset, words)| {
                write("w", MemoryBank::User, offset * 16, words * 16)
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_optimization_preserves_ids(ops in prop::collection::vec(arb_operation(), 0..12)) {
            let operations: Vec<Operation> = ops
                .into_iter()
                .enumerate()
                .map(|(i, op)| match op {
                    Operation::Write { field, data, .. } => Operation::Write { id: format!("w{}", i), field, data },
                    Operation::Read { field, .. } => Operation::Read { id: format!("r{}", i), field },
                    other => other,
                })
                .collect();
            let operation = TagOperation::new(vec![], operations.clone());
            let (optimized, synthetic) = optimize_writes(&operation);

            // Every id is either sent or answered synthetically, never both
            prop_assert_eq!(optimized.operations.len() + synthetic.len(), operations.len());
            for id in optimized.operation_ids() {
                prop_assert!(!synthetic.contains_key(id));
            }

            // Only writes are dropped and the last write always goes out
            for id in synthetic.keys() {
                prop_assert!(id.starts_with('w'));
            }
            if let Some(last) = operations.iter().rev().find(|op| op.is_write()) {
                prop_assert!(optimized.operation_ids().any(|id| id == last.id()));
            }

            // Order of the remaining operations is preserved
            let remaining: Vec<&str> = operations
                .iter()
                .map(Operation::id)
                .filter(|id| !synthetic.contains_key(*id))
                .collect();
            prop_assert_eq!(optimized.operation_ids().collect::<Vec<_>>(), remaining);
        }
    }
}
