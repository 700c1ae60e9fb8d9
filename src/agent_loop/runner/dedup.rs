//! Repeated-action detection within one user turn.

use std::collections::HashSet;

use crate::types::ActionCall;

#[derive(Debug, Default)]
pub(super) struct Partition {
    pub(super) fresh: Vec<ActionCall>,
    pub(super) repeated: Vec<ActionCall>,
}

/// Split `calls` into those not seen before and repeats.
///
/// Equality is name plus canonical arguments, so key order does not matter.
/// A call repeated inside the same batch counts as a repeat of its first
/// occurrence.
pub(super) fn partition<'a>(
    earlier: impl IntoIterator<Item = &'a ActionCall>,
    calls: Vec<ActionCall>,
) -> Partition {
    let mut seen: HashSet<String> = earlier.into_iter().map(ActionCall::fingerprint).collect();
    let mut out = Partition::default();
    for call in calls {
        if seen.insert(call.fingerprint()) {
            out.fresh.push(call);
        } else {
            out.repeated.push(call);
        }
    }
    out
}
