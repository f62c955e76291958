//! Resubmission of unresolved records
//!
//! A finished job marks every record it could not score as unresolved, so a
//! follow-up job only needs those records. These helpers pick the records to
//! retry and fold the retry's outcomes back into the earlier results.

use crate::types::{Outcome, Record, UnresolvedCause};
use std::collections::HashMap;

/// Records whose previous outcome is missing or unresolved, in input order
pub fn pending_records(records: &[Record], previous: &[Outcome]) -> Vec<Record> {
    let resolved: HashMap<&str, bool> = previous
        .iter()
        .map(|o| (o.id.as_str(), o.is_resolved()))
        .collect();

    records
        .iter()
        .filter(|r| !resolved.get(r.id.as_str()).copied().unwrap_or(false))
        .cloned()
        .collect()
}

/// Merge a retry run into a previous run
///
/// Returns one outcome per record, in input order. A resolved retry outcome
/// replaces the previous one; otherwise the previous outcome is kept. Records
/// neither run reported come back as unresolved.
pub fn merge_outcomes(records: &[Record], previous: &[Outcome], retry: &[Outcome]) -> Vec<Outcome> {
    let previous = index_by_id(previous);
    let retry = index_by_id(retry);

    records
        .iter()
        .map(|record| {
            let id = record.id.as_str();
            match (previous.get(id), retry.get(id)) {
                (_, Some(new)) if new.is_resolved() => (*new).clone(),
                (Some(old), _) => (*old).clone(),
                (None, Some(new)) => (*new).clone(),
                (None, None) => Outcome::unresolved(id, UnresolvedCause::NotReported),
            }
        })
        .collect()
}

/// First outcome per id
fn index_by_id(outcomes: &[Outcome]) -> HashMap<&str, &Outcome> {
    let mut index = HashMap::with_capacity(outcomes.len());
    for outcome in outcomes {
        index.entry(outcome.id.as_str()).or_insert(outcome);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Label;

    fn records() -> Vec<Record> {
        ["P1", "P2", "P3", "P4"]
            .iter()
            .map(|id| Record::new(*id, "FLPLIGRVLSGIL"))
            .collect()
    }

    #[test]
    fn test_pending_records_selects_unresolved_and_missing() {
        let previous = vec![
            Outcome::resolved("P1", Label::Positive, 0.8),
            Outcome::unresolved("P2", UnresolvedCause::IsolationFloor),
            Outcome::resolved("P4", Label::Negative, 0.1),
        ];

        let pending = pending_records(&records(), &previous);
        let ids: Vec<_> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["P2", "P3"]);
    }

    #[test]
    fn test_merge_prefers_resolved_retry() {
        let previous = vec![
            Outcome::resolved("P1", Label::Positive, 0.8),
            Outcome::unresolved("P2", UnresolvedCause::IsolationFloor),
            Outcome::unresolved("P3", UnresolvedCause::NotReported),
            Outcome::resolved("P4", Label::Negative, 0.1),
        ];
        let retry = vec![
            Outcome::unresolved("P3", UnresolvedCause::IsolationFloor),
            Outcome::resolved("P2", Label::Negative, 0.2),
        ];

        let merged = merge_outcomes(&records(), &previous, &retry);

        assert_eq!(
            merged,
            vec![
                Outcome::resolved("P1", Label::Positive, 0.8),
                Outcome::resolved("P2", Label::Negative, 0.2),
                Outcome::unresolved("P3", UnresolvedCause::NotReported),
                Outcome::resolved("P4", Label::Negative, 0.1),
            ]
        );
    }

    #[test]
    fn test_merge_fills_unreported_records() {
        let merged = merge_outcomes(&records(), &[], &[]);
        assert_eq!(merged.len(), 4);
        assert!(merged.iter().all(|o| !o.is_resolved()));
    }

    #[test]
    fn test_resolved_retry_does_not_override_with_unresolved() {
        let previous = vec![Outcome::resolved("P1", Label::Positive, 0.8)];
        let retry = vec![Outcome::unresolved("P1", UnresolvedCause::IsolationFloor)];
        let merged = merge_outcomes(&records()[..1], &previous, &retry);
        assert_eq!(merged[0], Outcome::resolved("P1", Label::Positive, 0.8));
    }
}
