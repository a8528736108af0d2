//! Property-based tests for the pure decision logic: exit-status matching,
//! status consolidation, skip/retry precedence and property substitution.

mod common;

use common::strategies::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

use tasker_batch::artifacts::ArtifactError;
use tasker_batch::definition::{resolve_partition_plan_properties, ExceptionClassFilter};
use tasker_batch::runtime::{consolidate_status, matches_exit_status, SkipRetryPolicy};
use tasker_batch::state_machine::FailureDisposition;
use tasker_batch::BatchStatus;

proptest! {
    #[test]
    fn star_matches_every_exit_status(exit_status in exit_status_strategy()) {
        prop_assert!(matches_exit_status("*", &exit_status));
    }

    #[test]
    fn literal_pattern_matches_only_itself(
        pattern in exit_status_strategy(),
        exit_status in exit_status_strategy(),
    ) {
        prop_assert_eq!(matches_exit_status(&pattern, &exit_status), pattern == exit_status);
    }

    #[test]
    fn masked_pattern_matches_its_source((exit_status, mask) in masked_exit_status_strategy()) {
        let pattern: String = exit_status
            .chars()
            .zip(mask)
            .map(|(c, masked)| if masked { '?' } else { c })
            .collect();
        prop_assert!(matches_exit_status(&pattern, &exit_status));
        let extended = format!("{exit_status}X");
        prop_assert!(!matches_exit_status(&pattern, &extended));
    }

    #[test]
    fn trailing_star_matches_any_suffix(
        prefix in exit_status_strategy(),
        suffix in "[A-Z0-9_]{0,8}",
    ) {
        let pattern = format!("{prefix}*");
        let exit_status = format!("{prefix}{suffix}");
        prop_assert!(matches_exit_status(&pattern, &exit_status));
    }

    #[test]
    fn consolidation_keeps_the_most_severe_outcome(
        statuses in prop::collection::vec(outcome_strategy(), 0..12),
    ) {
        let consolidated = consolidate_status(statuses.iter().copied());
        let worst = statuses.iter().map(|s| s.severity()).max().unwrap_or(0);
        prop_assert_eq!(consolidated.severity(), worst);
        if statuses.contains(&BatchStatus::Failed) {
            prop_assert_eq!(consolidated, BatchStatus::Failed);
        }
        if statuses.iter().all(|s| *s == BatchStatus::Completed) {
            prop_assert_eq!(consolidated, BatchStatus::Completed);
        }
    }

    #[test]
    fn severity_never_decreases_when_statuses_are_added(
        statuses in prop::collection::vec(batch_status_strategy(), 0..8),
        extra in batch_status_strategy(),
    ) {
        let before = consolidate_status(statuses.iter().copied());
        let after = consolidate_status(statuses.iter().copied().chain([extra]));
        prop_assert!(after.severity() >= before.severity());
    }

    #[test]
    fn skip_wins_inside_a_retry_and_retry_wins_outside(
        chain in kind_chain_strategy(),
        skip_count in 0u64..5,
        retry_count in 0u64..5,
    ) {
        let error = ArtifactError::new("leaf", "failed").with_ancestors(chain.clone());
        let both = ExceptionClassFilter::including([chain[0].clone()]);
        let policy = SkipRetryPolicy {
            skippable: both.clone(),
            retryable: both,
            ..SkipRetryPolicy::default()
        };
        prop_assert_eq!(
            policy.decide(&error, true, skip_count, retry_count),
            FailureDisposition::Skip
        );
        prop_assert_eq!(
            policy.decide(&error, false, skip_count, retry_count),
            FailureDisposition::Retry
        );
    }

    #[test]
    fn exhausted_limits_make_failures_fatal(
        chain in kind_chain_strategy(),
        limit in 0u64..4,
        in_retry in any::<bool>(),
    ) {
        let error = ArtifactError::new("leaf", "failed").with_ancestors(chain);
        let policy = SkipRetryPolicy {
            skippable: ExceptionClassFilter::including(["leaf"]),
            retryable: ExceptionClassFilter::including(["leaf"]),
            skip_limit: Some(limit),
            retry_limit: Some(limit),
            ..SkipRetryPolicy::default()
        };
        prop_assert_eq!(
            policy.decide(&error, in_retry, limit, limit),
            FailureDisposition::Fatal
        );
    }

    #[test]
    fn empty_include_list_matches_nothing(
        chain in kind_chain_strategy(),
        excluded in prop::collection::vec("[a-z]{3,8}", 0..3),
    ) {
        let filter = ExceptionClassFilter::including(Vec::<String>::new()).excluding(excluded);
        let error = ArtifactError::new("leaf", "failed").with_ancestors(chain);
        prop_assert!(!filter.matches(&error));
    }

    #[test]
    fn text_without_references_is_left_alone(
        text in "[a-zA-Z0-9 _.:/-]{0,40}",
        values in prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..4),
    ) {
        prop_assert_eq!(resolve_partition_plan_properties(&text, &values), text);
    }

    #[test]
    fn references_resolve_to_plan_values(
        name in "[a-z]{1,6}",
        value in "[a-z0-9]{0,6}",
        prefix in "[a-z/]{0,6}",
    ) {
        let mut plan = BTreeMap::new();
        plan.insert(name.clone(), value.clone());
        let text = format!("{prefix}#{{partitionPlan['{name}']}}.csv");
        prop_assert_eq!(
            resolve_partition_plan_properties(&text, &plan),
            format!("{prefix}{value}.csv")
        );
    }
}
