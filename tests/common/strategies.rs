use proptest::prelude::*;
use tasker_batch::BatchStatus;

/// Exit statuses as artifacts tend to produce them
pub fn exit_status_strategy() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9_]{0,15}"
}

pub fn batch_status_strategy() -> impl Strategy<Value = BatchStatus> {
    prop_oneof![
        Just(BatchStatus::Starting),
        Just(BatchStatus::Started),
        Just(BatchStatus::Stopping),
        Just(BatchStatus::Stopped),
        Just(BatchStatus::Failed),
        Just(BatchStatus::Completed),
        Just(BatchStatus::Abandoned),
    ]
}

/// Terminal outcomes a partition or split flow can report
pub fn outcome_strategy() -> impl Strategy<Value = BatchStatus> {
    prop_oneof![
        Just(BatchStatus::Completed),
        Just(BatchStatus::Stopped),
        Just(BatchStatus::Failed),
    ]
}

/// An exit status plus a mask choosing which characters become `?`
pub fn masked_exit_status_strategy() -> impl Strategy<Value = (String, Vec<bool>)> {
    exit_status_strategy().prop_flat_map(|status| {
        let len = status.chars().count();
        (Just(status), prop::collection::vec(any::<bool>(), len))
    })
}

/// Error kind hierarchies, nearest ancestor first
pub fn kind_chain_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{3,8}", 1..5)
}
