// State definitions for the batch runtime
//
// Execution lifecycle statuses plus the ephemeral item/chunk states that drive
// the chunk processing loop.

pub mod states;

pub use states::{BatchStatus, ChunkState, FailureDisposition, ItemState};
