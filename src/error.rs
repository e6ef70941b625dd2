// Copyright 2024 Oxide Computer Company

use thiserror::Error;

/// Everything a match unit can refuse to do. Mutating operations return one
/// of these and leave the unit exactly as it was before the call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    #[error("table full")]
    TableFull,

    #[error("invalid entry handle")]
    InvalidHandle,

    #[error("expired entry handle")]
    ExpiredHandle,

    #[error("bad match key")]
    BadMatchKey,

    #[error("handle pool failure")]
    Allocator,
}
