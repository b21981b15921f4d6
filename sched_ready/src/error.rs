use thiserror::Error;

use crate::BarrierKey;

/// An error from misuse of a [`ReadinessBarrier`][crate::ReadinessBarrier]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    /// A registration was released more times than the count it was
    /// registered with
    #[error("registration {key} released more than the {registered} time(s) it was registered for")]
    OverRelease {
        /// The key of the over-released registration
        key: BarrierKey,
        /// The count the registration was made with
        registered: u32,
    },
}
