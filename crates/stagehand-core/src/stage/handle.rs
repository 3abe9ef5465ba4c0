use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Opaque identifier for a stage held by a [`super::StageRegistry`].
///
/// Zero is reserved as the invalid sentinel on the wire, so a handle can
/// never hold it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageHandle(NonZeroU64);

impl StageHandle {
    /// Interprets a raw wire value, returning `None` for the zero sentinel.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw wire value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
