//! Usage counters and signed deltas.

use std::ops::{Add, AddAssign, Neg};

use serde::{Deserialize, Serialize};

/// Aggregate counters for one tree.
///
/// `directory_count` excludes the tree root itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub total_size: u64,
    pub file_count: u64,
    pub directory_count: u64,
}

impl Usage {
    /// Create new usage counters.
    pub fn new(total_size: u64, file_count: u64, directory_count: u64) -> Self {
        Self {
            total_size,
            file_count,
            directory_count,
        }
    }

    /// Apply a signed delta, clamping each counter at zero.
    pub fn apply(&mut self, delta: UsageDelta) {
        self.total_size = clamp_add(self.total_size, delta.total_size);
        self.file_count = clamp_add(self.file_count, delta.file_count);
        self.directory_count = clamp_add(self.directory_count, delta.directory_count);
    }
}

fn clamp_add(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

/// Signed adjustment to [`Usage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDelta {
    #[serde(default)]
    pub total_size: i64,
    #[serde(default)]
    pub file_count: i64,
    #[serde(default)]
    pub directory_count: i64,
}

impl UsageDelta {
    /// Delta of a size change only.
    pub fn size(delta: i64) -> Self {
        Self {
            total_size: delta,
            ..Default::default()
        }
    }

    /// Delta for a newly tracked file of `size` bytes.
    pub fn new_file(size: u64) -> Self {
        Self {
            total_size: size as i64,
            file_count: 1,
            directory_count: 0,
        }
    }

    /// Delta for a newly created directory.
    pub fn new_directory() -> Self {
        Self {
            directory_count: 1,
            ..Default::default()
        }
    }

    /// Returns true if applying this delta is a no-op.
    pub fn is_zero(&self) -> bool {
        self.total_size == 0 && self.file_count == 0 && self.directory_count == 0
    }
}

impl From<Usage> for UsageDelta {
    fn from(usage: Usage) -> Self {
        Self {
            total_size: usage.total_size as i64,
            file_count: usage.file_count as i64,
            directory_count: usage.directory_count as i64,
        }
    }
}

impl Add for UsageDelta {
    type Output = UsageDelta;

    fn add(self, rhs: UsageDelta) -> UsageDelta {
        UsageDelta {
            total_size: self.total_size + rhs.total_size,
            file_count: self.file_count + rhs.file_count,
            directory_count: self.directory_count + rhs.directory_count,
        }
    }
}

impl AddAssign for UsageDelta {
    fn add_assign(&mut self, rhs: UsageDelta) {
        *self = *self + rhs;
    }
}

impl Neg for UsageDelta {
    type Output = UsageDelta;

    fn neg(self) -> UsageDelta {
        UsageDelta {
            total_size: -self.total_size,
            file_count: -self.file_count,
            directory_count: -self.directory_count,
        }
    }
}
