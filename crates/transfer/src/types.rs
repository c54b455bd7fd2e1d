use crate::range::IndexRange;

/// Bytes read from one planned range of the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUnit {
    /// Disk range the data was read from.
    pub range: IndexRange,
    /// Exactly `range.length()` bytes.
    pub data: Vec<u8>,
}

impl DataUnit {
    /// Identifier used for the unit's work item and in logs.
    pub fn id(&self) -> String {
        self.range.to_string()
    }

    /// Number of payload bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns `true` if the unit carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
