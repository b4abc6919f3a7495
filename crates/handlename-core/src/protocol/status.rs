//! Status taxonomy carried in every response record.

use std::fmt;

use super::error::ProtocolError;

/// Outcome of a single handle-name resolution.
///
/// The discriminants are the wire values, so the order is part of the
/// protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HandleStatus {
    /// Name resolved, buffer valid up to the reported size.
    Success = 0,
    /// Target is the resolver's own process; not served.
    SameProcess = 1,
    /// Could not obtain a handle to the target process.
    OpenProcess = 2,
    /// Could not duplicate the target handle locally.
    Duplicate = 3,
    /// Could not determine the handle's object type.
    QueryType = 4,
    /// Handle is not of the supported type.
    InvalidType = 5,
    /// Name query failed, timed out, or returned an empty name.
    QueryName = 6,
}

impl HandleStatus {
    /// All statuses in wire order.
    pub const ALL: [Self; 7] = [
        Self::Success,
        Self::SameProcess,
        Self::OpenProcess,
        Self::Duplicate,
        Self::QueryType,
        Self::InvalidType,
        Self::QueryName,
    ];

    /// Wire value of this status.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns `true` for [`HandleStatus::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Stable lowercase label used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SameProcess => "same_process",
            Self::OpenProcess => "open_process",
            Self::Duplicate => "duplicate",
            Self::QueryType => "query_type",
            Self::InvalidType => "invalid_type",
            Self::QueryName => "query_name",
        }
    }
}

impl TryFrom<u32> for HandleStatus {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_u32() == value)
            .ok_or(ProtocolError::UnknownStatus(value))
    }
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values_are_stable() {
        let values: Vec<u32> = HandleStatus::ALL.iter().map(|s| s.as_u32()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_try_from_rejects_unknown() {
        assert_eq!(HandleStatus::try_from(5).unwrap(), HandleStatus::InvalidType);
        assert!(matches!(
            HandleStatus::try_from(7),
            Err(ProtocolError::UnknownStatus(7))
        ));
    }

    #[test]
    fn test_only_success_is_success() {
        let successes = HandleStatus::ALL.iter().filter(|s| s.is_success()).count();
        assert_eq!(successes, 1);
        assert_eq!(HandleStatus::QueryName.to_string(), "query_name");
    }
}
