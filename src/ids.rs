use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Correlation id attached to every request, backed by a ULID.
///
/// Ids sort by creation time, which keeps log lines for one request
/// grouped when they are ordered by id.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(ulid::Ulid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Use the caller's `x-request-id` when it is a valid ULID, otherwise mint one.
    #[must_use]
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .map(str::trim)
            .and_then(|s| s.parse::<RequestId>().ok())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn as_ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(RequestId)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
