use std::fmt;

/// The error type returned by all deserialization methods
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerdeErr;

impl fmt::Display for SerdeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bin deserialize error")
    }
}

impl std::error::Error for SerdeErr {}
