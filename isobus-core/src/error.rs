//! Error taxonomy shared by the stack's synchronous APIs.
//!
//! Protocol errors that arise asynchronously from the wire (a transport
//! abort, a lost address claim, a missed heartbeat) are delivered through
//! [`crate::Event`]s, never as a `Result` — see the crate-level module
//! documentation for the propagation policy.

/// Returned synchronously when a control function or port cannot be
/// configured as requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The supplied NAME is already in use by another internal control
    /// function on this port.
    DuplicateName,
    /// An internal control function already exists for this preferred
    /// address on this port.
    DuplicateAddress,
    /// The port index is outside the configured range.
    PortOutOfRange(u8),
    /// The preferred address is reserved (null or broadcast).
    ReservedAddress(u8),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "NAME already claimed by another internal control function"),
            Self::DuplicateAddress => write!(f, "address already requested by another internal control function"),
            Self::PortOutOfRange(port) => write!(f, "port out of range: {port}"),
            Self::ReservedAddress(addr) => write!(f, "address is reserved: {addr:#04x}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Returned synchronously when an API is invoked while its owning state
/// machine is not in a state that permits it (e.g. a VT command issued
/// before the connection reaches `Connected`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecondError {
    /// The caller must reach this state first.
    WrongState { expected: &'static str, actual: &'static str },
    /// An operation that requires a prior configuration step (e.g. setting
    /// an object pool before connecting) was attempted without it.
    MissingPrerequisite(&'static str),
}

impl std::fmt::Display for PrecondError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongState { expected, actual } => {
                write!(f, "expected state {expected}, was {actual}")
            }
            Self::MissingPrerequisite(what) => write!(f, "missing prerequisite: {what}"),
        }
    }
}

impl std::error::Error for PrecondError {}

/// Returned synchronously when the underlying CAN endpoint reports a send
/// failure.
#[derive(Debug)]
pub struct EndpointError {
    message: String,
    source: Option<std::io::Error>,
}

impl EndpointError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint error: {}", self.message)
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for EndpointError {
    fn from(err: std::io::Error) -> Self {
        Self {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        assert_eq!(
            ConfigError::PortOutOfRange(3).to_string(),
            "port out of range: 3"
        );
    }

    #[test]
    fn endpoint_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "nope");
        let err: EndpointError = io_err.into();
        assert!(err.to_string().contains("nope"));
    }
}
