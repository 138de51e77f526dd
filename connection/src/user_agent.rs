//! User agent validation for the version handshake.
//!
//! Neo nodes announce themselves with a `/name:version/` string, the same
//! convention bitcoin implementations use.

use crate::message::MAX_USER_AGENT_SIZE;
use std::fmt;

/// Errors that can occur during user agent validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentError {
    /// The user agent format is invalid (must be `/name:version/`).
    InvalidFormat,
    /// The name component is missing or empty.
    MissingName,
    /// The version component is missing or empty.
    MissingVersion,
    /// The user agent does not fit in a version payload.
    TooLong(usize),
}

impl fmt::Display for UserAgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAgentError::InvalidFormat => {
                write!(f, "User agent must follow format '/name:version/'")
            }
            UserAgentError::MissingName => {
                write!(f, "User agent name component cannot be empty")
            }
            UserAgentError::MissingVersion => {
                write!(f, "User agent version component cannot be empty")
            }
            UserAgentError::TooLong(len) => {
                write!(
                    f,
                    "User agent of {len} bytes exceeds maximum of {MAX_USER_AGENT_SIZE}"
                )
            }
        }
    }
}

impl std::error::Error for UserAgentError {}

/// Validates the `/name:version/` user agent format.
///
/// # Example
///
/// ```
/// use neo_peers_connection::user_agent::validate_format;
///
/// assert!(validate_format("/neo-peers:0.1.0/").is_ok());
/// assert!(validate_format("neo-peers:0.1.0").is_err());
/// assert!(validate_format("/neo-peers/").is_err());
/// ```
pub fn validate_format(user_agent: &str) -> Result<(), UserAgentError> {
    if user_agent.len() > MAX_USER_AGENT_SIZE {
        return Err(UserAgentError::TooLong(user_agent.len()));
    }

    if user_agent.len() < 2 || !user_agent.starts_with('/') || !user_agent.ends_with('/') {
        return Err(UserAgentError::InvalidFormat);
    }

    let contents = &user_agent[1..user_agent.len() - 1];
    let mut parts = contents.split(':');
    let (name, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(version), None) => (name, version),
        _ => return Err(UserAgentError::InvalidFormat),
    };

    if name.is_empty() {
        return Err(UserAgentError::MissingName);
    }

    if version.is_empty() {
        return Err(UserAgentError::MissingVersion);
    }

    Ok(())
}

/// A validated user agent string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgent(String);

impl UserAgent {
    /// Validate and wrap a user agent string.
    pub fn new(user_agent: impl Into<String>) -> Result<Self, UserAgentError> {
        let user_agent = user_agent.into();
        validate_format(&user_agent)?;
        Ok(UserAgent(user_agent))
    }

    /// Build a user agent from its components.
    ///
    /// ```
    /// use neo_peers_connection::UserAgent;
    ///
    /// let user_agent = UserAgent::from_name_version("neo-peers", "0.1.0").unwrap();
    /// assert_eq!(user_agent.as_str(), "/neo-peers:0.1.0/");
    /// ```
    pub fn from_name_version(name: &str, version: &str) -> Result<Self, UserAgentError> {
        UserAgent::new(format!("/{name}:{version}/"))
    }

    /// Wrap a string already known to be in `/name:version/` form.
    pub(crate) fn new_unchecked(user_agent: String) -> Self {
        UserAgent(user_agent)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
