use std::sync::OnceLock;

use iprotate_core::FleetError;
use regex::Regex;

/// Error codes meaning the credentials are rejected or the account is locked.
///
/// Matched as substrings so `AccessDeniedException` counts as `AccessDenied`.
const AUTHORIZATION_CODES: &[&str] = &[
    "AuthFailure",
    "InvalidClientTokenId",
    "AccessDenied",
    "UnauthorizedOperation",
];

/// Launch errors that mean the provider registered the oversized request.
const CAPACITY_LIMIT_CODES: &[&str] = &[
    "VcpuLimitExceeded",
    "PendingVerification",
    "InsufficientInstanceCapacity",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

const ALREADY_EXISTS_CODES: &[&str] = &["EntityAlreadyExists", "InvalidGroup.Duplicate"];

fn cli_error_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"An error occurred \(([^)]+)\)(?: when calling the \w+ operation)?(?: \([^)]*\))?:\s*(.*)",
            )
            .ok()
        })
        .as_ref()
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The provider answered with an error code.
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    /// The provider could not be reached (CLI missing, crashed, no output).
    #[error("Provider call failed: {0}")]
    Process(String),

    /// The provider answered but the payload was not what we expected.
    #[error("Unexpected provider response: {0}")]
    Malformed(String),
}

impl CloudError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    fn code_matches(&self, codes: &[&str], substring: bool) -> bool {
        self.code().is_some_and(|code| {
            codes
                .iter()
                .any(|c| if substring { code.contains(c) } else { code == *c })
        })
    }

    pub fn is_authorization(&self) -> bool {
        self.code_matches(AUTHORIZATION_CODES, true)
    }

    pub fn is_already_exists(&self) -> bool {
        self.code_matches(ALREADY_EXISTS_CODES, false)
    }

    /// `LimitExceeded` (exact), e.g. a role already bound to the profile.
    pub fn is_limit_exceeded(&self) -> bool {
        self.code_matches(&["LimitExceeded"], false)
    }

    pub fn is_capacity_limit(&self) -> bool {
        self.code_matches(CAPACITY_LIMIT_CODES, false)
    }

    pub fn is_throttling(&self) -> bool {
        self.code_matches(THROTTLING_CODES, false)
    }

    /// The command invocation is not visible yet right after `send-command`.
    pub fn is_invocation_pending(&self) -> bool {
        self.code_matches(&["InvocationDoesNotExist"], false)
    }

    /// Classify into the fleet taxonomy for `account`.
    pub fn into_fleet(self, account: &str) -> FleetError {
        if self.is_authorization() {
            FleetError::CredentialInvalid {
                account: account.to_string(),
                message: self.to_string(),
            }
        } else {
            FleetError::Transient {
                account: account.to_string(),
                message: self.to_string(),
            }
        }
    }
}

/// Parse the CLI's stderr into a classified error.
///
/// The CLI prints `An error occurred (Code) when calling the Op operation: msg`.
/// Anything else is a process-level failure.
pub fn parse_cli_error(stderr: &str) -> CloudError {
    let captures = cli_error_pattern().and_then(|re| re.captures(stderr));
    match captures {
        Some(caps) => CloudError::api(
            caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
            caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default(),
        ),
        None => {
            let trimmed = stderr.trim();
            if trimmed.is_empty() {
                CloudError::Process("command failed without output".to_string())
            } else {
                CloudError::Process(trimmed.to_string())
            }
        }
    }
}
