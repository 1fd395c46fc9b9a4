use thiserror::Error;

/// Domain error kinds shared by every Amon component.
///
/// The master's HTTP layer maps these onto status codes; everything below
/// that layer deals in kinds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required field was absent from the input.
    MissingParameter,
    /// A field was present but malformed, or the caller is not authorized
    /// for the targeted resource.
    InvalidArgument,
    /// The named entity does not exist in the directory.
    ResourceNotFound,
    /// The operation would violate a structural constraint
    /// (e.g. deleting a monitor that still has probes).
    Constraint,
    /// The directory or a downstream API is transiently unreachable.
    /// Never cached.
    Unavailable,
    /// A bug or a corrupt directory record.
    Internal,
}

impl ErrorKind {
    /// Wire code used in `{code, message}` error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::MissingParameter => "MissingParameter",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::ResourceNotFound => "ResourceNotFound",
            ErrorKind::Constraint => "Constraint",
            ErrorKind::Unavailable => "ServiceUnavailable",
            ErrorKind::Internal => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::MissingParameter => 409,
            ErrorKind::InvalidArgument => 409,
            ErrorKind::ResourceNotFound => 404,
            ErrorKind::Constraint => 409,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{}: {}", .kind.code(), .message)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingParameter, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Constraint, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_statuses() {
        assert_eq!(ErrorKind::MissingParameter.http_status(), 409);
        assert_eq!(ErrorKind::ResourceNotFound.http_status(), 404);
        assert_eq!(ErrorKind::Unavailable.http_status(), 503);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn display_carries_code_and_message() {
        let err = Error::invalid_argument("machine is not owned by the account");
        assert_eq!(
            err.to_string(),
            "InvalidArgument: machine is not owned by the account"
        );
    }
}
