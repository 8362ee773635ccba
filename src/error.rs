// Service error taxonomy - transport-neutral error kinds
//
// RPC replies carry an err_code/err_msg pair; transport-level failure is
// reserved for truly unexpected conditions. Every collaborator error is
// classified into one of these kinds at the adapter boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level error code embedded in every RPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrCode {
    #[default]
    None,
    NameDup,
    NotFound,
    InvalidArgument,
    StatusConflict,
    Internal,
    Unavailable,
}

/// Classified service error. Store duplicate-key maps to NameDup (or
/// StatusConflict on the follow relation), empty GetByIds to NotFound,
/// collaborator outages to Unavailable, everything else to Internal.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("name dup")]
    NameDup,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    StatusConflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Wrap an unexpected collaborator error.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ServiceError::Internal(err.to_string())
    }

    pub fn code(&self) -> ErrCode {
        match self {
            ServiceError::NameDup => ErrCode::NameDup,
            ServiceError::NotFound => ErrCode::NotFound,
            ServiceError::InvalidArgument(_) => ErrCode::InvalidArgument,
            ServiceError::StatusConflict(_) => ErrCode::StatusConflict,
            ServiceError::Unavailable(_) => ErrCode::Unavailable,
            ServiceError::Internal(_) => ErrCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        assert_eq!(ServiceError::NameDup.code(), ErrCode::NameDup);
        assert_eq!(ServiceError::NotFound.code(), ErrCode::NotFound);
        assert_eq!(
            ServiceError::InvalidArgument("x".into()).code(),
            ErrCode::InvalidArgument
        );
        assert_eq!(
            ServiceError::StatusConflict("x".into()).code(),
            ErrCode::StatusConflict
        );
        assert_eq!(ServiceError::internal("boom").code(), ErrCode::Internal);
    }

    #[test]
    fn err_code_wire_names() {
        assert_eq!(serde_json::to_string(&ErrCode::None).unwrap(), "\"NONE\"");
        assert_eq!(
            serde_json::to_string(&ErrCode::NameDup).unwrap(),
            "\"NAME_DUP\""
        );
        assert_eq!(
            serde_json::to_string(&ErrCode::NotFound).unwrap(),
            "\"NOT_FOUND\""
        );
    }
}
