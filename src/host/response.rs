//! Response envelope for host-interface operations

use serde::Serialize;

use crate::utils::{EngineError, EngineResult, ErrorObject};

/// `{ok: true, data}` on success, `{ok: false, error}` on failure
///
/// Consumers branch on `ok` and localize on `error.code`; raw internal
/// messages never cross this boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Ok { ok: bool, data: T },
    Err { ok: bool, error: ErrorObject },
}

impl<T> ApiResponse<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self::Ok { ok: true, data }
    }

    #[must_use]
    pub fn err(error: ErrorObject) -> Self {
        Self::Err { ok: false, error }
    }

    #[must_use]
    pub fn from_result(result: EngineResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_object()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// The success payload, if any
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Ok { data, .. } => Some(data),
            Self::Err { .. } => None,
        }
    }

    /// The error object, if any
    #[must_use]
    pub fn error(&self) -> Option<&ErrorObject> {
        match self {
            Self::Ok { .. } => None,
            Self::Err { error, .. } => Some(error),
        }
    }
}

impl<T> From<EngineResult<T>> for ApiResponse<T> {
    fn from(result: EngineResult<T>) -> Self {
        Self::from_result(result)
    }
}

impl<T> From<EngineError> for ApiResponse<T> {
    fn from(error: EngineError) -> Self {
        Self::err(error.to_object())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ErrorCode;

    #[test]
    fn test_ok_serialization_shape() {
        let response = ApiResponse::ok(vec![1, 2, 3]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_err_serialization_shape() {
        let response: ApiResponse<()> =
            EngineError::DuplicateSiteIdentifier("example".into()).into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "DUPLICATE_SITE_IDENTIFIER");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_error_accessor() {
        let response: ApiResponse<u32> = EngineError::Timeout(1000).into();
        assert!(!response.is_ok());
        assert_eq!(response.error().unwrap().code, ErrorCode::Timeout);
        assert!(response.into_data().is_none());
    }
}
