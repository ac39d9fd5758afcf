// error.rs
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::methods::Method;

/// Numeric result codes of the public command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    NotFound = -1,
    PermissionDenied = -2,
    DeviceNotFound = -3,
    MethodNotSupported = -4,
    Unknown = -99,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<ResultCode> {
        match code {
            0 => Some(ResultCode::Success),
            -1 => Some(ResultCode::NotFound),
            -2 => Some(ResultCode::PermissionDenied),
            -3 => Some(ResultCode::DeviceNotFound),
            -4 => Some(ResultCode::MethodNotSupported),
            -99 => Some(ResultCode::Unknown),
            _ => None,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ResultCode::Success => "Success",
            ResultCode::NotFound => "TellStick not found",
            ResultCode::PermissionDenied => "Permission denied",
            ResultCode::DeviceNotFound => "Device not found",
            ResultCode::MethodNotSupported => {
                "The method you tried to use is not supported by the device"
            }
            ResultCode::Unknown => "Unknown error",
        }
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("protocol {protocol} cannot encode {method}")]
    Unencodable {
        protocol: &'static str,
        method: Method,
    },
    #[error("invalid parameter {key}: {reason}")]
    Parameter { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("controller {0} is not available")]
    Unavailable(i32),
    #[error("transmit timed out after {0} ms")]
    Timeout(u64),
    #[error("transceiver rejected frame: {0}")]
    Rejected(String),
    #[error("controller {controller} does not carry {kind} frames")]
    UnsupportedFrame { controller: i32, kind: char },
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed device file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Why an actuation did not commit.
#[derive(Error, Debug)]
pub enum ActuationError {
    #[error("device {0} not found")]
    NoSuchDevice(i32),
    #[error("protocol {0:?} is not registered")]
    UnknownProtocol(String),
    #[error("method {0} is not supported")]
    MethodNotSupported(Method),
    #[error("no controller available")]
    NoController,
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("transmit failed: {0}")]
    Transmit(#[from] ControllerError),
    #[error("device {0} is busy")]
    Busy(i32),
}

impl ActuationError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            ActuationError::NoSuchDevice(_) | ActuationError::UnknownProtocol(_) => {
                ResultCode::DeviceNotFound
            }
            ActuationError::MethodNotSupported(_) => ResultCode::MethodNotSupported,
            ActuationError::NoController
            | ActuationError::Transmit(ControllerError::Unavailable(_)) => ResultCode::NotFound,
            ActuationError::Transmit(ControllerError::Io(e))
                if e.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                ResultCode::PermissionDenied
            }
            ActuationError::Transmit(ControllerError::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                ResultCode::NotFound
            }
            ActuationError::Encode(_) | ActuationError::Transmit(_) | ActuationError::Busy(_) => {
                ResultCode::Unknown
            }
        }
    }
}

/// Converts an actuation outcome into its numeric result code.
pub fn to_code(result: &Result<(), ActuationError>) -> i32 {
    match result {
        Ok(()) => ResultCode::Success.code(),
        Err(e) => e.result_code().code(),
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
    pub code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::DeviceNotFound => StatusCode::NOT_FOUND,
            AppError::UnknownProtocol(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            message: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_public_constants() {
        assert_eq!(ResultCode::Success.code(), 0);
        assert_eq!(ResultCode::NotFound.code(), -1);
        assert_eq!(ResultCode::PermissionDenied.code(), -2);
        assert_eq!(ResultCode::DeviceNotFound.code(), -3);
        assert_eq!(ResultCode::MethodNotSupported.code(), -4);
        assert_eq!(ResultCode::Unknown.code(), -99);
        assert_eq!(ResultCode::from_code(-4), Some(ResultCode::MethodNotSupported));
        assert_eq!(ResultCode::from_code(-5), None);
    }

    #[test]
    fn actuation_errors_map_to_codes() {
        assert_eq!(
            ActuationError::UnknownProtocol("zap".into()).result_code(),
            ResultCode::DeviceNotFound
        );
        assert_eq!(
            ActuationError::MethodNotSupported(Method::Bell).result_code(),
            ResultCode::MethodNotSupported
        );
        assert_eq!(
            ActuationError::Transmit(ControllerError::Timeout(500)).result_code(),
            ResultCode::Unknown
        );
        assert_eq!(
            ActuationError::Transmit(ControllerError::Unavailable(1)).result_code(),
            ResultCode::NotFound
        );
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(
            ActuationError::Transmit(ControllerError::Io(denied)).result_code(),
            ResultCode::PermissionDenied
        );
    }
}
