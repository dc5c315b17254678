//! Error types for the network control plane

use thiserror::Error;

/// Win32 `ERROR_INVALID_PARAMETER`
pub const ERROR_INVALID_PARAMETER: u32 = 87;
/// `FWP_E_INVALID_PARAMETER`
pub const FWP_E_INVALID_PARAMETER: u32 = 0x8032_0035;
/// `FWP_E_ALREADY_EXISTS`
pub const FWP_E_ALREADY_EXISTS: u32 = 0x8032_0009;
/// Win32 `ERROR_FILE_NOT_FOUND`, returned when an app path cannot be resolved
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
/// Win32 `ERROR_NOT_FOUND`
pub const ERROR_NOT_FOUND: u32 = 1168;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Packet filter {operation} failed: 0x{code:08X}")]
    Filter { operation: String, code: u32 },

    #[error("Route error: {0}")]
    Route(String),

    #[error("Interface error: {0}")]
    Interface(String),

    #[error("IP helper {operation} failed: {code}")]
    IpHelper { operation: String, code: u32 },

    #[error("Service error: {0}")]
    Service(#[from] ServiceControlError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetError {
    pub fn filter(operation: impl Into<String>, code: u32) -> Self {
        NetError::Filter {
            operation: operation.into(),
            code,
        }
    }

    pub fn ip_helper(operation: impl Into<String>, code: u32) -> Self {
        NetError::IpHelper {
            operation: operation.into(),
            code,
        }
    }

    /// Whether the error was caused by a bad argument for a single item
    /// (unparsable app path, unknown file). Such failures are skipped per item.
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            NetError::Filter { code, .. } => matches!(
                *code,
                ERROR_INVALID_PARAMETER | FWP_E_INVALID_PARAMETER | ERROR_FILE_NOT_FOUND
            ),
            NetError::InvalidArgument(_) | NetError::InvalidAddress(_) => true,
            _ => false,
        }
    }

    /// Native error code, when the failure came from the OS
    pub fn code(&self) -> Option<u32> {
        match self {
            NetError::Filter { code, .. } | NetError::IpHelper { code, .. } => Some(*code),
            NetError::Service(ServiceControlError::Os { code, .. }) => Some(*code),
            _ => None,
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;

/// Win32 service control error codes the lifecycle controller cares about
pub const ERROR_SERVICE_ALREADY_RUNNING: u32 = 1056;
pub const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;
pub const ERROR_SERVICE_NOT_ACTIVE: u32 = 1062;

/// Service Control Manager failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceControlError {
    #[error("service does not exist")]
    DoesNotExist,

    #[error("service is already running")]
    AlreadyRunning,

    #[error("service is not active")]
    NotActive,

    #[error("{message} (code {code})")]
    Os { code: u32, message: String },
}

impl ServiceControlError {
    /// Map a raw Win32 error code onto the known cases
    pub fn from_code(code: u32, message: impl Into<String>) -> Self {
        match code {
            ERROR_SERVICE_DOES_NOT_EXIST => ServiceControlError::DoesNotExist,
            ERROR_SERVICE_ALREADY_RUNNING => ServiceControlError::AlreadyRunning,
            ERROR_SERVICE_NOT_ACTIVE => ServiceControlError::NotActive,
            _ => ServiceControlError::Os {
                code,
                message: message.into(),
            },
        }
    }
}
