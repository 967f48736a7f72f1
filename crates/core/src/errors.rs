use thiserror::Error;

/// 中间件错误类型定义
#[derive(Debug, Error)]
pub enum VcError {
    #[error("Transport connect error: {0}")]
    TransportConnect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Missing correlation field: {0}")]
    MissingCorrelation(&'static str),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure while resolving or invoking a job function.
///
/// These never escape a vehicle: the pipeline turns them into the `error`
/// field of the published result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("job carries no function name")]
    MissingFunction,

    #[error("invalid arguments for '{function}': {message}")]
    InvalidArguments { function: String, message: String },

    #[error("{0}")]
    Failed(String),

    #[error("function panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    pub fn invalid_arguments(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for VcError {
    fn from(e: config::ConfigError) -> Self {
        VcError::Configuration(e.to_string())
    }
}

/// 统一的Result类型
pub type VcResult<T> = std::result::Result<T, VcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_converts_into_vc_error() {
        let err: VcError = DispatchError::UnknownFunction("nope".to_string()).into();
        assert!(matches!(err, VcError::Dispatch(_)));
        assert_eq!(err.to_string(), "Dispatch error: unknown function 'nope'");
    }

    #[test]
    fn test_decode_error_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: VcError = err.into();
        assert!(matches!(err, VcError::Decode(_)));
    }

    #[test]
    fn test_invalid_arguments_message() {
        let err = DispatchError::invalid_arguments("add", "expected 2 arguments, got 1");
        assert_eq!(
            err.to_string(),
            "invalid arguments for 'add': expected 2 arguments, got 1"
        );
    }
}
