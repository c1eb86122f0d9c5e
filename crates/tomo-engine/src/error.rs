use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("invalid IP override `{input}`")]
    InvalidIpOverride { input: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether trying the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl { .. }
            | Self::InvalidIpOverride { .. }
            | Self::Configuration { .. } => false,
            Self::HttpStatus { status, .. } => status.is_server_error(),
            Self::Network { source } => !source.is_builder(),
        }
    }
}

/// Failure reported by a container-specific tag source.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("malformed {container} data: {reason}")]
    Malformed {
        container: &'static str,
        reason: String,
    },
}

impl ContainerError {
    pub fn malformed(container: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            container,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let server = DownloadError::http_status(StatusCode::BAD_GATEWAY, "http://cache/v");
        assert!(server.is_retryable());

        let client = DownloadError::http_status(StatusCode::FORBIDDEN, "http://cache/v");
        assert!(!client.is_retryable());
        assert_eq!(
            client.to_string(),
            "request failed with HTTP 403 Forbidden for http://cache/v"
        );
    }

    #[test]
    fn test_input_errors_are_final() {
        assert!(!DownloadError::invalid_url("::", "relative URL without a base").is_retryable());
        assert!(
            !DownloadError::InvalidIpOverride {
                input: "10.0.0".into()
            }
            .is_retryable()
        );
        assert!(!DownloadError::configuration("bad threshold").is_retryable());
    }
}
