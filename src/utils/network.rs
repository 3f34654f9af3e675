use crate::error::{Result, StornetError};
use reqwest::Client;
use std::time::Duration;

/// Configuration for HTTP client with proper timeouts
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            user_agent: format!("stornet/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Create a properly configured HTTP client with timeouts
pub fn create_http_client(config: &NetworkConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(&config.user_agent)
        .build()
        .map_err(|e| StornetError::network(format!("Failed to create HTTP client: {}", e)))
}

/// Turn a transport failure into an error naming the account involved
pub fn classify_network_error(error: &reqwest::Error, account: &str) -> StornetError {
    if error.is_timeout() {
        return StornetError::connection_timeout(format!(
            "Request for storage account '{}' to Azure Resource Manager timed out",
            account
        ));
    }

    if error.is_connect() {
        if error
            .to_string()
            .to_lowercase()
            .contains("connection refused")
        {
            return StornetError::connection_refused(format!(
                "Connection to Azure Resource Manager was refused while accessing storage account '{}'",
                account
            ));
        }

        return StornetError::network(format!(
            "Failed to connect to Azure Resource Manager while accessing storage account '{}': {}",
            account, error
        ));
    }

    if let Some(status) = error.status() {
        match status.as_u16() {
            503 => {
                return StornetError::network(format!(
                    "Azure Resource Manager is temporarily unavailable (503) for storage account '{}'",
                    account
                ))
            }
            502 | 504 => {
                return StornetError::network(format!(
                    "Gateway error ({}) when accessing storage account '{}'",
                    status.as_u16(),
                    account
                ))
            }
            _ => {}
        }
    }

    StornetError::network(format!(
        "Network error when accessing storage account '{}': {}",
        account, error
    ))
}

/// Check if an error is worth retrying at the transport level
pub fn is_retryable_error(error: &StornetError) -> bool {
    match error {
        StornetError::ConnectionTimeout(_) => true,
        StornetError::NetworkError(msg) => {
            let msg_lower = msg.to_lowercase();
            msg_lower.contains("timeout")
                || msg_lower.contains("temporar")
                || msg_lower.contains("503")
                || msg_lower.contains("502")
                || msg_lower.contains("504")
        }
        StornetError::AzureApiError(msg) => {
            let msg_lower = msg.to_lowercase();
            msg_lower.contains("http 429")
                || msg_lower.contains("http 503")
                || msg_lower.contains("http 502")
                || msg_lower.contains("http 504")
                || msg_lower.contains("throttled")
        }
        StornetError::ConnectionRefused(_) => false,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_error() {
        let timeout_error = StornetError::connection_timeout("timeout");
        assert!(is_retryable_error(&timeout_error));

        let throttled = StornetError::azure_api("HTTP 429: Too many requests");
        assert!(is_retryable_error(&throttled));

        let conflict = StornetError::azure_api("HTTP 409: Conflict");
        assert!(!is_retryable_error(&conflict));

        let refused = StornetError::connection_refused("refused");
        assert!(!is_retryable_error(&refused));

        let not_found = StornetError::account_not_found("acct1");
        assert!(!is_retryable_error(&not_found));
    }
}
