use thiserror::Error;

/// Main error type for stornet operations
#[derive(Debug, Error)]
pub enum StornetError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Azure API error: {0}")]
    AzureApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage account not found: {account}")]
    AccountNotFound { account: String },

    #[error("Failed to read network rules of storage account '{account}': {source}")]
    RemoteFetch {
        account: String,
        #[source]
        source: Box<StornetError>,
    },

    #[error("Failed to update network rules of storage account '{account}': {source}")]
    RemoteUpdate {
        account: String,
        #[source]
        source: Box<StornetError>,
    },

    #[error("Network rules of storage account '{account}' already exist and are not in the default state; import them before managing them")]
    AlreadyExists { account: String },

    #[error("Timed out waiting for lock '{name}'")]
    LockTimeout { name: String },

    #[error("Invalid network rule: {0}")]
    InvalidRule(String),

    #[error("Invalid resource ID '{id}': {reason}")]
    InvalidResourceId { id: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl StornetError {
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::AuthenticationError(msg.into())
    }

    pub fn azure_api<S: Into<String>>(msg: S) -> Self {
        Self::AzureApiError(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn account_not_found<S: Into<String>>(account: S) -> Self {
        Self::AccountNotFound {
            account: account.into(),
        }
    }

    pub fn remote_fetch<S: Into<String>>(account: S, source: StornetError) -> Self {
        Self::RemoteFetch {
            account: account.into(),
            source: Box::new(source),
        }
    }

    pub fn remote_update<S: Into<String>>(account: S, source: StornetError) -> Self {
        Self::RemoteUpdate {
            account: account.into(),
            source: Box::new(source),
        }
    }

    pub fn already_exists<S: Into<String>>(account: S) -> Self {
        Self::AlreadyExists {
            account: account.into(),
        }
    }

    pub fn lock_timeout<S: Into<String>>(name: S) -> Self {
        Self::LockTimeout { name: name.into() }
    }

    pub fn invalid_rule<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRule(msg.into())
    }

    pub fn invalid_resource_id<S: Into<String>, R: Into<String>>(id: S, reason: R) -> Self {
        Self::InvalidResourceId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::NetworkError(msg.into())
    }

    pub fn connection_timeout<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionTimeout(msg.into())
    }

    pub fn connection_refused<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionRefused(msg.into())
    }

    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::SerializationError(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unknown<S: Into<String>>(msg: S) -> Self {
        Self::Unknown(msg.into())
    }
}

/// Result type alias for stornet operations
pub type Result<T> = std::result::Result<T, StornetError>;

/// Convert Azure Core errors to StornetError
impl From<azure_core::Error> for StornetError {
    fn from(error: azure_core::Error) -> Self {
        Self::AzureApiError(error.to_string())
    }
}
