use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the pairing bot
#[derive(Error, Debug)]
pub enum PairbotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Request rejected by exchange (status {status}): {message}")]
    ClientRequest { status: u16, message: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream decode error: {0}")]
    StreamDecode(String),

    // Account validation errors
    #[error("Invalid productId format '{0}'. Expected format: 'BUYING-PAYING'")]
    Format(String),

    #[error("No account found for currency: {currency}")]
    AccountNotFound { currency: String },

    #[error("Zero balance: there is no {currency} available to {action} (balance: {balance})")]
    ZeroBalance {
        currency: String,
        action: &'static str,
        balance: Decimal,
    },

    // Order execution errors
    #[error("Calculated order price {0} is less than or equal to zero")]
    NonPositivePrice(Decimal),

    #[error("Order price {required} is more than the available balance {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order timeout: {0}")]
    OrderTimeout(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PairbotError
pub type Result<T> = std::result::Result<T, PairbotError>;

/// Coarse failure classes reported to callers of the pairing loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FormatError,
    AccountNotFound,
    ZeroBalance,
    NonPositivePrice,
    InsufficientFunds,
    OrderRejected,
    GatewayException,
    StreamDecodeError,
    Timeout,
    Cancelled,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::FormatError => "FormatError",
            ErrorKind::AccountNotFound => "AccountNotFound",
            ErrorKind::ZeroBalance => "ZeroBalance",
            ErrorKind::NonPositivePrice => "NonPositivePrice",
            ErrorKind::InsufficientFunds => "InsufficientFunds",
            ErrorKind::OrderRejected => "OrderRejected",
            ErrorKind::GatewayException => "GatewayException",
            ErrorKind::StreamDecodeError => "StreamDecodeError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Other => "Other",
        };
        f.write_str(name)
    }
}

impl PairbotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PairbotError::Format(_) => ErrorKind::FormatError,
            PairbotError::AccountNotFound { .. } => ErrorKind::AccountNotFound,
            PairbotError::ZeroBalance { .. } => ErrorKind::ZeroBalance,
            PairbotError::NonPositivePrice(_) => ErrorKind::NonPositivePrice,
            PairbotError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            PairbotError::OrderRejected(_) => ErrorKind::OrderRejected,
            PairbotError::Http(_)
            | PairbotError::WebSocket(_)
            | PairbotError::RateLimited(_)
            | PairbotError::Gateway(_)
            | PairbotError::ClientRequest { .. } => ErrorKind::GatewayException,
            PairbotError::StreamDecode(_) => ErrorKind::StreamDecodeError,
            PairbotError::OrderTimeout(_) => ErrorKind::Timeout,
            PairbotError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Whether repeating the same call may succeed
    ///
    /// A 4xx answer means the exchange understood and refused the request.
    pub fn is_retryable(&self) -> bool {
        if let PairbotError::ClientRequest { .. } = self {
            return false;
        }
        matches!(
            self.kind(),
            ErrorKind::GatewayException | ErrorKind::Timeout
        )
    }
}
