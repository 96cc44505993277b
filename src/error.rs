use thiserror::Error;

/// Whether a failed gateway call may be retried with the same idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    Transient,
    Terminal,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Transient => f.write_str("transient"),
            FailureClass::Terminal => f.write_str("terminal"),
        }
    }
}

/// Coarse grouping of errors for the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    Tenant,
    Client,
    NotFound,
    Gateway,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("Tenant unavailable: {0}")]
    TenantUnavailable(String),

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),
    #[error("Coupon expired: {0}")]
    CouponExpired(String),
    #[error("Coupon exhausted: {0}")]
    CouponExhausted(String),
    #[error("Coupon {0} does not apply to any item in the order")]
    CouponNotApplicable(String),
    #[error("Product not found: {0}")]
    ProductNotFound(String),
    #[error("Invalid quantity {quantity} for {sku}")]
    InvalidQuantity { sku: String, quantity: u32 },
    #[error("Amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch {
        expected: rust_decimal::Decimal,
        actual: rust_decimal::Decimal,
    },
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },
    #[error("Order {0} is not awaiting payment")]
    OrderNotPending(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Refund of {requested} exceeds refundable amount {available}")]
    ExcessiveRefund {
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },
    #[error("Download expired: {0}")]
    DownloadExpired(String),
    #[error("Download limit reached: {0}")]
    DownloadExhausted(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{0} not found")]
    NotFound(String),

    #[error("Gateway error ({class}): {message}")]
    GatewayError { class: FailureClass, message: String },

    #[error("Concurrent modification of {0}")]
    StoreConflict(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CommerceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CommerceError::Unauthenticated(_) | CommerceError::Forbidden(_) => ErrorClass::Auth,
            CommerceError::UnknownTenant(_) | CommerceError::TenantUnavailable(_) => {
                ErrorClass::Tenant
            }
            CommerceError::NotFound(_) => ErrorClass::NotFound,
            CommerceError::GatewayError { .. } => ErrorClass::Gateway,
            CommerceError::StoreConflict(_) => ErrorClass::Conflict,
            CommerceError::CsvError(_)
            | CommerceError::IoError(_)
            | CommerceError::SerializationError(_)
            | CommerceError::InternalError(_) => ErrorClass::Internal,
            #[cfg(feature = "storage-rocksdb")]
            CommerceError::StorageError(_) => ErrorClass::Internal,
            _ => ErrorClass::Client,
        }
    }

    /// Only store conflicts and transient gateway failures may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommerceError::StoreConflict(_)
                | CommerceError::GatewayError {
                    class: FailureClass::Transient,
                    ..
                }
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CommerceError::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
