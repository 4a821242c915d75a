//! Error taxonomy shared by the freshview primitives.
//!
//! Only [`ConfigError`] ever reaches a caller. [`SubscriberError`] and
//! [`EqualityError`] are produced internally, logged, and absorbed so that
//! a failure costs at most an extra recomputation, never stale output.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Invalid constructor arguments. Always surfaced synchronously.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("staleness window must be positive, got {millis}ms")]
    NonPositiveStaleness { millis: f64 },

    #[error("staleness window must be finite, got {millis}ms")]
    NonFiniteStaleness { millis: f64 },

    #[error("staleness window of {millis}ms does not fit in a Duration")]
    StalenessOutOfRange { millis: f64 },
}

/// Failure raised by a notified subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriberError {
    #[error("subscriber failed: {message}")]
    Failed { message: String },

    #[error("subscriber panicked: {message}")]
    Panicked { message: String },
}

impl SubscriberError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Failure while comparing two projected values.
///
/// Every variant is treated as "not equal" by the selector layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EqualityError {
    #[error("values are not comparable: {reason}")]
    Incomparable { reason: String },

    #[error("equality function panicked: {message}")]
    Panicked { message: String },
}

impl EqualityError {
    #[must_use]
    pub fn incomparable(reason: impl Into<String>) -> Self {
        Self::Incomparable {
            reason: reason.into(),
        }
    }
}

/// Render a caught panic payload as text for logging.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_value() {
        let err = ConfigError::NonPositiveStaleness { millis: -5.0 };
        assert_eq!(err.to_string(), "staleness window must be positive, got -5ms");
        let err = ConfigError::NonFiniteStaleness {
            millis: f64::INFINITY,
        };
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn panic_message_handles_str_and_string() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
