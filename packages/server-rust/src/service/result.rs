//! Structured service results.
//!
//! Every game service returns `Result<T, ServiceError>`; the dispatcher is
//! the only place that turns a `ServiceError` into a wire `resp_error`.
//! Game-rule failures (cooldown, collision, full inventory) are ordinary
//! `Err` values and never tear down the session.

use std::fmt;

use tilefall_core::messages::ErrorPayload;

/// Machine-readable error codes carried on the wire as `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation
    InvalidDirection,
    InvalidPosition,
    InvalidSlot,
    UnknownItem,
    // Authorization
    NotAuthenticated,
    Banned,
    TimedOut,
    // Game rules
    RateLimited,
    Blocked,
    PlayerNotOnline,
    InventoryFull,
    NotFound,
    Dead,
    TooFar,
    NotImplemented,
    NotEquippable,
    NoAmmo,
    // Everything else
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidDirection => "invalid_direction",
            ErrorCode::InvalidPosition => "invalid_position",
            ErrorCode::InvalidSlot => "invalid_slot",
            ErrorCode::UnknownItem => "unknown_item",
            ErrorCode::NotAuthenticated => "not_authenticated",
            ErrorCode::Banned => "banned",
            ErrorCode::TimedOut => "timed_out",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Blocked => "blocked",
            ErrorCode::PlayerNotOnline => "player_not_online",
            ErrorCode::InventoryFull => "inventory_full",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Dead => "dead",
            ErrorCode::TooFar => "too_far",
            ErrorCode::NotImplemented => "not_implemented",
            ErrorCode::NotEquippable => "not_equippable",
            ErrorCode::NoAmmo => "no_ammo",
            ErrorCode::Internal => "internal_error",
        }
    }

    /// Whether the dispatcher should close the connection after replying.
    #[must_use]
    pub fn terminates_session(self) -> bool {
        matches!(
            self,
            ErrorCode::NotAuthenticated | ErrorCode::Banned | ErrorCode::TimedOut
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed service call: code, human message, and reason-specific detail.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
    /// Seconds until the action is allowed again (`rate_limited`).
    pub cooldown_remaining: Option<f64>,
    /// Whether a collision caused the failure (`blocked`).
    pub collision: bool,
}

impl ServiceError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cooldown_remaining: None,
            collision: false,
        }
    }

    #[must_use]
    pub fn with_cooldown(mut self, remaining: f64) -> Self {
        self.cooldown_remaining = Some(remaining);
        self
    }

    #[must_use]
    pub fn with_collision(mut self) -> Self {
        self.collision = true;
        self
    }

    /// Wire representation for a `resp_error` envelope.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            message: self.message.clone(),
            error_code: Some(self.code.as_str().to_string()),
            cooldown_remaining: self.cooldown_remaining,
            collision: if self.collision { Some(true) } else { None },
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(ErrorCode::Internal, err.to_string())
    }
}

impl From<crate::cache::CacheError> for ServiceError {
    fn from(err: crate::cache::CacheError) -> Self {
        Self::new(ErrorCode::Internal, err.to_string())
    }
}

/// Result alias used by every game service.
pub type ServiceResult<T> = Result<T, ServiceError>;
