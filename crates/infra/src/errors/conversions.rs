//! Conversions from external infrastructure errors into domain errors.

use keel_domain::KeelError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub KeelError);

impl From<InfraError> for KeelError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<KeelError> for InfraError {
    fn from(value: KeelError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoKeelError {
    fn into_keel(self) -> KeelError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → KeelError */
/* -------------------------------------------------------------------------- */

impl IntoKeelError for HttpError {
    fn into_keel(self) -> KeelError {
        if self.is_timeout() {
            return KeelError::Timeout("HTTP request timed out".into());
        }

        if self.is_connect() {
            return KeelError::Network(format!("HTTP connection failure: {self}"));
        }

        if self.is_builder() {
            return KeelError::InvalidInput(format!("invalid HTTP request: {self}"));
        }

        if self.is_decode() || self.is_body() {
            return KeelError::Network(format!("HTTP body transfer failed: {self}"));
        }

        KeelError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_keel())
    }
}

/* -------------------------------------------------------------------------- */
/* toml → KeelError */
/* -------------------------------------------------------------------------- */

impl From<toml::de::Error> for InfraError {
    fn from(value: toml::de::Error) -> Self {
        InfraError(KeelError::Config(format!("Invalid TOML format: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
