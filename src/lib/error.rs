use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoverError>;

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),
    #[error("aggregate not found")]
    AggregateNotFound,
    #[error("{0}")]
    Domain(#[from] DomainError),
    #[error(
        "version conflict for {kind} {aggregate_id}: expected version {expected}, store holds {actual}"
    )]
    VersionConflict {
        kind: &'static str,
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },
    #[error("event stream for {kind} {aggregate_id} is out of order: expected sequence {expected}, found {found}")]
    ReplayOutOfOrder {
        kind: &'static str,
        aggregate_id: String,
        expected: u64,
        found: u64,
    },
    #[error("updater job {0} not found")]
    JobNotFound(String),
    #[error("invalid updater state name: {0}")]
    InvalidJobState(String),
    #[error("trigger {trigger} is not valid in state {state}")]
    InvalidTransition {
        state: &'static str,
        trigger: &'static str,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid summary range: {0}")]
    InvalidSummaryRange(String),
    #[error("unknown time zone: {0}")]
    UnknownTimeZone(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CoverError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for CoverError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CoverError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for CoverError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Dataset(err.to_string())
    }
}

impl From<csv::Error> for CoverError {
    fn from(err: csv::Error) -> Self {
        Self::Dataset(err.to_string())
    }
}

impl From<reqwest::Error> for CoverError {
    fn from(err: reqwest::Error) -> Self {
        Self::Dataset(err.to_string())
    }
}

/// Business-rule violations raised while applying domain events.
///
/// These are not infrastructure failures: each carries a stable machine code
/// so the command layer can surface them as structured error responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("name cannot be empty")]
    EmptyName,
    #[error("alias '{0}' is not valid: lowercase letters, digits, hyphens only")]
    InvalidAlias(String),
    #[error("organisation has been deleted and accepts no further changes")]
    OrganisationDeleted,
    #[error("organisation is already the default for its tenancy")]
    OrganisationAlreadyDefault,
    #[error("organisation is not the default for its tenancy")]
    OrganisationNotDefault,
    #[error("organisation is already active")]
    OrganisationAlreadyActive,
    #[error("organisation is already disabled")]
    OrganisationAlreadyDisabled,
    #[error("sign-in method {0} already exists on this organisation")]
    SignInMethodExists(uuid::Uuid),
    #[error("sign-in method {0} does not exist on this organisation")]
    SignInMethodNotFound(uuid::Uuid),
    #[error("portal has been deleted and accepts no further changes")]
    PortalDeleted,
    #[error("portal is already the default portal of its kind")]
    PortalAlreadyDefault,
    #[error("portal is not the default portal of its kind")]
    PortalNotDefault,
    #[error("a disabled portal cannot be made the default")]
    DisabledPortalCannotBeDefault,
    #[error("portal is already enabled")]
    PortalAlreadyEnabled,
    #[error("portal is already disabled")]
    PortalAlreadyDisabled,
    #[error("property definition has been deleted and accepts no further changes")]
    PropertyDeleted,
    #[error("a unique property cannot carry a default value")]
    UniquePropertyWithDefault,
    #[error("structured properties require a schema; text properties cannot carry one")]
    PropertySchemaMismatch,
}

impl DomainError {
    /// Stable machine-readable code for API consumers and logs.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::EmptyName => "domain.name.empty",
            DomainError::InvalidAlias(_) => "domain.alias.invalid",
            DomainError::OrganisationDeleted => "organisation.deleted",
            DomainError::OrganisationAlreadyDefault => "organisation.default.duplicate",
            DomainError::OrganisationNotDefault => "organisation.default.not_set",
            DomainError::OrganisationAlreadyActive => "organisation.already_active",
            DomainError::OrganisationAlreadyDisabled => "organisation.already_disabled",
            DomainError::SignInMethodExists(_) => "organisation.sign_in_method.duplicate",
            DomainError::SignInMethodNotFound(_) => "organisation.sign_in_method.not_found",
            DomainError::PortalDeleted => "portal.deleted",
            DomainError::PortalAlreadyDefault => "portal.default.duplicate",
            DomainError::PortalNotDefault => "portal.default.not_set",
            DomainError::DisabledPortalCannotBeDefault => "portal.default.disabled",
            DomainError::PortalAlreadyEnabled => "portal.already_enabled",
            DomainError::PortalAlreadyDisabled => "portal.already_disabled",
            DomainError::PropertyDeleted => "additional_property.deleted",
            DomainError::UniquePropertyWithDefault => "additional_property.unique_with_default",
            DomainError::PropertySchemaMismatch => "additional_property.schema_mismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_codes_are_stable() {
        assert_eq!(
            DomainError::OrganisationAlreadyDefault.code(),
            "organisation.default.duplicate"
        );
        assert_eq!(
            DomainError::SignInMethodNotFound(uuid::Uuid::nil()).code(),
            "organisation.sign_in_method.not_found"
        );
    }

    #[test]
    fn domain_error_converts_into_cover_error() {
        let err: CoverError = DomainError::PortalAlreadyDefault.into();
        assert!(matches!(err, CoverError::Domain(_)));
    }
}
