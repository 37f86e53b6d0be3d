use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, AggregateMeta, EventSourced, TenantId},
    error::DomainError,
};

/// How users authenticate against an organisation's portals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignInMethodKind {
    LocalAccount,
    Saml,
    OpenIdConnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInMethod {
    pub method_id: Uuid,
    pub kind: SignInMethodKind,
    pub name: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrganisationEvent {
    Initialized { name: String, alias: String },
    NameChanged { name: String },
    AliasChanged { alias: String },
    Activated,
    Disabled,
    Deleted,
    DefaultSet,
    DefaultUnset,
    SignInMethodAdded {
        method_id: Uuid,
        kind: SignInMethodKind,
        name: String,
    },
    SignInMethodDisabled { method_id: Uuid },
    SignInMethodEnabled { method_id: Uuid },
    SignInMethodRemoved { method_id: Uuid },
}

/// Organisation aggregate. All fields are derived from the event stream; no
/// field is written outside `apply`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organisation {
    pub name: String,
    pub alias: String,
    pub active: bool,
    pub deleted: bool,
    pub is_default: bool,
    pub sign_in_methods: Vec<SignInMethod>,
}

impl Organisation {
    fn method_index(&self, method_id: Uuid) -> Option<usize> {
        self.sign_in_methods
            .iter()
            .position(|m| m.method_id == method_id)
    }

    fn guard_not_deleted(&self) -> Result<(), DomainError> {
        if self.deleted {
            return Err(DomainError::OrganisationDeleted);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganisationReadModel {
    pub aggregate_id: Uuid,
    pub tenant: TenantId,
    pub name: String,
    pub alias: String,
    pub active: bool,
    pub deleted: bool,
    pub is_default: bool,
    pub sign_in_methods: Vec<SignInMethod>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl Aggregate for Organisation {
    const KIND: &'static str = "organisation";

    type Event = OrganisationEvent;
    type ReadModel = OrganisationReadModel;

    fn apply(&mut self, event: &OrganisationEvent) -> Result<(), DomainError> {
        match event {
            OrganisationEvent::Initialized { name, alias } => {
                self.name = name.clone();
                self.alias = alias.clone();
                self.active = true;
            }
            OrganisationEvent::NameChanged { name } => {
                self.guard_not_deleted()?;
                self.name = name.clone();
            }
            OrganisationEvent::AliasChanged { alias } => {
                self.guard_not_deleted()?;
                self.alias = alias.clone();
            }
            OrganisationEvent::Activated => {
                self.guard_not_deleted()?;
                if self.active {
                    return Err(DomainError::OrganisationAlreadyActive);
                }
                self.active = true;
            }
            OrganisationEvent::Disabled => {
                self.guard_not_deleted()?;
                if !self.active {
                    return Err(DomainError::OrganisationAlreadyDisabled);
                }
                self.active = false;
            }
            OrganisationEvent::Deleted => {
                self.guard_not_deleted()?;
                self.deleted = true;
                self.active = false;
                self.is_default = false;
            }
            OrganisationEvent::DefaultSet => {
                self.guard_not_deleted()?;
                if self.is_default {
                    return Err(DomainError::OrganisationAlreadyDefault);
                }
                self.is_default = true;
            }
            OrganisationEvent::DefaultUnset => {
                self.guard_not_deleted()?;
                if !self.is_default {
                    return Err(DomainError::OrganisationNotDefault);
                }
                self.is_default = false;
            }
            OrganisationEvent::SignInMethodAdded {
                method_id,
                kind,
                name,
            } => {
                self.guard_not_deleted()?;
                if self.method_index(*method_id).is_some() {
                    return Err(DomainError::SignInMethodExists(*method_id));
                }
                self.sign_in_methods.push(SignInMethod {
                    method_id: *method_id,
                    kind: *kind,
                    name: name.clone(),
                    disabled: false,
                });
            }
            OrganisationEvent::SignInMethodDisabled { method_id } => {
                self.guard_not_deleted()?;
                let index = self
                    .method_index(*method_id)
                    .ok_or(DomainError::SignInMethodNotFound(*method_id))?;
                self.sign_in_methods[index].disabled = true;
            }
            OrganisationEvent::SignInMethodEnabled { method_id } => {
                self.guard_not_deleted()?;
                let index = self
                    .method_index(*method_id)
                    .ok_or(DomainError::SignInMethodNotFound(*method_id))?;
                self.sign_in_methods[index].disabled = false;
            }
            OrganisationEvent::SignInMethodRemoved { method_id } => {
                self.guard_not_deleted()?;
                let index = self
                    .method_index(*method_id)
                    .ok_or(DomainError::SignInMethodNotFound(*method_id))?;
                self.sign_in_methods.remove(index);
            }
        }
        Ok(())
    }

    fn read_model(&self, meta: &AggregateMeta) -> OrganisationReadModel {
        OrganisationReadModel {
            aggregate_id: meta.aggregate_id,
            tenant: meta.tenant.clone(),
            name: self.name.clone(),
            alias: self.alias.clone(),
            active: self.active,
            deleted: self.deleted,
            is_default: self.is_default,
            sign_in_methods: self.sign_in_methods.clone(),
            version: meta.version,
            created_at: meta.created_at,
            last_modified_at: meta.last_modified_at,
        }
    }
}

pub fn ensure_name(name: &str) -> Result<String, DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::EmptyName);
    }
    Ok(trimmed.to_string())
}

pub fn ensure_alias(alias: &str) -> Result<String, DomainError> {
    let trimmed = alias.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(DomainError::InvalidAlias(alias.to_string()));
    }
    Ok(trimmed.to_string())
}

impl EventSourced<Organisation> {
    pub fn initialize(
        tenant: TenantId,
        id: Uuid,
        name: &str,
        alias: &str,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = ensure_name(name)?;
        let alias = ensure_alias(alias)?;
        let mut aggregate = Self::open(tenant, id);
        aggregate.record(
            OrganisationEvent::Initialized { name, alias },
            performing_user_id,
            at,
        )?;
        Ok(aggregate)
    }

    pub fn rename(
        &mut self,
        name: &str,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let name = ensure_name(name)?;
        self.record(OrganisationEvent::NameChanged { name }, performing_user_id, at)
    }

    pub fn set_alias(
        &mut self,
        alias: &str,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let alias = ensure_alias(alias)?;
        self.record(
            OrganisationEvent::AliasChanged { alias },
            performing_user_id,
            at,
        )
    }

    pub fn activate(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(OrganisationEvent::Activated, performing_user_id, at)
    }

    pub fn disable(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(OrganisationEvent::Disabled, performing_user_id, at)
    }

    pub fn delete(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(OrganisationEvent::Deleted, performing_user_id, at)
    }

    pub fn set_default(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(OrganisationEvent::DefaultSet, performing_user_id, at)
    }

    pub fn unset_default(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(OrganisationEvent::DefaultUnset, performing_user_id, at)
    }

    pub fn add_sign_in_method(
        &mut self,
        method_id: Uuid,
        kind: SignInMethodKind,
        name: &str,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let name = ensure_name(name)?;
        self.record(
            OrganisationEvent::SignInMethodAdded {
                method_id,
                kind,
                name,
            },
            performing_user_id,
            at,
        )
    }

    pub fn disable_sign_in_method(
        &mut self,
        method_id: Uuid,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(
            OrganisationEvent::SignInMethodDisabled { method_id },
            performing_user_id,
            at,
        )
    }

    pub fn enable_sign_in_method(
        &mut self,
        method_id: Uuid,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(
            OrganisationEvent::SignInMethodEnabled { method_id },
            performing_user_id,
            at,
        )
    }

    pub fn remove_sign_in_method(
        &mut self,
        method_id: Uuid,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(
            OrganisationEvent::SignInMethodRemoved { method_id },
            performing_user_id,
            at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("carina-mutual").expect("tenant")
    }

    fn organisation() -> EventSourced<Organisation> {
        EventSourced::initialize(
            tenant(),
            Uuid::new_v4(),
            "Carina Mutual",
            "carina-mutual",
            None,
            Utc::now(),
        )
        .expect("initialize")
    }

    #[test]
    fn initialize_sets_name_alias_and_activates() {
        let org = organisation();
        assert_eq!(org.state().name, "Carina Mutual");
        assert_eq!(org.state().alias, "carina-mutual");
        assert!(org.state().active);
        assert_eq!(org.version(), 1);
        assert_eq!(org.pending().len(), 1);
    }

    #[test]
    fn duplicate_default_flag_is_a_domain_error() {
        let mut org = organisation();
        org.set_default(None, Utc::now()).expect("first default");
        let err = org.set_default(None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::OrganisationAlreadyDefault));
        assert_eq!(err.code(), "organisation.default.duplicate");
    }

    #[test]
    fn removing_unknown_sign_in_method_is_a_domain_error() {
        let mut org = organisation();
        let missing = Uuid::new_v4();
        let err = org
            .remove_sign_in_method(missing, None, Utc::now())
            .unwrap_err();
        assert_eq!(err, DomainError::SignInMethodNotFound(missing));
    }

    #[test]
    fn sign_in_method_lifecycle() {
        let mut org = organisation();
        let method = Uuid::new_v4();
        org.add_sign_in_method(method, SignInMethodKind::Saml, "Corporate SSO", None, Utc::now())
            .expect("add");
        let err = org
            .add_sign_in_method(method, SignInMethodKind::Saml, "Again", None, Utc::now())
            .unwrap_err();
        assert_eq!(err, DomainError::SignInMethodExists(method));

        org.disable_sign_in_method(method, None, Utc::now())
            .expect("disable");
        assert!(org.state().sign_in_methods[0].disabled);
        org.enable_sign_in_method(method, None, Utc::now())
            .expect("enable");
        assert!(!org.state().sign_in_methods[0].disabled);
        org.remove_sign_in_method(method, None, Utc::now())
            .expect("remove");
        assert!(org.state().sign_in_methods.is_empty());
    }

    #[test]
    fn deleted_organisation_accepts_no_further_changes() {
        let mut org = organisation();
        org.delete(None, Utc::now()).expect("delete");
        let err = org.rename("New Name", None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::OrganisationDeleted));
    }

    #[test]
    fn alias_validation_rejects_uppercase() {
        let err = ensure_alias("Carina").unwrap_err();
        assert!(matches!(err, DomainError::InvalidAlias(_)));
    }

    #[test]
    fn read_model_mirrors_projected_state() {
        let mut org = organisation();
        org.set_default(None, Utc::now()).expect("default");
        let row = org.read_model();
        assert_eq!(row.name, "Carina Mutual");
        assert!(row.is_default);
        assert_eq!(row.version, 2);
    }
}
