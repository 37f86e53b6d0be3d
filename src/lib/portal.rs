use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, AggregateMeta, EventSourced, TenantId},
    error::DomainError,
    organisation::{ensure_alias, ensure_name},
};

/// Which audience a portal serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalKind {
    Agent,
    Customer,
}

impl PortalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortalKind::Agent => "agent",
            PortalKind::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortalEvent {
    Initialized {
        organisation_id: Uuid,
        name: String,
        alias: String,
        title: String,
        kind: PortalKind,
    },
    Renamed { name: String, title: String },
    UrlsUpdated {
        production_url: Option<String>,
        development_url: Option<String>,
    },
    Enabled,
    Disabled,
    DefaultSet,
    DefaultUnset,
    Deleted,
}

/// Portal aggregate: a branded sign-in surface owned by an organisation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    pub organisation_id: Uuid,
    pub name: String,
    pub alias: String,
    pub title: String,
    pub kind: Option<PortalKind>,
    pub enabled: bool,
    pub deleted: bool,
    pub is_default: bool,
    pub production_url: Option<String>,
    pub development_url: Option<String>,
}

impl Portal {
    fn guard_not_deleted(&self) -> Result<(), DomainError> {
        if self.deleted {
            return Err(DomainError::PortalDeleted);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalReadModel {
    pub aggregate_id: Uuid,
    pub tenant: TenantId,
    pub organisation_id: Uuid,
    pub name: String,
    pub alias: String,
    pub title: String,
    pub kind: Option<PortalKind>,
    pub enabled: bool,
    pub deleted: bool,
    pub is_default: bool,
    pub production_url: Option<String>,
    pub development_url: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl Aggregate for Portal {
    const KIND: &'static str = "portal";

    type Event = PortalEvent;
    type ReadModel = PortalReadModel;

    fn apply(&mut self, event: &PortalEvent) -> Result<(), DomainError> {
        match event {
            PortalEvent::Initialized {
                organisation_id,
                name,
                alias,
                title,
                kind,
            } => {
                self.organisation_id = *organisation_id;
                self.name = name.clone();
                self.alias = alias.clone();
                self.title = title.clone();
                self.kind = Some(*kind);
                self.enabled = true;
            }
            PortalEvent::Renamed { name, title } => {
                self.guard_not_deleted()?;
                self.name = name.clone();
                self.title = title.clone();
            }
            PortalEvent::UrlsUpdated {
                production_url,
                development_url,
            } => {
                self.guard_not_deleted()?;
                self.production_url = production_url.clone();
                self.development_url = development_url.clone();
            }
            PortalEvent::Enabled => {
                self.guard_not_deleted()?;
                if self.enabled {
                    return Err(DomainError::PortalAlreadyEnabled);
                }
                self.enabled = true;
            }
            PortalEvent::Disabled => {
                self.guard_not_deleted()?;
                if !self.enabled {
                    return Err(DomainError::PortalAlreadyDisabled);
                }
                self.enabled = false;
                self.is_default = false;
            }
            PortalEvent::DefaultSet => {
                self.guard_not_deleted()?;
                if !self.enabled {
                    return Err(DomainError::DisabledPortalCannotBeDefault);
                }
                if self.is_default {
                    return Err(DomainError::PortalAlreadyDefault);
                }
                self.is_default = true;
            }
            PortalEvent::DefaultUnset => {
                self.guard_not_deleted()?;
                if !self.is_default {
                    return Err(DomainError::PortalNotDefault);
                }
                self.is_default = false;
            }
            PortalEvent::Deleted => {
                self.guard_not_deleted()?;
                self.deleted = true;
                self.enabled = false;
                self.is_default = false;
            }
        }
        Ok(())
    }

    fn read_model(&self, meta: &AggregateMeta) -> PortalReadModel {
        PortalReadModel {
            aggregate_id: meta.aggregate_id,
            tenant: meta.tenant.clone(),
            organisation_id: self.organisation_id,
            name: self.name.clone(),
            alias: self.alias.clone(),
            title: self.title.clone(),
            kind: self.kind,
            enabled: self.enabled,
            deleted: self.deleted,
            is_default: self.is_default,
            production_url: self.production_url.clone(),
            development_url: self.development_url.clone(),
            version: meta.version,
            created_at: meta.created_at,
            last_modified_at: meta.last_modified_at,
        }
    }
}

impl EventSourced<Portal> {
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        tenant: TenantId,
        id: Uuid,
        organisation_id: Uuid,
        name: &str,
        alias: &str,
        title: &str,
        kind: PortalKind,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = ensure_name(name)?;
        let alias = ensure_alias(alias)?;
        let title = ensure_name(title)?;
        let mut aggregate = Self::open(tenant, id);
        aggregate.record(
            PortalEvent::Initialized {
                organisation_id,
                name,
                alias,
                title,
                kind,
            },
            performing_user_id,
            at,
        )?;
        Ok(aggregate)
    }

    pub fn rename(
        &mut self,
        name: &str,
        title: &str,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let name = ensure_name(name)?;
        let title = ensure_name(title)?;
        self.record(PortalEvent::Renamed { name, title }, performing_user_id, at)
    }

    pub fn set_urls(
        &mut self,
        production_url: Option<String>,
        development_url: Option<String>,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(
            PortalEvent::UrlsUpdated {
                production_url,
                development_url,
            },
            performing_user_id,
            at,
        )
    }

    pub fn enable(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(PortalEvent::Enabled, performing_user_id, at)
    }

    pub fn disable(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(PortalEvent::Disabled, performing_user_id, at)
    }

    pub fn set_default(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(PortalEvent::DefaultSet, performing_user_id, at)
    }

    pub fn unset_default(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(PortalEvent::DefaultUnset, performing_user_id, at)
    }

    pub fn delete(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(PortalEvent::Deleted, performing_user_id, at)
    }
}
