use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, AggregateMeta, EventSourced, TenantId},
    error::DomainError,
    organisation::{ensure_alias, ensure_name},
};

/// Entity classes an additional property definition can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyEntityType {
    Quote,
    Policy,
    Claim,
    Customer,
    Organisation,
    Portal,
    Invoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValueType {
    Text,
    StructuredData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDetails {
    pub name: String,
    pub alias: String,
    pub is_required: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
    /// JSON schema for structured properties; absent for text properties.
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyEvent {
    Initialized {
        entity_type: PropertyEntityType,
        value_type: PropertyValueType,
        details: PropertyDetails,
    },
    DetailsUpdated { details: PropertyDetails },
    Deleted,
}

/// AdditionalPropertyDefinition aggregate: a tenant-defined extra field that
/// attaches to quotes, policies, customers, and the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalPropertyDefinition {
    pub entity_type: Option<PropertyEntityType>,
    pub value_type: Option<PropertyValueType>,
    pub details: Option<PropertyDetails>,
    pub deleted: bool,
}

impl AdditionalPropertyDefinition {
    fn guard_not_deleted(&self) -> Result<(), DomainError> {
        if self.deleted {
            return Err(DomainError::PropertyDeleted);
        }
        Ok(())
    }

    fn validate_details(
        value_type: PropertyValueType,
        details: &PropertyDetails,
    ) -> Result<(), DomainError> {
        if details.is_unique && details.default_value.as_deref().is_some_and(|v| !v.is_empty()) {
            return Err(DomainError::UniquePropertyWithDefault);
        }
        let has_schema = details.schema.is_some();
        match value_type {
            PropertyValueType::StructuredData if !has_schema => {
                Err(DomainError::PropertySchemaMismatch)
            }
            PropertyValueType::Text if has_schema => Err(DomainError::PropertySchemaMismatch),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyReadModel {
    pub aggregate_id: Uuid,
    pub tenant: TenantId,
    pub entity_type: Option<PropertyEntityType>,
    pub value_type: Option<PropertyValueType>,
    pub name: String,
    pub alias: String,
    pub is_required: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
    pub schema: Option<Value>,
    pub deleted: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl Aggregate for AdditionalPropertyDefinition {
    const KIND: &'static str = "additional_property_definition";

    type Event = PropertyEvent;
    type ReadModel = PropertyReadModel;

    fn apply(&mut self, event: &PropertyEvent) -> Result<(), DomainError> {
        match event {
            PropertyEvent::Initialized {
                entity_type,
                value_type,
                details,
            } => {
                Self::validate_details(*value_type, details)?;
                self.entity_type = Some(*entity_type);
                self.value_type = Some(*value_type);
                self.details = Some(details.clone());
            }
            PropertyEvent::DetailsUpdated { details } => {
                self.guard_not_deleted()?;
                let value_type = self
                    .value_type
                    .unwrap_or(PropertyValueType::Text);
                Self::validate_details(value_type, details)?;
                self.details = Some(details.clone());
            }
            PropertyEvent::Deleted => {
                self.guard_not_deleted()?;
                self.deleted = true;
            }
        }
        Ok(())
    }

    fn read_model(&self, meta: &AggregateMeta) -> PropertyReadModel {
        let details = self.details.clone().unwrap_or(PropertyDetails {
            name: String::new(),
            alias: String::new(),
            is_required: false,
            is_unique: false,
            default_value: None,
            schema: None,
        });
        PropertyReadModel {
            aggregate_id: meta.aggregate_id,
            tenant: meta.tenant.clone(),
            entity_type: self.entity_type,
            value_type: self.value_type,
            name: details.name,
            alias: details.alias,
            is_required: details.is_required,
            is_unique: details.is_unique,
            default_value: details.default_value,
            schema: details.schema,
            deleted: self.deleted,
            version: meta.version,
            created_at: meta.created_at,
            last_modified_at: meta.last_modified_at,
        }
    }
}

impl EventSourced<AdditionalPropertyDefinition> {
    pub fn initialize(
        tenant: TenantId,
        id: Uuid,
        entity_type: PropertyEntityType,
        value_type: PropertyValueType,
        details: PropertyDetails,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let details = normalize_details(details)?;
        let mut aggregate = Self::open(tenant, id);
        aggregate.record(
            PropertyEvent::Initialized {
                entity_type,
                value_type,
                details,
            },
            performing_user_id,
            at,
        )?;
        Ok(aggregate)
    }

    pub fn update_details(
        &mut self,
        details: PropertyDetails,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let details = normalize_details(details)?;
        self.record(
            PropertyEvent::DetailsUpdated { details },
            performing_user_id,
            at,
        )
    }

    pub fn delete(
        &mut self,
        performing_user_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record(PropertyEvent::Deleted, performing_user_id, at)
    }
}

fn normalize_details(mut details: PropertyDetails) -> Result<PropertyDetails, DomainError> {
    details.name = ensure_name(&details.name)?;
    details.alias = ensure_alias(&details.alias)?;
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_details() -> PropertyDetails {
        PropertyDetails {
            name: "Policy Reference".into(),
            alias: "policy-reference".into(),
            is_required: true,
            is_unique: false,
            default_value: Some("unassigned".into()),
            schema: None,
        }
    }

    fn definition() -> EventSourced<AdditionalPropertyDefinition> {
        EventSourced::initialize(
            TenantId::new("carina-mutual").expect("tenant"),
            Uuid::new_v4(),
            PropertyEntityType::Policy,
            PropertyValueType::Text,
            text_details(),
            None,
            Utc::now(),
        )
        .expect("initialize")
    }

    #[test]
    fn initialize_projects_details() {
        let definition = definition();
        let state = definition.state();
        assert_eq!(state.entity_type, Some(PropertyEntityType::Policy));
        assert_eq!(
            state.details.as_ref().map(|d| d.name.as_str()),
            Some("Policy Reference")
        );
    }

    #[test]
    fn unique_property_cannot_carry_a_default() {
        let mut details = text_details();
        details.is_unique = true;
        let err = EventSourced::<AdditionalPropertyDefinition>::initialize(
            TenantId::new("t").expect("tenant"),
            Uuid::new_v4(),
            PropertyEntityType::Quote,
            PropertyValueType::Text,
            details,
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::UniquePropertyWithDefault));
    }

    #[test]
    fn structured_property_requires_a_schema() {
        let mut details = text_details();
        details.default_value = None;
        let err = EventSourced::<AdditionalPropertyDefinition>::initialize(
            TenantId::new("t").expect("tenant"),
            Uuid::new_v4(),
            PropertyEntityType::Quote,
            PropertyValueType::StructuredData,
            details,
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::PropertySchemaMismatch));
    }

    #[test]
    fn structured_property_with_schema_is_accepted() {
        let mut details = text_details();
        details.default_value = None;
        details.schema = Some(json!({ "type": "object" }));
        let definition = EventSourced::<AdditionalPropertyDefinition>::initialize(
            TenantId::new("t").expect("tenant"),
            Uuid::new_v4(),
            PropertyEntityType::Customer,
            PropertyValueType::StructuredData,
            details,
            None,
            Utc::now(),
        )
        .expect("initialize");
        assert!(definition.state().details.as_ref().unwrap().schema.is_some());
    }

    #[test]
    fn double_delete_is_a_domain_error() {
        let mut definition = definition();
        definition.delete(None, Utc::now()).expect("delete");
        let err = definition.delete(None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::PropertyDeleted));
    }

    #[test]
    fn update_after_delete_is_rejected() {
        let mut definition = definition();
        definition.delete(None, Utc::now()).expect("delete");
        let err = definition
            .update_details(text_details(), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::PropertyDeleted));
    }
}
