use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use uuid::Uuid;

use coverbase::{
    aggregate::EventSourced,
    properties::{
        AdditionalPropertyDefinition, PropertyDetails, PropertyEntityType, PropertyValueType,
    },
};

use super::{open_platform, parse_uuid, print_json, tenant};

#[derive(Subcommand)]
pub enum PropertyCommands {
    /// Define an additional property for an entity type
    Create(PropertyCreateArgs),
    /// Update a property definition's details
    Update(PropertyUpdateArgs),
    /// Soft-delete a property definition
    Delete(PropertyIdentityArgs),
    /// Show a property definition's projected read model
    Get(PropertyIdentityArgs),
    /// List the tenancy's property definitions
    List(PropertyListArgs),
}

#[derive(Args)]
pub struct PropertyCreateArgs {
    pub tenant: String,
    /// Entity the property attaches to: quote, policy, claim, customer,
    /// organisation, portal, or invoice
    pub entity_type: String,
    /// Value type: text or structured
    pub value_type: String,
    pub name: String,
    pub alias: String,
    #[arg(long)]
    pub required: bool,
    #[arg(long)]
    pub unique: bool,
    #[arg(long)]
    pub default_value: Option<String>,
    /// JSON schema document (structured properties only)
    #[arg(long)]
    pub schema: Option<String>,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct PropertyUpdateArgs {
    pub tenant: String,
    pub property_id: String,
    pub name: String,
    pub alias: String,
    #[arg(long)]
    pub required: bool,
    #[arg(long)]
    pub unique: bool,
    #[arg(long)]
    pub default_value: Option<String>,
    #[arg(long)]
    pub schema: Option<String>,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct PropertyIdentityArgs {
    pub tenant: String,
    pub property_id: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct PropertyListArgs {
    pub tenant: String,
}

pub fn run(command: PropertyCommands, config_path: Option<&Path>) -> Result<()> {
    let platform = open_platform(config_path)?;
    let repository = &platform.repository;

    match command {
        PropertyCommands::Create(args) => {
            let tenant = tenant(&args.tenant)?;
            let entity_type = parse_entity_type(&args.entity_type)?;
            let value_type = parse_value_type(&args.value_type)?;
            let details = build_details(
                &args.name,
                &args.alias,
                args.required,
                args.unique,
                args.default_value.clone(),
                args.schema.as_deref(),
            )?;
            let id = Uuid::new_v4();
            let mut definition = EventSourced::<AdditionalPropertyDefinition>::initialize(
                tenant,
                id,
                entity_type,
                value_type,
                details,
                args.user,
                Utc::now(),
            )?;
            repository.save(&mut definition)?;
            print_json(&definition.read_model())
        }
        PropertyCommands::Update(args) => {
            let tenant = tenant(&args.tenant)?;
            let id = parse_uuid(&args.property_id)?;
            let details = build_details(
                &args.name,
                &args.alias,
                args.required,
                args.unique,
                args.default_value.clone(),
                args.schema.as_deref(),
            )?;
            let mut definition = repository.get::<AdditionalPropertyDefinition>(&tenant, id)?;
            definition.update_details(details, args.user, Utc::now())?;
            repository.save(&mut definition)?;
            print_json(&definition.read_model())
        }
        PropertyCommands::Delete(args) => {
            let tenant = tenant(&args.tenant)?;
            let id = parse_uuid(&args.property_id)?;
            let mut definition = repository.get::<AdditionalPropertyDefinition>(&tenant, id)?;
            definition.delete(args.user, Utc::now())?;
            repository.save(&mut definition)?;
            print_json(&definition.read_model())
        }
        PropertyCommands::Get(args) => {
            let tenant = tenant(&args.tenant)?;
            let id = parse_uuid(&args.property_id)?;
            match repository.read_model_row::<AdditionalPropertyDefinition>(&tenant, id)? {
                Some(row) => print_json(&row),
                None => bail!("property definition {id} not found in tenancy {tenant}"),
            }
        }
        PropertyCommands::List(args) => {
            let tenant = tenant(&args.tenant)?;
            let rows = repository.list_read_models::<AdditionalPropertyDefinition>(&tenant)?;
            print_json(&rows)
        }
    }
}

fn build_details(
    name: &str,
    alias: &str,
    required: bool,
    unique: bool,
    default_value: Option<String>,
    schema: Option<&str>,
) -> Result<PropertyDetails> {
    let schema = match schema {
        Some(raw) => Some(serde_json::from_str(raw)?),
        None => None,
    };
    Ok(PropertyDetails {
        name: name.to_string(),
        alias: alias.to_string(),
        is_required: required,
        is_unique: unique,
        default_value,
        schema,
    })
}

fn parse_entity_type(raw: &str) -> Result<PropertyEntityType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "quote" => Ok(PropertyEntityType::Quote),
        "policy" => Ok(PropertyEntityType::Policy),
        "claim" => Ok(PropertyEntityType::Claim),
        "customer" => Ok(PropertyEntityType::Customer),
        "organisation" => Ok(PropertyEntityType::Organisation),
        "portal" => Ok(PropertyEntityType::Portal),
        "invoice" => Ok(PropertyEntityType::Invoice),
        other => bail!("unknown entity type '{other}'"),
    }
}

fn parse_value_type(raw: &str) -> Result<PropertyValueType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" => Ok(PropertyValueType::Text),
        "structured" | "structured_data" => Ok(PropertyValueType::StructuredData),
        other => bail!("unknown value type '{other}' (expected text or structured)"),
    }
}
