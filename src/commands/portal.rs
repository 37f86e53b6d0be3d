use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use uuid::Uuid;

use coverbase::{
    aggregate::EventSourced,
    portal::{Portal, PortalKind},
};

use super::{open_platform, parse_uuid, print_json, tenant};

#[derive(Subcommand)]
pub enum PortalCommands {
    /// Create a portal for an organisation
    Create(PortalCreateArgs),
    /// Change a portal's name and title
    Rename(PortalRenameArgs),
    /// Update a portal's production/development URLs
    SetUrls(PortalUrlArgs),
    /// Enable a disabled portal
    Enable(PortalIdentityArgs),
    /// Disable a portal
    Disable(PortalIdentityArgs),
    /// Mark a portal as the default of its kind
    SetDefault(PortalIdentityArgs),
    /// Clear a portal's default flag
    UnsetDefault(PortalIdentityArgs),
    /// Soft-delete a portal
    Delete(PortalIdentityArgs),
    /// Show a portal's projected read model
    Get(PortalIdentityArgs),
    /// List the tenancy's portals
    List(PortalListArgs),
}

#[derive(Args)]
pub struct PortalCreateArgs {
    pub tenant: String,
    /// Owning organisation id
    pub organisation_id: String,
    pub name: String,
    pub alias: String,
    pub title: String,
    /// One of: agent, customer
    pub kind: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct PortalIdentityArgs {
    pub tenant: String,
    pub portal_id: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct PortalRenameArgs {
    pub tenant: String,
    pub portal_id: String,
    pub name: String,
    pub title: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct PortalUrlArgs {
    pub tenant: String,
    pub portal_id: String,
    #[arg(long)]
    pub production_url: Option<String>,
    #[arg(long)]
    pub development_url: Option<String>,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct PortalListArgs {
    pub tenant: String,
}

pub fn run(command: PortalCommands, config_path: Option<&Path>) -> Result<()> {
    let platform = open_platform(config_path)?;
    let repository = &platform.repository;

    match command {
        PortalCommands::Create(args) => {
            let tenant = tenant(&args.tenant)?;
            let organisation_id = parse_uuid(&args.organisation_id)?;
            let kind = parse_kind(&args.kind)?;
            let id = Uuid::new_v4();
            let mut portal = EventSourced::<Portal>::initialize(
                tenant,
                id,
                organisation_id,
                &args.name,
                &args.alias,
                &args.title,
                kind,
                args.user,
                Utc::now(),
            )?;
            repository.save(&mut portal)?;
            print_json(&portal.read_model())
        }
        PortalCommands::Rename(args) => mutate(repository, &args.tenant, &args.portal_id, |portal| {
            Ok(portal.rename(&args.name, &args.title, args.user, Utc::now())?)
        }),
        PortalCommands::SetUrls(args) => mutate(repository, &args.tenant, &args.portal_id, |portal| {
            Ok(portal.set_urls(
                args.production_url.clone(),
                args.development_url.clone(),
                args.user,
                Utc::now(),
            )?)
        }),
        PortalCommands::Enable(args) => mutate(repository, &args.tenant, &args.portal_id, |portal| {
            Ok(portal.enable(args.user, Utc::now())?)
        }),
        PortalCommands::Disable(args) => mutate(repository, &args.tenant, &args.portal_id, |portal| {
            Ok(portal.disable(args.user, Utc::now())?)
        }),
        PortalCommands::SetDefault(args) => mutate(repository, &args.tenant, &args.portal_id, |portal| {
            Ok(portal.set_default(args.user, Utc::now())?)
        }),
        PortalCommands::UnsetDefault(args) => mutate(repository, &args.tenant, &args.portal_id, |portal| {
            Ok(portal.unset_default(args.user, Utc::now())?)
        }),
        PortalCommands::Delete(args) => mutate(repository, &args.tenant, &args.portal_id, |portal| {
            Ok(portal.delete(args.user, Utc::now())?)
        }),
        PortalCommands::Get(args) => {
            let tenant = tenant(&args.tenant)?;
            let id = parse_uuid(&args.portal_id)?;
            match repository.read_model_row::<Portal>(&tenant, id)? {
                Some(row) => print_json(&row),
                None => bail!("portal {id} not found in tenancy {tenant}"),
            }
        }
        PortalCommands::List(args) => {
            let tenant = tenant(&args.tenant)?;
            let rows = repository.list_read_models::<Portal>(&tenant)?;
            print_json(&rows)
        }
    }
}

fn mutate<F>(
    repository: &coverbase::repository::AggregateRepository,
    tenant_raw: &str,
    id_raw: &str,
    apply: F,
) -> Result<()>
where
    F: FnOnce(&mut EventSourced<Portal>) -> Result<()>,
{
    let tenant = tenant(tenant_raw)?;
    let id = parse_uuid(id_raw)?;
    let mut portal = repository.get::<Portal>(&tenant, id)?;
    apply(&mut portal)?;
    repository.save(&mut portal)?;
    print_json(&portal.read_model())
}

fn parse_kind(raw: &str) -> Result<PortalKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "agent" => Ok(PortalKind::Agent),
        "customer" => Ok(PortalKind::Customer),
        other => bail!("unknown portal kind '{other}' (expected agent or customer)"),
    }
}
