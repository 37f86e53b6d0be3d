use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use uuid::Uuid;

use coverbase::{
    aggregate::EventSourced,
    organisation::{Organisation, SignInMethodKind},
};

use super::{open_platform, parse_uuid, print_json, tenant};

#[derive(Subcommand)]
pub enum OrganisationCommands {
    /// Create an organisation within a tenancy
    Create(OrganisationCreateArgs),
    /// Change an organisation's display name
    Rename(OrganisationRenameArgs),
    /// Change an organisation's alias
    SetAlias(OrganisationAliasArgs),
    /// Re-activate a disabled organisation
    Activate(OrganisationIdentityArgs),
    /// Disable an organisation
    Disable(OrganisationIdentityArgs),
    /// Soft-delete an organisation
    Delete(OrganisationIdentityArgs),
    /// Mark an organisation as its tenancy's default
    SetDefault(OrganisationIdentityArgs),
    /// Clear an organisation's default flag
    UnsetDefault(OrganisationIdentityArgs),
    /// Attach a sign-in method
    AddSignInMethod(SignInMethodAddArgs),
    /// Disable an existing sign-in method
    DisableSignInMethod(SignInMethodArgs),
    /// Re-enable a disabled sign-in method
    EnableSignInMethod(SignInMethodArgs),
    /// Remove a sign-in method entirely
    RemoveSignInMethod(SignInMethodArgs),
    /// Show an organisation's projected read model
    Get(OrganisationIdentityArgs),
    /// List the tenancy's organisations
    List(OrganisationListArgs),
    /// Show an organisation's event history
    Events(OrganisationIdentityArgs),
}

#[derive(Args)]
pub struct OrganisationCreateArgs {
    /// Tenant the organisation belongs to
    pub tenant: String,
    /// Display name
    pub name: String,
    /// URL-safe alias
    pub alias: String,
    /// Acting user id recorded on the event
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct OrganisationIdentityArgs {
    pub tenant: String,
    pub organisation_id: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct OrganisationRenameArgs {
    pub tenant: String,
    pub organisation_id: String,
    pub name: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct OrganisationAliasArgs {
    pub tenant: String,
    pub organisation_id: String,
    pub alias: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct OrganisationListArgs {
    pub tenant: String,
}

#[derive(Args)]
pub struct SignInMethodAddArgs {
    pub tenant: String,
    pub organisation_id: String,
    /// One of: local, saml, oidc
    pub kind: String,
    /// Display name for the method
    pub name: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

#[derive(Args)]
pub struct SignInMethodArgs {
    pub tenant: String,
    pub organisation_id: String,
    pub method_id: String,
    #[arg(long)]
    pub user: Option<Uuid>,
}

pub fn run(command: OrganisationCommands, config_path: Option<&Path>) -> Result<()> {
    let platform = open_platform(config_path)?;
    let repository = &platform.repository;

    match command {
        OrganisationCommands::Create(args) => {
            let tenant = tenant(&args.tenant)?;
            let id = Uuid::new_v4();
            let mut organisation = EventSourced::<Organisation>::initialize(
                tenant,
                id,
                &args.name,
                &args.alias,
                args.user,
                Utc::now(),
            )?;
            repository.save(&mut organisation)?;
            print_json(&organisation.read_model())
        }
        OrganisationCommands::Rename(args) => mutate(repository, &args.tenant, &args.organisation_id, |org| {
            Ok(org.rename(&args.name, args.user, Utc::now())?)
        }),
        OrganisationCommands::SetAlias(args) => mutate(repository, &args.tenant, &args.organisation_id, |org| {
            Ok(org.set_alias(&args.alias, args.user, Utc::now())?)
        }),
        OrganisationCommands::Activate(args) => mutate(repository, &args.tenant, &args.organisation_id, |org| {
            Ok(org.activate(args.user, Utc::now())?)
        }),
        OrganisationCommands::Disable(args) => mutate(repository, &args.tenant, &args.organisation_id, |org| {
            Ok(org.disable(args.user, Utc::now())?)
        }),
        OrganisationCommands::Delete(args) => mutate(repository, &args.tenant, &args.organisation_id, |org| {
            Ok(org.delete(args.user, Utc::now())?)
        }),
        OrganisationCommands::SetDefault(args) => mutate(repository, &args.tenant, &args.organisation_id, |org| {
            Ok(org.set_default(args.user, Utc::now())?)
        }),
        OrganisationCommands::UnsetDefault(args) => mutate(repository, &args.tenant, &args.organisation_id, |org| {
            Ok(org.unset_default(args.user, Utc::now())?)
        }),
        OrganisationCommands::AddSignInMethod(args) => {
            let kind = parse_sign_in_kind(&args.kind)?;
            let method_id = Uuid::new_v4();
            mutate(repository, &args.tenant, &args.organisation_id, |org| {
                Ok(org.add_sign_in_method(method_id, kind, &args.name, args.user, Utc::now())?)
            })
        }
        OrganisationCommands::DisableSignInMethod(args) => {
            let method_id = parse_uuid(&args.method_id)?;
            mutate(repository, &args.tenant, &args.organisation_id, |org| {
                Ok(org.disable_sign_in_method(method_id, args.user, Utc::now())?)
            })
        }
        OrganisationCommands::EnableSignInMethod(args) => {
            let method_id = parse_uuid(&args.method_id)?;
            mutate(repository, &args.tenant, &args.organisation_id, |org| {
                Ok(org.enable_sign_in_method(method_id, args.user, Utc::now())?)
            })
        }
        OrganisationCommands::RemoveSignInMethod(args) => {
            let method_id = parse_uuid(&args.method_id)?;
            mutate(repository, &args.tenant, &args.organisation_id, |org| {
                Ok(org.remove_sign_in_method(method_id, args.user, Utc::now())?)
            })
        }
        OrganisationCommands::Get(args) => {
            let tenant = tenant(&args.tenant)?;
            let id = parse_uuid(&args.organisation_id)?;
            match repository.read_model_row::<Organisation>(&tenant, id)? {
                Some(row) => print_json(&row),
                None => bail!("organisation {id} not found in tenancy {tenant}"),
            }
        }
        OrganisationCommands::List(args) => {
            let tenant = tenant(&args.tenant)?;
            let rows = repository.list_read_models::<Organisation>(&tenant)?;
            print_json(&rows)
        }
        OrganisationCommands::Events(args) => {
            let tenant = tenant(&args.tenant)?;
            let id = parse_uuid(&args.organisation_id)?;
            let events = repository.events::<Organisation>(&tenant, id)?;
            print_json(&events)
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
    F: FnOnce(&mut EventSourced<Organisation>) -> Result<()>,
{
    let tenant = tenant(tenant_raw)?;
    let id = parse_uuid(id_raw)?;
    let mut organisation = repository.get::<Organisation>(&tenant, id)?;
    apply(&mut organisation)?;
    repository.save(&mut organisation)?;
    print_json(&organisation.read_model())
}

fn parse_sign_in_kind(raw: &str) -> Result<SignInMethodKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "local" | "local_account" => Ok(SignInMethodKind::LocalAccount),
        "saml" => Ok(SignInMethodKind::Saml),
        "oidc" | "open_id_connect" => Ok(SignInMethodKind::OpenIdConnect),
        other => bail!("unknown sign-in method kind '{other}' (expected local, saml, or oidc)"),
    }
}
