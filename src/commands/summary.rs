use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::Value;

use coverbase::{
    organisation::Organisation,
    portal::Portal,
    properties::AdditionalPropertyDefinition,
    summary::{self, SamplePeriod, SummaryQuery, SummaryRow},
    timezone::TimeZoneRegistry,
};

use super::{open_platform, print_json, tenant};

#[derive(Args)]
pub struct SummaryArgs {
    /// Tenancy to summarise
    pub tenant: String,
    /// Aggregate kind to count: organisation, portal, or property
    pub kind: String,
    /// Bucket length: day, month, quarter, year, custom, or all
    pub period: String,
    /// Range start (RFC 3339)
    #[arg(long)]
    pub from: String,
    /// Range end (RFC 3339); omitted means "up to now"
    #[arg(long)]
    pub to: Option<String>,
    /// Window length in minutes for the custom period
    #[arg(long)]
    pub minutes: Option<u32>,
    /// Time zone name or configured alias; defaults from config
    #[arg(long)]
    pub timezone: Option<String>,
}

pub fn run(args: SummaryArgs, config_path: Option<&Path>) -> Result<()> {
    let platform = open_platform(config_path)?;
    let tenant = tenant(&args.tenant)?;

    let rows = match args.kind.trim().to_ascii_lowercase().as_str() {
        "organisation" => platform
            .repository
            .list_read_models::<Organisation>(&tenant)?,
        "portal" => platform.repository.list_read_models::<Portal>(&tenant)?,
        "property" => platform
            .repository
            .list_read_models::<AdditionalPropertyDefinition>(&tenant)?,
        other => bail!("unknown aggregate kind '{other}'"),
    };

    let records: Vec<SummaryRow> = rows
        .iter()
        .filter_map(row_to_record)
        .collect();

    let registry = TimeZoneRegistry::from_config(&platform.config.summary)?;
    let query = SummaryQuery {
        from: parse_instant(&args.from)?,
        to: args.to.as_deref().map(parse_instant).transpose()?,
        period: parse_period(&args.period, args.minutes)?,
        time_zone: registry.resolve(args.timezone.as_deref())?,
    };

    let summaries = summary::generate(&records, &query)?;
    print_json(&summaries)
}

fn row_to_record(row: &Value) -> Option<SummaryRow> {
    let created_at = row
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))?;
    let id = row
        .get("aggregate_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(SummaryRow {
        id,
        created_at,
        product_id: None,
    })
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim())
        .with_context(|| format!("invalid RFC 3339 timestamp '{raw}'"))?;
    Ok(parsed.with_timezone(&Utc))
}

fn parse_period(raw: &str, minutes: Option<u32>) -> Result<SamplePeriod> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "day" => Ok(SamplePeriod::Day),
        "month" => Ok(SamplePeriod::Month),
        "quarter" => Ok(SamplePeriod::Quarter),
        "year" => Ok(SamplePeriod::Year),
        "all" => Ok(SamplePeriod::All),
        "custom" => {
            let minutes =
                minutes.context("the custom period requires --minutes")?;
            Ok(SamplePeriod::Custom { minutes })
        }
        other => bail!("unknown period '{other}'"),
    }
}
