use std::{collections::HashMap, str::FromStr};

use chrono_tz::Tz;

use crate::{
    config::SummaryConfig,
    error::{CoverError, Result},
};

/// Resolves time zone names for summary queries.
///
/// Holds the alias table explicitly and is passed by reference wherever a
/// zone needs resolving, scoped to process lifetime by its owner.
#[derive(Debug, Clone)]
pub struct TimeZoneRegistry {
    aliases: HashMap<String, Tz>,
    default_zone: Tz,
}

impl TimeZoneRegistry {
    pub fn new(default_zone: Tz) -> Self {
        Self {
            aliases: HashMap::new(),
            default_zone,
        }
    }

    /// Builds a registry from the summary config: default zone plus the
    /// configured alias table. Unresolvable entries fail loudly rather than
    /// silently shadowing a valid IANA name.
    pub fn from_config(config: &SummaryConfig) -> Result<Self> {
        let default_zone = parse_iana(&config.default_time_zone)?;
        let mut registry = Self::new(default_zone);
        for (alias, target) in &config.time_zone_aliases {
            registry.register(alias, parse_iana(target)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, alias: &str, zone: Tz) {
        self.aliases.insert(alias.trim().to_string(), zone);
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    /// Resolves an alias or IANA name; `None` yields the default zone.
    pub fn resolve(&self, name: Option<&str>) -> Result<Tz> {
        let Some(name) = name else {
            return Ok(self.default_zone);
        };
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Ok(self.default_zone);
        }
        if let Some(zone) = self.aliases.get(trimmed) {
            return Ok(*zone);
        }
        parse_iana(trimmed)
    }
}

fn parse_iana(name: &str) -> Result<Tz> {
    Tz::from_str(name.trim()).map_err(|_| CoverError::UnknownTimeZone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_iana_names_directly() {
        let registry = TimeZoneRegistry::new(chrono_tz::Etc::UTC);
        let zone = registry.resolve(Some("Australia/Melbourne")).expect("zone");
        assert_eq!(zone, chrono_tz::Australia::Melbourne);
    }

    #[test]
    fn aliases_take_precedence() {
        let mut registry = TimeZoneRegistry::new(chrono_tz::Etc::UTC);
        registry.register("AET", chrono_tz::Australia::Melbourne);
        let zone = registry.resolve(Some("AET")).expect("zone");
        assert_eq!(zone, chrono_tz::Australia::Melbourne);
    }

    #[test]
    fn missing_name_falls_back_to_default() {
        let registry = TimeZoneRegistry::new(chrono_tz::Australia::Perth);
        assert_eq!(registry.resolve(None).expect("zone"), chrono_tz::Australia::Perth);
        assert_eq!(
            registry.resolve(Some("  ")).expect("zone"),
            chrono_tz::Australia::Perth
        );
    }

    #[test]
    fn unknown_names_error() {
        let registry = TimeZoneRegistry::new(chrono_tz::Etc::UTC);
        let err = registry.resolve(Some("Mars/Olympus")).unwrap_err();
        assert!(matches!(err, CoverError::UnknownTimeZone(_)));
    }

    #[test]
    fn config_seeds_the_alias_table() {
        let config = SummaryConfig::default();
        let registry = TimeZoneRegistry::from_config(&config).expect("registry");
        assert_eq!(
            registry.resolve(Some("AET")).expect("zone"),
            chrono_tz::Australia::Melbourne
        );
    }
}
