use std::{env, fmt::Display, str::FromStr};

use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use log::LevelFilter;
use tally_core::LedgerConfig;

/// Everything the binary needs to know, read from the environment
#[derive(Debug)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub ledger: LedgerConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("TALLY_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or_else(|| anyhow!("TALLY_DATABASE_URL must be set"))?;

        let defaults = LedgerConfig::default();
        let offset_hours: i32 = parse_or(&lookup, "TALLY_UTC_OFFSET_HOURS", 0)?;

        let utc_offset = offset_hours
            .checked_mul(60 * 60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                anyhow!(
                    "TALLY_UTC_OFFSET_HOURS must be between -23 and 23, got {}",
                    offset_hours
                )
            })?;

        let ledger = LedgerConfig {
            utc_offset,
            streak_lookback_days: parse_or(
                &lookup,
                "TALLY_STREAK_LOOKBACK_DAYS",
                defaults.streak_lookback_days,
            )?,
            ..defaults
        };

        Ok(Self {
            database_url,
            max_connections: parse_or(&lookup, "TALLY_MAX_CONNECTIONS", 5)?,
            ledger,
        })
    }
}

/// Reads the log level separately, so the logger exists before anything else can fail
pub fn log_level() -> LevelFilter {
    env::var("TALLY_LOG_LEVEL")
        .ok()
        .and_then(|x| x.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} is invalid: {}", name, e)),
        None => Ok(default),
    }
}
