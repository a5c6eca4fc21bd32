use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const ORDERING_ENV: &str = "VETCLINIC_ORDERING";
pub const DATA_DIR_ENV: &str = "VETCLINIC_DATA_DIR";
pub const PAGE_SIZE_ENV: &str = "VETCLINIC_PAGE_SIZE";

pub const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 500;

const APP_DIR: &str = "vetclinic";
const DB_FILE: &str = "vetclinic.sqlite3";
const ACTIVE_FILE: &str = "active_household.json";

/// How mutations that target the same entity key relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOrdering {
    /// Mutations run independently; the one that settles last wins.
    #[default]
    Concurrent,
    /// A mutation waits until earlier mutations on the same key have settled.
    PerKeySerial,
}

impl MutationOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOrdering::Concurrent => "concurrent",
            MutationOrdering::PerKeySerial => "per_key_serial",
        }
    }
}

impl fmt::Display for MutationOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "concurrent" => Ok(MutationOrdering::Concurrent),
            "per_key_serial" | "serial" => Ok(MutationOrdering::PerKeySerial),
            other => Err(format!("unknown mutation ordering: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ordering: MutationOrdering,
    pub data_dir: PathBuf,
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ordering: MutationOrdering::default(),
            data_dir: default_data_dir(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let ordering = env::var(ORDERING_ENV)
            .ok()
            .and_then(|value| value.parse::<MutationOrdering>().ok())
            .unwrap_or_default();

        let data_dir = env::var(DATA_DIR_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let page_size = env::var(PAGE_SIZE_ENV)
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Self {
            ordering,
            data_dir,
            page_size,
        }
    }

    pub fn with_ordering(mut self, ordering: MutationOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn active_household_path(&self) -> PathBuf {
        self.data_dir.join(ACTIVE_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_parses_common_spellings() {
        assert_eq!("concurrent".parse(), Ok(MutationOrdering::Concurrent));
        assert_eq!("per-key-serial".parse(), Ok(MutationOrdering::PerKeySerial));
        assert_eq!(" SERIAL ".parse(), Ok(MutationOrdering::PerKeySerial));
        assert!("fifo".parse::<MutationOrdering>().is_err());
    }

    #[test]
    fn paths_live_under_data_dir() {
        let config = ClientConfig {
            data_dir: PathBuf::from("/tmp/clinic"),
            ..ClientConfig::default()
        };
        assert_eq!(config.db_path(), PathBuf::from("/tmp/clinic/vetclinic.sqlite3"));
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/clinic/logs"));
        assert_eq!(config.ordering, MutationOrdering::Concurrent);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }
}
