//! Configuration loading: parses a `syscheck.toml` file into a [`RawConfig`],
//! then validates and lowers it into the typed [`SyscheckConfig`] the
//! scheduler consumes. Mirrors the teacher's serde + toml parsing style from
//! its ward-file format, minus any on-disk persistence (the integrity
//! database itself is never written back).

use crate::model::{OptionMask, RootConfig};
use chrono::NaiveTime;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("no directories configured to check")]
    NoRoots,
    #[error("invalid restriction regex for root {path}: {source}")]
    InvalidRestriction { path: String, source: regex::Error },
    #[error("invalid ignore regex {pattern}: {source}")]
    InvalidIgnoreRegex { pattern: String, source: regex::Error },
    #[error("invalid scan_time {0:?}, expected HH:MM:SS")]
    InvalidScanTime(String),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    directories: Vec<RawDirectory>,
    #[serde(default)]
    ignore_literal: Vec<String>,
    #[serde(default)]
    ignore_regex: Vec<String>,
    #[serde(default)]
    prefilter_cmd: Option<String>,
    #[serde(default = "default_time_secs")]
    time_secs: u64,
    #[serde(default = "default_rootcheck_time_secs")]
    rootcheck_time_secs: u64,
    #[serde(default = "default_tsleep_millis")]
    tsleep_millis: u64,
    #[serde(default = "default_sleep_after")]
    sleep_after: u32,
    #[serde(default)]
    scan_on_start: bool,
    #[serde(default)]
    skip_nfs: bool,
    #[serde(default)]
    scan_time: Option<String>,
    #[serde(default)]
    scan_day: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDirectory {
    path: PathBuf,
    #[serde(default)]
    size: bool,
    #[serde(default)]
    perm: bool,
    #[serde(default)]
    owner: bool,
    #[serde(default)]
    group: bool,
    #[serde(default)]
    md5: bool,
    #[serde(default)]
    sha1: bool,
    #[serde(default)]
    see_changes: bool,
    #[serde(default)]
    realtime: bool,
    #[serde(default)]
    restriction: Option<String>,
}

fn default_time_secs() -> u64 {
    43_200
}
fn default_rootcheck_time_secs() -> u64 {
    43_200
}
fn default_tsleep_millis() -> u64 {
    1
}
fn default_sleep_after() -> u32 {
    100
}

/// Calendar-driven day-of-week trigger: one or more weekdays on which the
/// scheduler forces a scan regardless of the periodic interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayOfWeekMask(pub u8);

impl DayOfWeekMask {
    pub fn contains(&self, weekday: chrono::Weekday) -> bool {
        self.0 & (1 << weekday.num_days_from_monday()) != 0
    }

    fn parse(value: &str) -> Option<Self> {
        let mut mask = 0u8;
        for part in value.split(',') {
            let day = match part.trim().to_ascii_lowercase().as_str() {
                "mon" => chrono::Weekday::Mon,
                "tue" => chrono::Weekday::Tue,
                "wed" => chrono::Weekday::Wed,
                "thu" => chrono::Weekday::Thu,
                "fri" => chrono::Weekday::Fri,
                "sat" => chrono::Weekday::Sat,
                "sun" => chrono::Weekday::Sun,
                _ => return None,
            };
            mask |= 1 << day.num_days_from_monday();
        }
        Some(DayOfWeekMask(mask))
    }
}

pub struct SyscheckConfig {
    pub roots: Vec<RootConfig>,
    pub ignore_literal: Vec<String>,
    pub ignore_regex: Vec<Regex>,
    pub prefilter_cmd: Option<String>,
    pub time: Duration,
    pub rootcheck_time: Duration,
    pub tsleep: Duration,
    pub sleep_after: u32,
    pub scan_on_start: bool,
    pub skip_nfs: bool,
    pub scan_time: Option<NaiveTime>,
    pub scan_day: Option<DayOfWeekMask>,
}

pub fn load(path: &std::path::Path) -> Result<SyscheckConfig, ConfigError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let raw: RawConfig =
        toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    lower(raw)
}

fn lower(raw: RawConfig) -> Result<SyscheckConfig, ConfigError> {
    if raw.directories.is_empty() {
        return Err(ConfigError::NoRoots);
    }

    let mut roots = Vec::with_capacity(raw.directories.len());
    for dir in raw.directories {
        let restriction = dir
            .restriction
            .map(|pattern| {
                Regex::new(&pattern).map_err(|source| ConfigError::InvalidRestriction {
                    path: dir.path.display().to_string(),
                    source,
                })
            })
            .transpose()?;

        roots.push(RootConfig {
            path: dir.path,
            mask: OptionMask {
                size: dir.size,
                perm: dir.perm,
                owner: dir.owner,
                group: dir.group,
                md5: dir.md5,
                sha1: dir.sha1,
                see_changes: dir.see_changes,
                realtime: dir.realtime,
            },
            restriction,
        });
    }

    let ignore_regex = raw
        .ignore_regex
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidIgnoreRegex {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scan_time = raw
        .scan_time
        .map(|s| {
            NaiveTime::parse_from_str(&s, "%H:%M:%S").map_err(|_| ConfigError::InvalidScanTime(s))
        })
        .transpose()?;

    let scan_day = raw
        .scan_day
        .as_deref()
        .and_then(DayOfWeekMask::parse);

    Ok(SyscheckConfig {
        roots,
        ignore_literal: raw.ignore_literal,
        ignore_regex,
        prefilter_cmd: raw.prefilter_cmd,
        time: Duration::from_secs(raw.time_secs),
        rootcheck_time: Duration::from_secs(raw.rootcheck_time_secs),
        tsleep: Duration::from_millis(raw.tsleep_millis),
        sleep_after: raw.sleep_after,
        scan_on_start: raw.scan_on_start,
        skip_nfs: raw.skip_nfs,
        scan_time,
        scan_day,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let raw: RawConfig = toml::from_str(
            r#"
            [[directories]]
            path = "/etc"
            size = true
            md5 = true
            "#,
        )
        .unwrap();
        let config = lower(raw).unwrap();
        assert_eq!(config.roots.len(), 1);
        assert!(config.roots[0].mask.size);
        assert!(config.roots[0].mask.md5);
        assert!(!config.roots[0].mask.sha1);
        assert_eq!(config.sleep_after, 100);
    }

    #[test]
    fn no_directories_is_an_error() {
        let raw: RawConfig = toml::from_str("").unwrap();
        assert!(matches!(lower(raw), Err(ConfigError::NoRoots)));
    }

    #[test]
    fn invalid_restriction_regex_is_rejected() {
        let raw: RawConfig = toml::from_str(
            r#"
            [[directories]]
            path = "/etc"
            restriction = "("
            "#,
        )
        .unwrap();
        assert!(matches!(
            lower(raw),
            Err(ConfigError::InvalidRestriction { .. })
        ));
    }

    #[test]
    fn scan_time_parses_hh_mm_ss() {
        let raw: RawConfig = toml::from_str(
            r#"
            scan_time = "22:00:00"

            [[directories]]
            path = "/etc"
            "#,
        )
        .unwrap();
        let config = lower(raw).unwrap();
        assert_eq!(
            config.scan_time,
            Some(NaiveTime::from_hms_opt(22, 0, 0).unwrap())
        );
    }

    #[test]
    fn scan_day_parses_comma_separated_weekdays() {
        let mask = DayOfWeekMask::parse("mon,wed,fri").unwrap();
        assert!(mask.contains(chrono::Weekday::Mon));
        assert!(!mask.contains(chrono::Weekday::Tue));
        assert!(mask.contains(chrono::Weekday::Fri));
    }
}
