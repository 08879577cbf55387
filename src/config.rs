use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use log::LevelFilter;

use crate::uploader::UploadFailurePolicy;

pub const DEFAULT_ENDPOINT: &str = "https://amms.example.org/api/v1/measurements";
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyAMA0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_INTERFACE: &str = "wlan0";
pub const DEFAULT_PORTAL_NAME: &str = "Bresser Gateway";

// The tty read timeout (VTIME) tops out at 25.5 s.
pub const MAX_DECODE_TIMEOUT_MS: u64 = 25_500;

#[derive(Debug, Clone)]
pub struct Config {
    pub amms_token: String,
    pub amms_endpoint: String,
    pub amms_timeout: Duration,
    pub serial_port: String,
    pub baud_rate: u32,
    pub decode_timeout: Duration,
    pub sensor_ids: Vec<u32>,
    pub wifi_interface: String,
    pub portal_name: String,
    pub portal_timeout: Duration,
    pub link_poll: Duration,
    pub upload_failure: UploadFailurePolicy,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn from_env() -> Result<Config, anyhow::Error> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, anyhow::Error> {
        let amms_token = lookup("AMMS_TOKEN").context("AMMS_TOKEN is not set")?;

        Ok(Config {
            amms_token,
            amms_endpoint: lookup("AMMS_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            amms_timeout: Duration::from_secs(parse_or(&lookup, "AMMS_TIMEOUT_SECS", 10)?),
            serial_port: lookup("GATEWAY_SERIAL_PORT")
                .unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string()),
            baud_rate: parse_or(&lookup, "GATEWAY_BAUD_RATE", DEFAULT_BAUD_RATE)?,
            decode_timeout: parse_millis(
                &lookup,
                "GATEWAY_DECODE_TIMEOUT_MS",
                400,
                MAX_DECODE_TIMEOUT_MS,
            )?,
            sensor_ids: parse_sensor_ids(&lookup("GATEWAY_SENSOR_IDS").unwrap_or_default())?,
            wifi_interface: lookup("GATEWAY_WIFI_INTERFACE")
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            portal_name: lookup("GATEWAY_PORTAL_NAME")
                .unwrap_or_else(|| DEFAULT_PORTAL_NAME.to_string()),
            portal_timeout: Duration::from_secs(parse_or(
                &lookup,
                "GATEWAY_PORTAL_TIMEOUT_SECS",
                30,
            )?),
            link_poll: parse_millis(&lookup, "GATEWAY_LINK_POLL_MS", 1000, u64::MAX)?,
            upload_failure: parse_or(&lookup, "GATEWAY_UPLOAD_FAILURE", UploadFailurePolicy::Silent)?,
            log_level: parse_or(&lookup, "GATEWAY_LOG_LEVEL", LevelFilter::Info)?,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {raw:?}: {e}")),
        None => Ok(default),
    }
}

/// Parses a non-zero millisecond duration no larger than `max_ms`.
fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default_ms: u64,
    max_ms: u64,
) -> Result<Duration, anyhow::Error> {
    let ms: u64 = parse_or(lookup, key, default_ms)?;
    if ms == 0 || ms > max_ms {
        return Err(anyhow::anyhow!(
            "{key} must be between 1 and {max_ms} ms, got {ms}"
        ));
    }
    Ok(Duration::from_millis(ms))
}

/// Parses a comma-separated list of hexadecimal sensor ids.
fn parse_sensor_ids(raw: &str) -> Result<Vec<u32>, anyhow::Error> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            let digits = id.trim_start_matches("0x").trim_start_matches("0X");
            u32::from_str_radix(digits, 16).with_context(|| format!("Invalid sensor id: {id}"))
        })
        .collect()
}
