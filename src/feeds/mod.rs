use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{FeedConfig, FeedFormat};
use crate::core::{Flag, MalformedRecord, MAX_RISK};
use crate::error::EngineError;

/// Flags read from one external list, plus the lines that could not be used.
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub flags: Vec<Flag>,
    pub malformed: Vec<MalformedRecord>,
}

/// Read a configured feed file. A missing file is a data source failure;
/// bad lines are skipped and counted.
pub fn load_feed(config: &FeedConfig) -> Result<FeedBatch, EngineError> {
    let content = std::fs::read_to_string(Path::new(&config.path))
        .map_err(|e| EngineError::unavailable(format!("feed {}", config.name), e))?;
    let batch = parse_feed(config, &content);
    if !batch.malformed.is_empty() {
        warn!(feed = %config.name, skipped = batch.malformed.len(), "skipped malformed feed lines");
    }
    info!(feed = %config.name, flags = batch.flags.len(), "external feed loaded");
    Ok(batch)
}

pub fn parse_feed(config: &FeedConfig, content: &str) -> FeedBatch {
    match config.format {
        FeedFormat::Addresses => parse_addresses(config, content),
        FeedFormat::Csv => parse_csv(config, content),
    }
}

/// One address per line, or `asset,address`. Blank lines and `#` comments
/// are ignored.
fn parse_addresses(config: &FeedConfig, content: &str) -> FeedBatch {
    let mut batch = FeedBatch::default();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let address = match line.split_once(',') {
            Some((asset, address)) => {
                let asset = asset.trim();
                if !config.assets.is_empty() && !config.assets.iter().any(|a| a.eq_ignore_ascii_case(asset)) {
                    continue;
                }
                address.trim()
            }
            None => line,
        };
        if address.is_empty() || address.contains(char::is_whitespace) {
            batch.malformed.push(bad(config, n, "unusable address"));
            continue;
        }
        batch.flags.push(Flag::new(address, config.reason.clone(), config.score));
    }
    batch
}

/// `wallet_address,reason,risk_score`, header row first.
fn parse_csv(config: &FeedConfig, content: &str) -> FeedBatch {
    let mut batch = FeedBatch::default();
    for (n, line) in content.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        // reason may itself contain commas; score is always the last field
        let Some((head, score)) = line.rsplit_once(',') else {
            batch.malformed.push(bad(config, n, "too few fields"));
            continue;
        };
        let Some((wallet, reason)) = head.split_once(',') else {
            batch.malformed.push(bad(config, n, "too few fields"));
            continue;
        };
        let wallet = wallet.trim();
        let reason = reason.trim();
        if wallet.is_empty() {
            batch.malformed.push(bad(config, n, "missing wallet_address"));
            continue;
        }
        let Ok(score) = score.trim().parse::<i64>() else {
            batch.malformed.push(bad(config, n, "invalid risk_score"));
            continue;
        };
        let reason = if reason.is_empty() { config.reason.as_str() } else { reason };
        batch
            .flags
            .push(Flag::new(wallet, reason, score.clamp(0, MAX_RISK as i64) as u8));
    }
    batch
}

fn bad(config: &FeedConfig, line: usize, reason: &'static str) -> MalformedRecord {
    debug!(feed = %config.name, line = line + 1, reason, "skipping feed line");
    MalformedRecord {
        source: config.name.clone(),
        reference: format!("line {}", line + 1),
        reason,
    }
}
