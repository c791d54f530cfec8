use std::path::Path;

use tracing::info;

use crate::error::EngineError;
use crate::store::FlagStore;

/// `wallet:flagged:reason` triples joined by commas, ordered by wallet.
///
/// Delimiters inside a wallet id or reason are written as-is, so a reason
/// containing `,` or `:` cannot be split back unambiguously.
pub fn export_flags(store: &FlagStore) -> String {
    store
        .get_all()
        .into_iter()
        .map(|f| format!("{}:{}:{}", f.wallet, f.score > 0, f.reason))
        .collect::<Vec<_>>()
        .join(",")
}

/// Write the export to `path`, or stdout when no path is given.
pub fn write_export(store: &FlagStore, path: Option<&str>) -> Result<usize, EngineError> {
    let out = export_flags(store);
    match path {
        Some(p) => {
            std::fs::write(Path::new(p), &out).map_err(|e| EngineError::unavailable(format!("export {p}"), e))?;
            info!(path = p, wallets = store.len(), "flags exported");
        }
        None => println!("{out}"),
    }
    Ok(store.len())
}
