//! Startup rule seeding from a JSON file.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use cnc_protocol::Rule;

/// Load a JSON array of rules (same shape as `GET /`).
///
/// Ids are kept as written and must be unique. `i64::MAX` is refused since
/// no id could be assigned after it.
pub fn load_seed_file(path: &Path) -> Result<Vec<Rule>> {
    let body = std::fs::read(path)
        .with_context(|| format!("reading seed rules from {}", path.display()))?;
    let rules: Vec<Rule> = serde_json::from_slice(&body)
        .with_context(|| format!("parsing seed rules in {}", path.display()))?;

    let mut seen = HashSet::new();
    for rule in &rules {
        if rule.id == i64::MAX {
            bail!(
                "invalid seed rules in {}: rule id {} leaves no room for new ids",
                path.display(),
                rule.id
            );
        }
        if !seen.insert(rule.id) {
            bail!(
                "invalid seed rules in {}: duplicate rule id {}",
                path.display(),
                rule.id
            );
        }
    }

    Ok(rules)
}
