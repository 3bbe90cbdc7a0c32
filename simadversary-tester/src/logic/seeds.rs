use anyhow::{Context, Result, bail};
use std::collections::HashSet;

/// Seed used when no tokens are given.
pub const DEFAULT_SEED: u64 = 1337;

/// Upper bound on seeds produced by a single range token.
const MAX_RANGE_LEN: u64 = 10_000;

/// Resolve CLI seed arguments into a deduplicated list, in first-seen order.
///
/// Accepts decimal integers (negative values use their magnitude), `0x`
/// hexadecimal, and ranges written `a..b` or `a..=b`.
///
/// # Errors
///
/// Returns an error for tokens that are not seeds, empty or reversed ranges,
/// and ranges longer than the supported maximum.
pub fn resolve_seed_inputs(tokens: &[String]) -> Result<Vec<u64>> {
    let mut seeds = Vec::new();
    let mut seen = HashSet::new();

    for token in tokens {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        for seed in parse_token(token)? {
            if seen.insert(seed) {
                seeds.push(seed);
            }
        }
    }

    if seeds.is_empty() {
        seeds.push(DEFAULT_SEED);
    }
    Ok(seeds)
}

fn parse_token(token: &str) -> Result<Vec<u64>> {
    if let Some((start, end)) = token.split_once("..") {
        let (end, inclusive) = match end.strip_prefix('=') {
            Some(end) => (end, true),
            None => (end, false),
        };
        let start = parse_single(start).with_context(|| format!("in range {token}"))?;
        let end = parse_single(end).with_context(|| format!("in range {token}"))?;
        if end < start || (!inclusive && end == start) {
            bail!("Empty seed range: {token}");
        }
        let end = if inclusive { end } else { end - 1 };
        if end - start >= MAX_RANGE_LEN {
            bail!("Seed range {token} exceeds {MAX_RANGE_LEN} seeds");
        }
        return Ok((start..=end).collect());
    }
    Ok(vec![parse_single(token)?])
}

fn parse_single(token: &str) -> Result<u64> {
    let token = token.trim();
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .with_context(|| format!("Unrecognized seed token: {token}"));
    }
    if let Ok(value) = token.parse::<i64>() {
        return Ok(value.unsigned_abs());
    }
    if let Ok(value) = token.parse::<u64>() {
        return Ok(value);
    }
    bail!("Unrecognized seed token: {token}");
}
