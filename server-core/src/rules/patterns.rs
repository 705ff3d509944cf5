//! Shared pattern helpers for the rule catalogue. Every recognized log line
//! starts with `[<timestamp>][<chain id>]`; the per-event rules only supply
//! the tail that follows.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::ids::ChainId;

/// `[2023.11.25-13.12.31:512][  341]`: timestamp and chain id.
static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([0-9]{4}\.[0-9]{2}\.[0-9]{2}-[0-9]{2}\.[0-9]{2}\.[0-9]{2}:[0-9]{3})\]\[\s*([0-9]+)\]")
        .expect("prefix pattern")
});

static WEAPON_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)_C(?:_[0-9]+)?$").expect("weapon class pattern"));

/// A log line with its base prefix split off.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine<'a> {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    /// Everything after the prefix, starting with the component tag.
    pub rest: &'a str,
    pub raw: &'a str,
}

/// Splits the base prefix off a line. Lines without it are unmatchable.
pub fn split_prefix(line: &str) -> Option<ParsedLine<'_>> {
    let caps = PREFIX_RE.captures(line)?;
    let time = parse_timestamp(&caps[1])?;
    let chain_id = ChainId::new(caps[2].parse().ok()?);
    let rest = &line[caps.get(0)?.end()..];
    Some(ParsedLine {
        time,
        chain_id,
        rest,
        raw: line,
    })
}

/// Server log timestamps are wall clock without a zone; they are interpreted
/// as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y.%m.%d-%H.%M.%S:%3f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Strips the `_C` class suffix and an optional instance counter:
/// `BP_SVD_C_2130826410` and `BP_SVD_C` both become `BP_SVD`.
pub fn strip_class_suffix(name: &str) -> String {
    match WEAPON_CLASS_RE.captures(name.trim()) {
        Some(caps) => caps[1].to_owned(),
        None => name.trim().to_owned(),
    }
}

/// Damage numbers are occasionally logged signed; magnitude is what counts.
pub fn parse_damage(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().map(f32::abs)
}

/// Bots and broken rows carry the literal `INVALID` in their id block.
pub fn ids_are_invalid(id_block: &str) -> bool {
    id_block.contains("INVALID")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_prefix_and_parses_utc_timestamp() {
        let line = "[2023.11.25-13.12.31:512][  341]LogSquad: Join succeeded: Yuri";
        let parsed = split_prefix(line).unwrap();
        assert_eq!(parsed.chain_id.value(), 341);
        assert_eq!(parsed.rest, "LogSquad: Join succeeded: Yuri");
        assert_eq!(
            parsed.time.to_rfc3339(),
            "2023-11-25T13:12:31.512+00:00"
        );
    }

    #[test]
    fn lines_without_prefix_do_not_split() {
        assert!(split_prefix("LogSquad: Join succeeded: Yuri").is_none());
        assert!(split_prefix("[bad][341]tail").is_none());
    }

    #[test]
    fn class_suffix_stripping_handles_instances() {
        assert_eq!(strip_class_suffix("BP_SVD_C_2130826410"), "BP_SVD");
        assert_eq!(strip_class_suffix("BP_M4_Carbine_C"), "BP_M4_Carbine");
        assert_eq!(strip_class_suffix("NoSuffix"), "NoSuffix");
    }

    #[test]
    fn damage_uses_the_absolute_value() {
        assert_eq!(parse_damage("32.5"), Some(32.5));
        assert_eq!(parse_damage("-199.0"), Some(199.0));
        assert_eq!(parse_damage("x"), None);
    }
}
