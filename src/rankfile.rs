//! Rankfile parsing for `ByUser` mapping.
//!
//! Lines look like `rank 0=a slot=0`, `rank 1=a slot=1-3`, or
//! `rank 2=b slot=*`. Any line that doesn't fit this shape is a
//! `BAD_PARAM`, mirroring the source's intolerance of malformed rankfiles.

use crate::error::PlannerError;

/// The hardware-thread set named by a rankfile `slot=` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotSpec {
    List(Vec<usize>),
    Range(usize, usize),
    Any,
}

impl SlotSpec {
    fn parse(s: &str) -> Result<SlotSpec, PlannerError> {
        let s = s.trim();
        if s == "*" {
            return Ok(SlotSpec::Any);
        }
        if let Some((lo, hi)) = s.split_once('-') {
            let lo: usize = lo
                .trim()
                .parse()
                .map_err(|_| PlannerError::BadParam(format!("bad slot range: {s}")))?;
            let hi: usize = hi
                .trim()
                .parse()
                .map_err(|_| PlannerError::BadParam(format!("bad slot range: {s}")))?;
            return Ok(SlotSpec::Range(lo, hi));
        }
        if s.contains(',') {
            let ids = s
                .split(',')
                .map(|piece| {
                    piece
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| PlannerError::BadParam(format!("bad slot list: {s}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(SlotSpec::List(ids));
        }
        let id: usize = s
            .parse()
            .map_err(|_| PlannerError::BadParam(format!("bad slot spec: {s}")))?;
        Ok(SlotSpec::List(vec![id]))
    }

    /// Expands the spec to concrete hardware-thread IDs, given the total
    /// count available (needed to expand `Any`).
    pub fn expand(&self, num_hwthreads: usize) -> Vec<usize> {
        match self {
            SlotSpec::List(ids) => ids.clone(),
            SlotSpec::Range(lo, hi) => (*lo..=*hi).collect(),
            SlotSpec::Any => (0..num_hwthreads).collect(),
        }
    }
}

/// One explicit `rank N=host slot=<spec>` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankfileEntry {
    pub rank: u32,
    pub host: String,
    pub slot: SlotSpec,
}

/// Parses a full rankfile. Blank lines and lines starting with `#` are
/// skipped; everything else must match the `rank N=host slot=<spec>` shape.
pub fn parse_rankfile(text: &str) -> Result<Vec<RankfileEntry>, PlannerError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        entries.push(parse_line(line)?);
    }
    Ok(entries)
}

fn parse_line(line: &str) -> Result<RankfileEntry, PlannerError> {
    let rest = line
        .strip_prefix("rank")
        .ok_or_else(|| PlannerError::BadParam(format!("malformed rankfile line: {line}")))?
        .trim();
    let (rank_str, rest) = rest
        .split_once('=')
        .ok_or_else(|| PlannerError::BadParam(format!("malformed rankfile line: {line}")))?;
    let rank: u32 = rank_str
        .trim()
        .parse()
        .map_err(|_| PlannerError::BadParam(format!("malformed rank number: {rank_str}")))?;

    let mut host = String::new();
    let mut slot = None;
    let mut rest = rest.trim();
    // host is everything up to the next whitespace, then `slot=<spec>`
    // follows as the remaining token.
    if let Some((host_part, slot_part)) = rest.split_once(char::is_whitespace) {
        host = host_part.trim().to_string();
        rest = slot_part.trim();
    } else {
        host = rest.to_string();
        rest = "";
    }
    if let Some(spec_str) = rest.strip_prefix("slot=") {
        slot = Some(SlotSpec::parse(spec_str)?);
    }

    let host = if host.is_empty() {
        return Err(PlannerError::BadParam(format!(
            "missing host in rankfile line: {line}"
        )));
    } else {
        host
    };
    let slot = slot.ok_or_else(|| {
        PlannerError::BadParam(format!("missing slot= clause in rankfile line: {line}"))
    })?;

    Ok(RankfileEntry { rank, host, slot })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_entries() {
        let text = "rank 0=a slot=0\nrank 1=a slot=1\nrank 2=b slot=0\n";
        let entries = parse_rankfile(text).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].rank, 0);
        assert_eq!(entries[0].host, "a");
        assert_eq!(entries[0].slot, SlotSpec::List(vec![0]));
        assert_eq!(entries[2].host, "b");
    }

    #[test]
    fn parses_range_and_wildcard() {
        let entries = parse_rankfile("rank 0=a slot=1-3\nrank 1=a slot=*\n").unwrap();
        assert_eq!(entries[0].slot, SlotSpec::Range(1, 3));
        assert_eq!(entries[1].slot, SlotSpec::Any);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_rankfile("bogus line").is_err());
        assert!(parse_rankfile("rank 0=a").is_err());
    }
}
