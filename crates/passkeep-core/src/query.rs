//! Ranked record lookup.
//!
//! A query is matched against every record and graded by [`MatchQuality`].
//! The best grade wins only when exactly one record holds it; ties are
//! reported, never broken arbitrarily.

use crate::db::{Database, Record};
use crate::error::{Error, Result};

/// Most candidates named in an [`Error::Ambiguous`] before truncating.
pub const MAX_CANDIDATES: usize = 5;

const TAG_SEPARATOR: char = '@';

/// How well a record matches a query. Ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchQuality {
    NoMatch,
    /// Username, email, notes, a detail value, or a raw host/address substring.
    Other,
    /// Substring of a detail label.
    Detail,
    /// Substring of the label or title.
    Substring,
    /// A host ends with `.<query>`.
    PartialHost,
    /// A host equals the query.
    Host,
    /// The label equals the query.
    Label,
}

#[derive(Debug, Clone, Copy)]
pub struct Found<'a> {
    pub index: usize,
    pub quality: MatchQuality,
    pub record: &'a Record,
}

/// Outcome of [`find_record`].
#[derive(Debug, Clone)]
pub struct Resolved<'a> {
    pub index: usize,
    pub record: &'a Record,
    pub quality: MatchQuality,
    /// Tag from a `tag@label` query, empty when none was given.
    pub tag: String,
}

/// Split `tag@label` into `(tag, label)`. Without `@` the tag is empty.
pub fn parse_query(query: &str) -> Result<(&str, &str)> {
    let (tag, label) = query.split_once(TAG_SEPARATOR).unwrap_or(("", query));
    let label = label.trim();
    if label.is_empty() {
        return Err(Error::InvalidQuery(query.to_string()));
    }
    Ok((tag.trim(), label))
}

/// Grade `record` against an already-parsed query. Comparisons ignore ASCII
/// case.
pub fn match_quality(query: &str, record: &Record) -> MatchQuality {
    let q = query.to_ascii_lowercase();
    let has = |field: &str| field.to_ascii_lowercase().contains(&q);

    if record.label.eq_ignore_ascii_case(&q) {
        return MatchQuality::Label;
    }
    if record.hosts.iter().any(|h| h.eq_ignore_ascii_case(&q)) {
        return MatchQuality::Host;
    }
    let suffix = format!(".{q}");
    if record
        .hosts
        .iter()
        .any(|h| h.to_ascii_lowercase().ends_with(&suffix))
    {
        return MatchQuality::PartialHost;
    }
    if has(&record.label) || has(&record.title) {
        return MatchQuality::Substring;
    }
    if record.details.iter().any(|d| has(&d.label)) {
        return MatchQuality::Detail;
    }
    let other = has(&record.username)
        || has(&record.email)
        || has(&record.notes)
        || record.details.iter().any(|d| has(&d.value))
        || record.hosts.iter().any(|h| has(h))
        || record.addrs.iter().any(|a| has(a));
    if other {
        MatchQuality::Other
    } else {
        MatchQuality::NoMatch
    }
}

/// Every matching record, best quality first, then by index.
pub fn find_records<'a>(records: &'a [Record], query: &str) -> Vec<Found<'a>> {
    let mut found: Vec<Found<'a>> = records
        .iter()
        .enumerate()
        .map(|(index, record)| Found {
            index,
            quality: match_quality(query, record),
            record,
        })
        .filter(|f| f.quality != MatchQuality::NoMatch)
        .collect();
    found.sort_by(|a, b| b.quality.cmp(&a.quality).then(a.index.cmp(&b.index)));
    found
}

/// The single record in the best tier of a sorted [`find_records`] result.
pub fn pick_best<'a>(query: &str, found: &[Found<'a>]) -> Result<Found<'a>> {
    let Some(first) = found.first() else {
        return Err(Error::NoMatch(query.to_string()));
    };
    let tier: Vec<&Found<'a>> = found
        .iter()
        .take_while(|f| f.quality == first.quality)
        .collect();
    if tier.len() == 1 {
        return Ok(*first);
    }
    let mut candidates: Vec<String> = tier
        .iter()
        .take(MAX_CANDIDATES)
        .map(|f| f.record.display_name().to_string())
        .collect();
    if tier.len() > MAX_CANDIDATES {
        candidates.push("...".into());
    }
    Err(Error::Ambiguous {
        query: query.to_string(),
        candidates,
    })
}

/// Resolve a free-text `tag@label` query to one record of `db`.
pub fn find_record<'a>(db: &'a Database, query: &str, include_archived: bool) -> Result<Resolved<'a>> {
    let (tag, label) = parse_query(query)?;
    let mut found = find_records(&db.records, label);
    if !include_archived {
        found.retain(|f| !f.record.archived);
    }
    if found.is_empty() {
        return Err(Error::NoMatch(query.to_string()));
    }
    let best = pick_best(query, &found)?;
    tracing::debug!(index = best.index, quality = ?best.quality, "resolved query");
    Ok(Resolved {
        index: best.index,
        record: best.record,
        quality: best.quality,
        tag: tag.to_string(),
    })
}
