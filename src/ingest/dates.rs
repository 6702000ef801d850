// src/ingest/dates.rs
//! Feed date reformatting. Never fails: unparseable input comes back unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use time::{
    format_description::well_known::{Rfc2822, Rfc3339},
    Date, Month, OffsetDateTime,
};

static RE_ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})").expect("valid iso date regex"));
static RE_DMY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})").expect("valid d/m/y regex"));

/// Reformat a feed date into `YYYY-MM-DD`.
///
/// The calendar date is taken in the feed's own offset, so a midnight
/// `+0100` timestamp keeps its day.
pub fn to_iso_date(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }
    parse_date(s)
        .map(iso)
        .unwrap_or_else(|| s.to_string())
}

fn parse_date(s: &str) -> Option<Date> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return Some(dt.date());
    }
    // Obsolete zone names show up in gazette feeds.
    for zone in [" GMT", " UT", " UTC", " Z"] {
        if let Some(head) = s.strip_suffix(zone) {
            if let Ok(dt) = OffsetDateTime::parse(&format!("{head} +0000"), &Rfc2822) {
                return Some(dt.date());
            }
        }
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(dt.date());
    }
    if let Some(c) = RE_ISO_DATE.captures(s) {
        return calendar(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = RE_DMY_DATE.captures(s) {
        return calendar(&c[3], &c[2], &c[1]);
    }
    None
}

fn calendar(y: &str, m: &str, d: &str) -> Option<Date> {
    let month = Month::try_from(m.parse::<u8>().ok()?).ok()?;
    Date::from_calendar_date(y.parse().ok()?, month, d.parse().ok()?).ok()
}

fn iso(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day())
}
