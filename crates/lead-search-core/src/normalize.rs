//! Record normalization.
//!
//! Maps a heterogeneous raw row (whatever headers the exporter used) onto the
//! canonical lead fields and builds the searchable text blob.
//!
//! Column lookup tries each alias in order, exact header match first and a
//! case-insensitive match second, and takes the first alias whose trimmed
//! value is non-empty.
//!
//! | Field | Aliases |
//! |-------|---------|
//! | username | `username` |
//! | name | `name` |
//! | bio | `bio`, `description` |
//! | category | `category` |
//! | follower_count | `followerCount`, `followers` |
//! | following_count | `followingCount`, `following` |
//! | website | `website`, `url` |
//! | email | `email` |
//! | phone | `phone`, `phoneNumber` |

use std::collections::HashMap;

use crate::models::{NormalizedLead, RawRow};

/// Separator between fields in the text blob.
pub const TEXT_SEPARATOR: &str = " | ";

const USERNAME: &[&str] = &["username"];
const NAME: &[&str] = &["name"];
const BIO: &[&str] = &["bio", "description"];
const CATEGORY: &[&str] = &["category"];
const FOLLOWERS: &[&str] = &["followerCount", "followers"];
const FOLLOWING: &[&str] = &["followingCount", "following"];
const WEBSITE: &[&str] = &["website", "url"];
const EMAIL: &[&str] = &["email"];
const PHONE: &[&str] = &["phone", "phoneNumber"];

/// Normalize one raw row. Pure and total: never fails, never panics.
pub fn normalize_row(raw: &RawRow) -> NormalizedLead {
    let lookup = ColumnLookup::new(raw);

    let username = lookup.text(USERNAME);
    let name = lookup.text(NAME);
    let bio = lookup.text(BIO);
    let category = lookup.text(CATEGORY);
    let website = lookup.text(WEBSITE);
    let email = lookup.text(EMAIL);
    let phone = lookup.text(PHONE);

    let text = [&username, &name, &bio, &category, &website, &email, &phone]
        .iter()
        .filter_map(|f| f.as_deref())
        .collect::<Vec<_>>()
        .join(TEXT_SEPARATOR);

    NormalizedLead {
        follower_count: lookup.text(FOLLOWERS).as_deref().and_then(parse_count),
        following_count: lookup.text(FOLLOWING).as_deref().and_then(parse_count),
        username,
        name,
        bio,
        category,
        website,
        email,
        phone,
        text,
    }
}

/// Parse a base-10 non-negative integer literal. Anything else
/// (signs, decimals, thousands separators, overflow) is absent.
pub fn parse_count(value: &str) -> Option<i64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<i64>().ok()
}

struct ColumnLookup<'a> {
    raw: &'a RawRow,
    folded: HashMap<String, &'a str>,
}

impl<'a> ColumnLookup<'a> {
    fn new(raw: &'a RawRow) -> Self {
        let mut folded = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            folded
                .entry(key.trim().to_ascii_lowercase())
                .or_insert(value.as_str());
        }
        Self { raw, folded }
    }

    fn text(&self, aliases: &[&str]) -> Option<String> {
        aliases
            .iter()
            .find_map(|alias| {
                let value = self
                    .raw
                    .get(*alias)
                    .map(String::as_str)
                    .or_else(|| self.folded.get(&alias.to_ascii_lowercase()).copied())?;
                let trimmed = value.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            })
            .map(str::to_string)
    }
}
