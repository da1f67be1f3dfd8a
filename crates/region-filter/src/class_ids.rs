//! Class-id list parsing
//!
//! Lists are accepted either as arrays or as strings separated by `:`, `;`
//! or `,` (e.g. `"0:2:3"` or `"0;2;3"`).

use serde::{Deserialize, Deserializer};

use crate::error::ClassIdParseError;

/// Parse a delimited class-id list
pub fn parse_class_ids(input: &str) -> Result<Vec<i32>, ClassIdParseError> {
    input
        .split(|c| c == ':' || c == ';' || c == ',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<i32>().map_err(|_| ClassIdParseError {
                input: input.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassIdList {
    List(Vec<i32>),
    Text(String),
}

/// Serde helper accepting either form
pub fn deserialize_class_ids<'de, D>(deserializer: D) -> Result<Vec<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    match ClassIdList::deserialize(deserializer)? {
        ClassIdList::List(ids) => Ok(ids),
        ClassIdList::Text(text) => parse_class_ids(&text).map_err(serde::de::Error::custom),
    }
}
