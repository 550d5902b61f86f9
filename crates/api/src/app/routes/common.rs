use core::fmt::Display;
use core::str::FromStr;

use crate::app::errors;

pub fn parse_id<T: FromStr>(raw: &str, what: &'static str) -> Result<T, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_id(what))
}

/// Parse a status or enum name; the domain's message names the bad value.
pub fn parse_value<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| errors::invalid_value(e.to_string()))
}
