use std::time::SystemTime;

use crate::device::types::{EventKind, ParsedEvent};
use crate::error::ParseError;

/// Decodes a notification payload of the shape `<typeCode> <amount> <label>`, e.g. `"I 45.23 x"`.
///
/// The scale has no clock, so the event is stamped with the current wall-clock time.
pub fn parse(raw: &str) -> Result<ParsedEvent, ParseError> {
    parse_at(raw, SystemTime::now())
}

pub fn parse_at(raw: &str, received_at: SystemTime) -> Result<ParsedEvent, ParseError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(ParseError::TooFewTokens { found: tokens.len() });
    }

    let amount = tokens[1].parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())
        .ok_or_else(|| ParseError::InvalidAmount { token: tokens[1].to_string() })?;

    Ok(ParsedEvent {
        kind: EventKind::from_code(tokens[0]),
        amount,
        label: tokens[2].to_string(),
        received_at,
    })
}
