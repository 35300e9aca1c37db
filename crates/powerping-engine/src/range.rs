use std::net::Ipv4Addr;
use thiserror::Error;

/// Largest number of addresses a single range may expand to (a /8).
pub const MAX_RANGE_SIZE: u64 = 1 << 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("address range must have 4 dotted segments, found {0}")]
    SegmentCount(usize),
    #[error("invalid range segment {0:?}")]
    Segment(String),
    #[error("range segment {0:?} has its bounds reversed")]
    Reversed(String),
    #[error("range expands to {0} addresses (limit {max})", max = MAX_RANGE_SIZE)]
    TooLarge(u64),
}

/// Expands a dashed range such as `192.168.1.1-254` or `10.0-1.0.1-3`.
///
/// Every dotted segment is either a literal octet or `lower-upper`. The
/// result is in ascending numeric order.
pub fn parse_range(range: &str) -> Result<Vec<Ipv4Addr>, RangeError> {
    let segments: Vec<&str> = range.trim().split('.').collect();
    if segments.len() != 4 {
        return Err(RangeError::SegmentCount(segments.len()));
    }

    let mut bounds = [(0u8, 0u8); 4];
    for (slot, segment) in bounds.iter_mut().zip(&segments) {
        *slot = parse_segment(segment)?;
    }

    let total: u64 = bounds
        .iter()
        .map(|(lower, upper)| (*upper - *lower) as u64 + 1)
        .product();
    if total > MAX_RANGE_SIZE {
        return Err(RangeError::TooLarge(total));
    }

    let mut addresses = Vec::with_capacity(total as usize);
    for a in bounds[0].0..=bounds[0].1 {
        for b in bounds[1].0..=bounds[1].1 {
            for c in bounds[2].0..=bounds[2].1 {
                for d in bounds[3].0..=bounds[3].1 {
                    addresses.push(Ipv4Addr::new(a, b, c, d));
                }
            }
        }
    }

    Ok(addresses)
}

fn parse_segment(segment: &str) -> Result<(u8, u8), RangeError> {
    let invalid = || RangeError::Segment(segment.to_string());

    let (lower, upper) = match segment.split_once('-') {
        Some((lower, upper)) => (
            parse_octet(lower).ok_or_else(invalid)?,
            parse_octet(upper).ok_or_else(invalid)?,
        ),
        None => {
            let octet = parse_octet(segment).ok_or_else(invalid)?;
            (octet, octet)
        }
    };

    if lower > upper {
        return Err(RangeError::Reversed(segment.to_string()));
    }

    Ok((lower, upper))
}

fn parse_octet(text: &str) -> Option<u8> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
