//! DNS wire encoding for alias record data.

use crate::advertiser::AdvertiseError;
use crate::registration::protocol::normalize_domain;

/// DNS wire format of `name`: length-prefixed labels ending in a zero byte.
pub fn encode_rdata(name: &str) -> Result<Vec<u8>, AdvertiseError> {
    let ascii = normalize_domain(name.trim_end_matches('.'))
        .map_err(|_| AdvertiseError::InvalidName(name.to_string()))?;
    let mut out = Vec::with_capacity(ascii.len() + 2);
    for label in ascii.split('.').filter(|l| !l.is_empty()) {
        if label.len() > 63 {
            return Err(AdvertiseError::InvalidName(name.to_string()));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(out)
}
