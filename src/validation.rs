use std::collections::HashSet;

use crate::error::{RelayError, Result};
use crate::types::Webhook;

/// Structural checks run before a definition is stored or cached.
///
/// A webhook with targets needs exactly one `returnAsResponse` target. A
/// webhook without targets is valid: it only captures. Target ids, where set,
/// are unique within the webhook.
pub fn validate_webhook(wh: &Webhook) -> Result<()> {
    if wh.method.trim().is_empty() {
        return Err(RelayError::invalid("method is required"));
    }
    if !wh.path.starts_with('/') {
        return Err(RelayError::invalid(format!(
            "path must start with '/': {:?}",
            wh.path
        )));
    }

    let mut seen_ids = HashSet::new();
    for furl in &wh.forward_urls {
        if !furl.id.is_empty() && !seen_ids.insert(furl.id.as_str()) {
            return Err(RelayError::invalid(format!(
                "forward url id {:?} is used more than once",
                furl.id
            )));
        }
        let scheme_ok = furl.url.starts_with("http://") || furl.url.starts_with("https://");
        if !scheme_ok {
            return Err(RelayError::invalid(format!(
                "forward url must be http(s): {:?}",
                furl.url
            )));
        }
        if furl.timeout.is_zero() {
            return Err(RelayError::invalid(format!(
                "forward url {} has no timeout",
                furl.url
            )));
        }
    }

    let responders = wh
        .forward_urls
        .iter()
        .filter(|f| f.return_as_response)
        .count();
    match responders {
        1 => Ok(()),
        0 if wh.forward_urls.is_empty() => Ok(()),
        0 => Err(RelayError::invalid(
            "no forward url has returnAsResponse set",
        )),
        n => Err(RelayError::invalid(format!(
            "{n} forward urls have returnAsResponse set, exactly one is allowed"
        ))),
    }
}
