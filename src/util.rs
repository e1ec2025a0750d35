//! Shared utility functions for the Retos service.

/// Normalize an email address for entitlement and grant correlation.
///
/// Orders and entitlements correlate by normalized email rather than by
/// foreign key, so every write path must run addresses through here.
/// Returns `None` when the value cannot be treated as an email at all.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();

    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    if email.contains(char::is_whitespace) {
        return None;
    }

    Some(email)
}

/// Truncate an external response body for storage as an outbox error.
/// Bodies can be arbitrarily large; we keep enough for diagnosis.
pub fn truncate_error(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut end = max_bytes;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
