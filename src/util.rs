//! Log-safe rendering of account names and request URLs

use url::Url;

/// Query parameters whose values must never reach the logs
const SECRET_PARAMS: &[&str] = &["password", "safeToken", "saveToken", "deviceToken"];

/// Mask the local part of an e-mail address, keeping its first and last character.
///
/// "username@example.com" → "u******e@example.com"
pub fn mask_email(email: &str) -> String {
    let (local, domain) = match email.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (email, None),
    };

    let chars: Vec<char> = local.chars().collect();
    let masked = match chars.len() {
        0 => String::new(),
        1 | 2 => "*".repeat(chars.len()),
        n => format!("{}{}{}", chars[0], "*".repeat(n - 2), chars[n - 1]),
    };

    match domain {
        Some(domain) => format!("{}@{}", masked, domain),
        None => masked,
    }
}

/// Copy of `url` with secret query values replaced by `***`.
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if SECRET_PARAMS.contains(&k.as_ref()) {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();

    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
