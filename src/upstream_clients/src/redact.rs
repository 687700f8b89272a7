//! Secret masking for log output and error messages.
//!
//! Upstream URLs carry the session token in the query string (`?key=...`),
//! so every URL that can end up in a log line or an error goes through
//! [`mask_url`] first.

/// Query parameters whose values must never appear in logs.
const SECRET_PARAMS: [&str; 5] = ["key", "token", "pass", "password", "secret"];

/// Masks the values of secret-looking query parameters in a URL string.
///
/// `https://pos/api?key=abc&rootType=Account` becomes
/// `https://pos/api?key=***&rootType=Account`. Non-URL text passes through
/// with the same `name=value` scan applied, which also covers form bodies.
pub fn mask_url(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(eq) = rest.find('=') {
        let (head, tail) = rest.split_at(eq);
        let name = head
            .rsplit(|c: char| c == '?' || c == '&' || c.is_whitespace())
            .next()
            .unwrap_or("");
        out.push_str(head);
        out.push('=');
        // skip '='
        let tail = &tail[1..];
        let value_end = tail
            .find(|c: char| c == '&' || c.is_whitespace())
            .unwrap_or(tail.len());
        if SECRET_PARAMS.iter().any(|p| name.eq_ignore_ascii_case(p)) {
            out.push_str("***");
        } else {
            out.push_str(&tail[..value_end]);
        }
        rest = &tail[value_end..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_key_param() {
        assert_eq!(
            mask_url("https://pos/resto/api/suppliers?key=deadbeef&x=1"),
            "https://pos/resto/api/suppliers?key=***&x=1"
        );
    }

    #[test]
    fn masks_multiple_secrets_case_insensitive() {
        assert_eq!(
            mask_url("a?Token=t1&name=n&PASS=p"),
            "a?Token=***&name=n&PASS=***"
        );
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(mask_url("no secrets here"), "no secrets here");
    }

    #[test]
    fn masks_form_body_pairs() {
        assert_eq!(mask_url("login=admin&pass=sha1hash"), "login=admin&pass=***");
    }
}
