//! Bearer token authentication.
//!
//! Tokens are configured per user in `config.yaml`; a request is
//! authenticated as the user whose token matches.

use crate::config::UserConfig;

/// Constant-time comparison. Empty tokens never match.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    let prefix = header.get(..7)?;
    if !prefix.eq_ignore_ascii_case("Bearer ") {
        return None;
    }

    let token = header[7..].trim();
    (!token.is_empty()).then_some(token)
}

/// Id of the user owning `token`.
///
/// Every configured user is compared so the time taken does not reveal
/// which entry matched.
pub fn resolve_user<'a>(token: &str, users: &'a [UserConfig]) -> Option<&'a str> {
    users.iter().fold(None, |found, user| {
        if validate_token(token, &user.token) {
            found.or(Some(user.id.as_str()))
        } else {
            found
        }
    })
}
