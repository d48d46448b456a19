//! Scope keys binding a client identity to its idempotency token.

/// Separator between client id and token inside a [`ScopeKey`].
///
/// ASCII unit separator: rejected by `HeaderValue` and absent from IP
/// addresses, so it can never occur in either component. `:` is unusable
/// because IPv6 addresses contain it.
pub const SCOPE_DELIMITER: char = '\u{1f}';

/// The unit of deduplication: `client` + [`SCOPE_DELIMITER`] + `token`.
///
/// Two clients sending the same token produce different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    raw: String,
    split: usize,
}

impl ScopeKey {
    pub fn new(client: &str, token: &str) -> Self {
        let mut raw = String::with_capacity(client.len() + token.len() + 1);
        raw.push_str(client);
        raw.push(SCOPE_DELIMITER);
        raw.push_str(token);
        Self {
            raw,
            split: client.len(),
        }
    }

    /// The full key as stored in a token store.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn client(&self) -> &str {
        self.raw.get(..self.split).unwrap_or_default()
    }

    pub fn token(&self) -> &str {
        self.raw
            .get(self.split + SCOPE_DELIMITER.len_utf8()..)
            .unwrap_or_default()
    }
}

impl AsRef<str> for ScopeKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_components() {
        let key = ScopeKey::new("1.2.3.4", "abc");
        assert_eq!(key.client(), "1.2.3.4");
        assert_eq!(key.token(), "abc");
        assert_eq!(key.as_str(), "1.2.3.4\u{1f}abc");
    }

    #[test]
    fn test_scope_key_ipv6_does_not_collide() {
        // With ':' as separator both would be "::1:2:x"
        let a = ScopeKey::new("::1", "2:x");
        let b = ScopeKey::new("::1:2", "x");
        assert_ne!(a, b);
        assert_eq!(a.client(), "::1");
        assert_eq!(b.token(), "x");
    }

    #[test]
    fn test_scope_key_same_token_different_clients() {
        let a = ScopeKey::new("clientA", "tok1");
        let b = ScopeKey::new("clientB", "tok1");
        assert_ne!(a.as_str(), b.as_str());
        assert_eq!(a.token(), b.token());
    }
}
