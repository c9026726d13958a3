//! PKCE (RFC 7636) material.
//!
//! The server side only needs [`verify`]. The rest of this module is the
//! client-side originator used by first-party clients: it generates the
//! verifier and anti-forgery state for one login attempt, keeps them in a
//! [`PkceStore`] across the redirect to the authorization endpoint, and builds
//! the authorization URL and the token-exchange form.

use crate::error::PkceError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;

pub const METHOD_S256: &str = "S256";

pub const DEFAULT_VERIFIER_LENGTH: usize = 64;
pub const DEFAULT_STATE_LENGTH: usize = 32;

/// How long a pending login may wait for the authorization server to redirect back.
pub const PENDING_LOGIN_TTL: Duration = Duration::from_secs(600);

fn random_url_safe(length: usize) -> Result<String, PkceError> {
    // 32 bytes encode to the 43 character minimum, 96 to the 128 character maximum.
    if !(32..=96).contains(&length) {
        return Err(PkceError::InvalidLength(length));
    }
    let mut bytes = vec![0u8; length];
    getrandom::fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a code verifier from `length` CSPRNG bytes, base64url-encoded without padding.
pub fn generate_verifier(length: usize) -> Result<String, PkceError> {
    random_url_safe(length)
}

/// Generate an anti-forgery state value, unrelated to the verifier.
pub fn generate_state(length: usize) -> Result<String, PkceError> {
    random_url_safe(length)
}

/// `base64url(SHA-256(verifier))` without padding.
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Whether `verifier` is syntactically a valid RFC 7636 code verifier.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Recompute the S256 challenge from `verifier` and compare it to the stored one.
pub fn verify(verifier: &str, challenge: &str) -> bool {
    if !is_valid_verifier(verifier) {
        return false;
    }
    let computed = derive_challenge(verifier);
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Material for one login attempt.
#[derive(Clone, Debug)]
pub struct PkceMaterial {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl PkceMaterial {
    pub fn generate() -> Result<Self, PkceError> {
        let verifier = generate_verifier(DEFAULT_VERIFIER_LENGTH)?;
        let state = generate_state(DEFAULT_STATE_LENGTH)?;
        Ok(Self {
            challenge: derive_challenge(&verifier),
            verifier,
            state,
        })
    }
}

/// Storage that survives the round trip to the authorization server.
///
/// Entries are keyed by state and can be taken exactly once.
pub trait PkceStore: Send + Sync {
    fn put(&self, state: &str, verifier: &str);

    /// Remove and return the verifier stored for `state`, if it has not expired.
    fn take(&self, state: &str) -> Option<String>;
}

struct PendingLogin {
    verifier: String,
    created: Instant,
}

/// In-process [`PkceStore`] with a fixed time-to-live.
pub struct MemoryPkceStore {
    pending: DashMap<String, PendingLogin>,
    ttl: Duration,
}

impl Default for MemoryPkceStore {
    fn default() -> Self {
        Self::new(PENDING_LOGIN_TTL)
    }
}

impl MemoryPkceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Drop entries whose login never came back.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.pending.retain(|_, p| p.created.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl PkceStore for MemoryPkceStore {
    fn put(&self, state: &str, verifier: &str) {
        self.pending.insert(
            state.to_string(),
            PendingLogin {
                verifier: verifier.to_string(),
                created: Instant::now(),
            },
        );
    }

    fn take(&self, state: &str) -> Option<String> {
        let (_, pending) = self.pending.remove(state)?;
        (pending.created.elapsed() < self.ttl).then_some(pending.verifier)
    }
}

/// Parameters a client needs to start the authorization-code flow.
#[derive(Clone, Debug)]
pub struct AuthorizationUrlParams<'a> {
    pub authorization_endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
}

/// Generate fresh material, remember the verifier, and build the URL to navigate to.
///
/// Returns the URL together with the state so callers can correlate the callback.
pub fn begin_login(
    store: &dyn PkceStore,
    params: &AuthorizationUrlParams<'_>,
) -> Result<(url::Url, String), PkceError> {
    let material = PkceMaterial::generate()?;
    let url = authorization_url(params, &material)?;
    store.put(&material.state, &material.verifier);
    Ok((url, material.state))
}

pub fn authorization_url(
    params: &AuthorizationUrlParams<'_>,
    material: &PkceMaterial,
) -> Result<url::Url, PkceError> {
    let mut url = url::Url::parse(params.authorization_endpoint)?;
    url.query_pairs_mut()
        .append_pair("client_id", params.client_id)
        .append_pair("redirect_uri", params.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", params.scope)
        .append_pair("state", &material.state)
        .append_pair("code_challenge", &material.challenge)
        .append_pair("code_challenge_method", METHOD_S256);
    Ok(url)
}

/// Consume the pending login for `state` and build the authorization-code redemption form.
pub fn token_exchange_form(
    store: &dyn PkceStore,
    state: &str,
    code: &str,
    client_id: &str,
    redirect_uri: &str,
) -> Result<Vec<(&'static str, String)>, PkceError> {
    let verifier = store.take(state).ok_or(PkceError::UnknownState)?;
    Ok(vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
        ("redirect_uri", redirect_uri.to_string()),
        ("client_id", client_id.to_string()),
        ("code_verifier", verifier),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            derive_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert!(verify(verifier, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"));
    }

    #[test]
    fn test_generated_material_is_url_safe_and_sized() {
        let verifier = generate_verifier(DEFAULT_VERIFIER_LENGTH).unwrap();
        let state = generate_state(DEFAULT_STATE_LENGTH).unwrap();

        // 64 bytes -> 86 chars, 32 bytes -> 43 chars
        assert_eq!(verifier.len(), 86);
        assert_eq!(state.len(), 43);
        assert!(is_valid_verifier(&verifier));
        assert!(!verifier.contains('='));
        assert_ne!(verifier, generate_verifier(DEFAULT_VERIFIER_LENGTH).unwrap());
    }

    #[test]
    fn test_rejects_out_of_range_lengths() {
        assert!(matches!(
            generate_verifier(16),
            Err(PkceError::InvalidLength(16))
        ));
        assert!(generate_verifier(97).is_err());
        assert!(generate_state(96).is_ok());
    }

    #[test]
    fn test_single_bit_mutations_change_challenge() {
        for _ in 0..16 {
            let verifier = generate_verifier(DEFAULT_VERIFIER_LENGTH).unwrap();
            let challenge = derive_challenge(&verifier);
            assert!(verify(&verifier, &challenge));

            let bytes = verifier.as_bytes();
            for i in 0..bytes.len() {
                for bit in 0..7 {
                    let mut mutated = bytes.to_vec();
                    mutated[i] ^= 1 << bit;
                    let Ok(mutated) = String::from_utf8(mutated) else {
                        continue;
                    };
                    assert_ne!(derive_challenge(&mutated), challenge);
                    assert!(!verify(&mutated, &challenge));
                }
            }
        }
    }

    #[test]
    fn test_verify_rejects_malformed_verifier() {
        let short = "abc";
        assert!(!verify(short, &derive_challenge(short)));

        let with_space = format!("{} ", "a".repeat(50));
        assert!(!verify(&with_space, &derive_challenge(&with_space)));
    }

    #[test]
    fn test_verify_rejects_truncated_or_extended_challenge() {
        let verifier = generate_verifier(DEFAULT_VERIFIER_LENGTH).unwrap();
        let challenge = derive_challenge(&verifier);
        assert!(!verify(&verifier, &challenge[..42]));
        assert!(!verify(&verifier, &format!("{challenge}A")));
        assert!(!verify(&verifier, ""));
    }

    #[test]
    fn test_store_take_is_single_use() {
        let store = MemoryPkceStore::default();
        store.put("state-1", "verifier-1");

        assert_eq!(store.take("state-1").as_deref(), Some("verifier-1"));
        assert_eq!(store.take("state-1"), None);
        assert_eq!(store.take("unknown"), None);
    }

    #[test]
    fn test_store_expires_entries() {
        let store = MemoryPkceStore::new(Duration::ZERO);
        store.put("state-1", "verifier-1");
        assert_eq!(store.take("state-1"), None);

        store.put("state-2", "verifier-2");
        store.purge_expired();
        assert!(store.is_empty());
    }

    #[test]
    fn test_begin_login_and_exchange_form() {
        let store = MemoryPkceStore::default();
        let params = AuthorizationUrlParams {
            authorization_endpoint: "https://auth.example.test/connect/authorize",
            client_id: "bwa-client",
            redirect_uri: "https://localhost:7274/authentication/login-callback",
            scope: "openid profile api",
        };

        let (url, state) = begin_login(&store, &params).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("state").as_deref(), Some(state.as_str()));
        assert_eq!(get("code_challenge_method").as_deref(), Some("S256"));
        let challenge = get("code_challenge").unwrap();

        let form = token_exchange_form(
            &store,
            &state,
            "the-code",
            params.client_id,
            params.redirect_uri,
        )
        .unwrap();
        let verifier = &form.iter().find(|(k, _)| *k == "code_verifier").unwrap().1;
        assert!(verify(verifier, &challenge));

        // The pending login is gone once exchanged.
        assert!(matches!(
            token_exchange_form(&store, &state, "the-code", "bwa-client", "x"),
            Err(PkceError::UnknownState)
        ));
    }
}
