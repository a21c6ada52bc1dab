//! Manage tokens handed out in `get_peers` responses.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::time::{Duration, Instant};

use tracing::trace;

const TOKEN_SIZE: usize = 4;

/// Default duration an issued token is accepted for.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(20);

/// Tokens issuer.
///
/// Tokens are random, and accepted from any address until they expire.
/// Read [BEP_0005](https://www.bittorrent.org/beps/bep_0005.html) for more information.
#[derive(Clone)]
pub struct Tokens {
    timeout: Duration,
    issued: HashMap<[u8; TOKEN_SIZE], Instant>,
}

impl Debug for Tokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tokens ({} issued)", self.issued.len())
    }
}

impl Tokens {
    /// Create a Tokens issuer, with tokens valid for `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Tokens {
            timeout,
            issued: HashMap::new(),
        }
    }

    // === Public Methods ===

    /// Issue a new token, valid until `now + timeout`.
    pub fn issue(&mut self, now: Instant) -> [u8; TOKEN_SIZE] {
        let token = loop {
            let token: [u8; TOKEN_SIZE] = rand::random();

            if !self.issued.contains_key(&token) {
                break token;
            }
        };

        self.issued.insert(token, now + self.timeout);

        token
    }

    /// Returns `true` if `token` was issued and didn't expire yet.
    pub fn validate(&self, token: &[u8], now: Instant) -> bool {
        let Ok(token) = <[u8; TOKEN_SIZE]>::try_from(token) else {
            return false;
        };

        self.issued
            .get(&token)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Forget expired tokens.
    pub fn expire(&mut self, now: Instant) {
        let before = self.issued.len();

        self.issued.retain(|_, expires_at| *expires_at > now);

        if self.issued.len() < before {
            trace!(expired = before - self.issued.len(), "Expired tokens");
        }
    }
}

impl Default for Tokens {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TIMEOUT)
    }
}
