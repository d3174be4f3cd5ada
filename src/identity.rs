//! The pool of test identities virtual users authenticate as.
//!
//! Identities load from a newline-delimited file of user ids. Every identity
//! shares the same PIN, matching how the target environment seeds its test
//! accounts. A load failure is never fatal: the pool falls back to a small
//! built-in list so the test can still run.

use rand::rngs::StdRng;
use rand::Rng;
use std::fs;

/// The PIN every test identity authenticates with.
pub const DEFAULT_PIN: &str = "123456";

// Built-in identities used when the users file can't be read.
const FALLBACK_USER_IDS: [&str; 3] = [
    "ffffd8dee1a111ef95a30242ac180002",
    "ffff2e96e1a111ef95a30242ac180002",
    "fffd93ece1a111ef95a30242ac180002",
];

/// One test identity: a user id and its PIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The account identifier sent to the profile and login endpoints.
    pub user_id: String,
    /// The login PIN, always [`DEFAULT_PIN`].
    pub pin: String,
}

/// A read-only pool of test identities, shared by all virtual users.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    /// Load identities from a newline-delimited file, one user id per line.
    ///
    /// Blank lines and surrounding whitespace are ignored. If the file is
    /// absent, unreadable, or contains no usable lines, the built-in fallback
    /// identities are used instead and a warning is logged.
    pub fn load(path: &str) -> IdentityPool {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("failed to load identities from {}: {}", path, e);
                return IdentityPool::fallback();
            }
        };
        let identities: Vec<Identity> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|user_id| Identity {
                user_id: user_id.to_string(),
                pin: DEFAULT_PIN.to_string(),
            })
            .collect();
        if identities.is_empty() {
            warn!("no identities found in {}, using fallback list", path);
            return IdentityPool::fallback();
        }
        IdentityPool { identities }
    }

    /// The built-in identity list used when no users file is available.
    pub fn fallback() -> IdentityPool {
        IdentityPool {
            identities: FALLBACK_USER_IDS
                .iter()
                .map(|user_id| Identity {
                    user_id: user_id.to_string(),
                    pin: DEFAULT_PIN.to_string(),
                })
                .collect(),
        }
    }

    /// How many identities the pool holds. Never zero.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Always false; construction guarantees at least the fallback list.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Select an identity uniformly at random from the pool.
    pub fn pick(&self, rng: &mut StdRng) -> &Identity {
        &self.identities[rng.random_range(0..self.identities.len())]
    }
}
