//! Identifier Generation
//!
//! Short random tokens drawn uniformly from `[a-zA-Z0-9]`, used as keys for
//! sessions, players and world entities.
//!
//! Tokens are only probabilistically unique. Callers that insert into a keyed
//! collection go through [`fresh_id`], which regenerates until the token is
//! unused.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a random alphanumeric token of `len` characters.
///
/// # Example
///
/// ```
/// use arena_sync::core::id::random_id;
///
/// let id = random_id(&mut rand::thread_rng(), 8);
/// assert_eq!(id.len(), 8);
/// assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
/// ```
pub fn random_id<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Generate a token of `len` characters for which `taken` returns false.
#[inline]
pub fn fresh_id<R, F>(rng: &mut R, len: usize, taken: F) -> String
where
    R: Rng + ?Sized,
    F: Fn(&str) -> bool,
{
    loop {
        let id = random_id(rng, len);
        if !taken(&id) {
            return id;
        }
    }
}
