use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

use crate::error::{MediaError, Result};

/// Length of a medium identity token. 255 alphanumeric characters carry
/// about 1500 bits of entropy.
pub const TOKEN_LENGTH: usize = 255;

/// How many fresh tokens to try before giving up on finding an unused one
const MAX_TOKEN_ATTEMPTS: usize = 4;

/// Produces opaque identity strings for devices
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Alphanumeric tokens drawn from the operating system's CSPRNG
#[derive(Debug, Clone, Copy)]
pub struct OsTokenGenerator {
    length: usize,
}

impl OsTokenGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for OsTokenGenerator {
    fn default() -> Self {
        Self::new(TOKEN_LENGTH)
    }
}

impl TokenGenerator for OsTokenGenerator {
    fn generate(&self) -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

/// Generate a token that `is_taken` reports as unused.
///
/// Collisions are practically impossible with the default generator, so this
/// mostly guards against weak custom generators. The catalog's UNIQUE
/// constraint still backs it up at insert time.
pub fn generate_unused(
    generator: &dyn TokenGenerator,
    mut is_taken: impl FnMut(&str) -> Result<bool>,
) -> Result<String> {
    for _ in 0..MAX_TOKEN_ATTEMPTS {
        let token = generator.generate();
        if !is_taken(&token)? {
            return Ok(token);
        }
        tracing::warn!("Generated identity token already in use, retrying");
    }
    Err(MediaError::DuplicateToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sequence(AtomicUsize);

    impl TokenGenerator for Sequence {
        fn generate(&self) -> String {
            format!("token{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[test]
    fn test_token_shape() {
        let token = OsTokenGenerator::default().generate();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_tokens_differ() {
        let generator = OsTokenGenerator::new(32);
        assert_ne!(generator.generate(), generator.generate());
    }

    #[test]
    fn test_generate_unused_retries() {
        let generator = Sequence(AtomicUsize::new(0));
        let token = generate_unused(&generator, |t| Ok(t == "token0")).unwrap();
        assert_eq!(token, "token1");
    }

    #[test]
    fn test_generate_unused_gives_up() {
        let generator = Sequence(AtomicUsize::new(0));
        let err = generate_unused(&generator, |_| Ok(true)).unwrap_err();
        assert!(matches!(err, MediaError::DuplicateToken));
    }
}
