//! Rule-driven random string generation.

use crate::error::{PolicyError, PolicyResult};
use crate::rules::{CharsetRule, Rule};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shortest string a generator may produce.
pub const MIN_LENGTH: usize = 10;

/// Default generation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Length of passwords produced by [`StringGenerator::default_password`].
pub const DEFAULT_PASSWORD_LENGTH: usize = 20;

/// Lowercase ASCII letters.
pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
/// Uppercase ASCII letters.
pub const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// ASCII digits.
pub const NUMERIC: &str = "0123456789";
/// The dash used by the default password policy.
pub const DASH: &str = "-";

/// Ordered list of rules with equality by kind and configuration.
#[derive(Debug, Clone, Default)]
pub struct Rules(pub Vec<Arc<dyn Rule>>);

impl PartialEq for Rules {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a.kind() == b.kind() && a.data() == b.data())
    }
}

impl Eq for Rules {}

/// Generates random strings of a fixed length that satisfy every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringGenerator {
    length: usize,
    rules: Rules,
    charset: Vec<char>,
}

impl StringGenerator {
    /// Build and validate a generator.
    ///
    /// # Errors
    ///
    /// Fails when the length is below [`MIN_LENGTH`], the rule minimums do
    /// not fit, or the aggregate charset is empty, larger than 256 runes, or
    /// contains non-printable runes.
    pub fn new(length: usize, rules: Vec<Arc<dyn Rule>>) -> PolicyResult<Self> {
        let charset = aggregate_charset(&rules);
        let generator = Self {
            length,
            rules: Rules(rules),
            charset,
        };
        generator.validate()?;
        Ok(generator)
    }

    /// The generator behind default passwords: 20 runes from `[A-Za-z0-9-]`
    /// with at least one of each class.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature mirrors [`StringGenerator::new`].
    pub fn default_password() -> PolicyResult<Self> {
        let rules: Vec<Arc<dyn Rule>> = vec![
            Arc::new(CharsetRule::new(LOWERCASE, 1)?),
            Arc::new(CharsetRule::new(UPPERCASE, 1)?),
            Arc::new(CharsetRule::new(NUMERIC, 1)?),
            Arc::new(CharsetRule::new(DASH, 1)?),
        ];
        Self::new(DEFAULT_PASSWORD_LENGTH, rules)
    }

    /// Requested length in runes.
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Rules in declaration order.
    #[must_use]
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules.0
    }

    /// Sorted, deduplicated union of every rule's characters.
    #[must_use]
    pub fn charset(&self) -> &[char] {
        &self.charset
    }

    fn validate(&self) -> PolicyResult<()> {
        if self.length < MIN_LENGTH {
            return Err(PolicyError::LengthTooShort {
                length: self.length,
                min: MIN_LENGTH,
            });
        }

        let required: usize = self.rules.0.iter().map(|r| r.min_length()).sum();
        if required > self.length {
            return Err(PolicyError::RulesExceedLength {
                required,
                length: self.length,
            });
        }

        if self.charset.is_empty() {
            return Err(PolicyError::EmptyCharset);
        }
        if self.charset.len() > 256 {
            return Err(PolicyError::CharsetTooLarge(self.charset.len()));
        }
        if let Some(c) = self.charset.iter().find(|c| !is_printable(**c)) {
            return Err(PolicyError::NonPrintable(*c));
        }
        Ok(())
    }

    /// Generate a string under [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Timeout`] if no candidate satisfied every rule
    /// in time.
    pub fn generate(&self) -> PolicyResult<String> {
        self.generate_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Generate a string under a custom deadline.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Timeout`] if no candidate satisfied every rule
    /// in time.
    pub fn generate_with_timeout(&self, timeout: Duration) -> PolicyResult<String> {
        self.generate_with_rng(&mut OsRng, timeout)
    }

    /// Generate using a caller-supplied random source.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Timeout`] when the deadline passes, or
    /// [`PolicyError::Random`] if the source fails.
    pub fn generate_with_rng<R: RngCore>(&self, rng: &mut R, timeout: Duration) -> PolicyResult<String> {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let candidate = random_runes(rng, &self.charset, self.length)?;
            if self.rules.0.iter().all(|rule| rule.pass(&candidate)) {
                if attempts > 1 {
                    tracing::trace!(attempts, "generated string after retries");
                }
                return Ok(candidate.into_iter().collect());
            }
            if Instant::now() >= deadline {
                return Err(PolicyError::Timeout(timeout));
            }
        }
    }
}

/// Draw `length` runes uniformly from `charset`.
///
/// Bytes at or above the largest multiple of `charset.len()` that fits in a
/// byte are discarded, so every rune is equally likely.
///
/// # Errors
///
/// Returns an error if the charset is empty or larger than 256 runes, or if
/// the random source fails.
pub fn random_runes<R: RngCore>(rng: &mut R, charset: &[char], length: usize) -> PolicyResult<Vec<char>> {
    let n = charset.len();
    if n == 0 {
        return Err(PolicyError::EmptyCharset);
    }
    if n > 256 {
        return Err(PolicyError::CharsetTooLarge(n));
    }
    let max_allowed = (256 / n) * n;

    let mut runes = Vec::with_capacity(length);
    let mut buf = vec![0u8; length.max(16) * 2];
    while runes.len() < length {
        rng.try_fill_bytes(&mut buf)?;
        for &b in &buf {
            let b = usize::from(b);
            if b >= max_allowed {
                continue;
            }
            runes.push(charset[b % n]);
            if runes.len() == length {
                break;
            }
        }
    }
    Ok(runes)
}

fn aggregate_charset(rules: &[Arc<dyn Rule>]) -> Vec<char> {
    let mut charset: Vec<char> = rules.iter().flat_map(|r| r.chars().iter().copied()).collect();
    charset.sort_unstable();
    charset.dedup();
    charset
}

fn is_printable(c: char) -> bool {
    !c.is_control() && (c == ' ' || !c.is_whitespace())
}
