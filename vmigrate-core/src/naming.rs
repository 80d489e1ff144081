//! Session-scoped, length-bounded resource names.
//!
//! Every name handed to the cluster or to a provider embeds the session
//! token, so concurrently running sessions never collide without any
//! distributed locking.

use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::id::SessionId;

/// Length ceiling for object names (DNS-1123 label).
pub const MAX_NAME_LEN: usize = 63;

/// Hex characters of the SHA-256 tag inserted when a base is truncated.
const TAG_LEN: usize = 6;

/// Produces names of the form `<base>-<session>[-<seq>]`.
///
/// Owned by one execution context; the sequence counter is what makes
/// [`NameGenerator::fresh`] unique for the life of the session.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    session: SessionId,
    next: u64,
}

impl NameGenerator {
    /// Create a generator for the given session.
    #[must_use]
    pub fn new(session: SessionId) -> Self {
        Self { session, next: 0 }
    }

    /// The session this generator scopes names to.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Deterministic name for `(base, session)`.
    ///
    /// Use this when a second request for the same base should resolve to the
    /// same object (idempotent reuse).
    #[must_use]
    pub fn scoped(&self, base: &str) -> String {
        compose(&sanitize(base), &self.session, self.session.as_str())
    }

    /// A name never returned before by this generator.
    pub fn fresh(&mut self, base: &str) -> String {
        let seq = self.next;
        self.next += 1;
        let suffix = format!("{}-{seq:x}", self.session);
        compose(&sanitize(base), &self.session, &suffix)
    }
}

/// Lowercase `base` and collapse anything outside `[a-z0-9]` into single `-`.
///
/// Never returns an empty string.
#[must_use]
pub fn sanitize(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "r".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Join a sanitized base and a suffix, truncating the base when the result
/// would exceed [`MAX_NAME_LEN`].
///
/// Truncation keeps the suffix intact and inserts a short tag hashed over the
/// full base and the session, so long bases sharing a prefix stay distinct.
fn compose(base: &str, session: &SessionId, suffix: &str) -> String {
    let full = format!("{base}-{suffix}");
    if full.len() <= MAX_NAME_LEN {
        return full;
    }

    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    hasher.update(b"/");
    hasher.update(session.as_str().as_bytes());
    let digest = hasher.finalize();
    let tag: String = digest.iter().map(|b| format!("{b:02x}")).collect::<String>()[..TAG_LEN].to_owned();

    let room = MAX_NAME_LEN.saturating_sub(suffix.len() + TAG_LEN + 2);
    let prefix = base[..room.min(base.len())].trim_end_matches('-');
    if prefix.is_empty() {
        format!("{tag}-{suffix}")
    } else {
        format!("{prefix}-{tag}-{suffix}")
    }
}

/// Check that an explicit name is a valid DNS-1123 label.
///
/// # Errors
/// Returns [`CoreError::InvalidName`] describing the first violated rule.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    let reason = if name.is_empty() {
        Some("must not be empty".to_owned())
    } else if name.len() > MAX_NAME_LEN {
        Some(format!("{} characters exceeds the {MAX_NAME_LEN} character limit", name.len()))
    } else if !name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-') {
        Some("only lowercase letters, digits and '-' are allowed".to_owned())
    } else if name.starts_with('-') || name.ends_with('-') {
        Some("must start and end with an alphanumeric character".to_owned())
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::InvalidName { name: name.to_owned(), reason }),
        None => Ok(()),
    }
}
