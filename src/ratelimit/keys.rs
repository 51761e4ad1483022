//! Bucket key derivation.

use std::fmt;

/// What a bucket entry stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// The window's ceiling
    Quota,
    /// Requests left in the window
    Remaining,
    /// Epoch second at which the window ends
    Reset,
}

impl KeyPurpose {
    /// The fixed key segment for this purpose.
    pub fn segment(&self) -> &'static str {
        match self {
            KeyPurpose::Quota => "Quota",
            KeyPurpose::Remaining => "Remaining",
            KeyPurpose::Reset => "Reset",
        }
    }

    /// Build the store key: `{namespace}:{segment}:{identifier}`.
    pub fn key(&self, namespace: &str, identifier: &str) -> String {
        format!("{}:{}:{}", namespace, self.segment(), identifier)
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// The three store keys backing one identifier's bucket.
///
/// Derived per call and never cached: the store is the only authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKeys {
    pub quota: String,
    pub remaining: String,
    pub reset: String,
}

impl BucketKeys {
    pub fn new(namespace: &str, identifier: &str) -> Self {
        Self {
            quota: KeyPurpose::Quota.key(namespace, identifier),
            remaining: KeyPurpose::Remaining.key(namespace, identifier),
            reset: KeyPurpose::Reset.key(namespace, identifier),
        }
    }

    /// Keys in bulk-read order: quota, remaining, reset.
    pub fn as_array(&self) -> [&str; 3] {
        [self.quota.as_str(), self.remaining.as_str(), self.reset.as_str()]
    }

    /// The key holding the given purpose.
    pub fn get(&self, purpose: KeyPurpose) -> &str {
        match purpose {
            KeyPurpose::Quota => &self.quota,
            KeyPurpose::Remaining => &self.remaining,
            KeyPurpose::Reset => &self.reset,
        }
    }
}

impl fmt::Display for BucketKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remaining)
    }
}
