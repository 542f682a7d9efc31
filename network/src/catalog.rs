//! Static model catalog: every peer derives the content address of a model
//! from its identifier with the same digest, so the mapping is globally
//! agreed without any registration step.

use std::fmt;

use sha2::{Digest, Sha256};

/// Content-routing address of a hosted model.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentAddress(pub [u8; 32]);

impl ContentAddress {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({self})")
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Resolves a model identifier (e.g. `"llama3.2:latest"`) to its content
/// address.
pub fn content_address(model_id: &str) -> ContentAddress {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    ContentAddress(out)
}
