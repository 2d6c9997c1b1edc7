//! Ed25519 keypair identifying a node.

use crate::{P2pError, PeerId, Result};
use libp2p::identity;
use std::path::Path;
use zeroize::Zeroizing;

/// An Ed25519 keypair; its public half is the node's [`PeerId`] and it
/// authenticates every connection the node makes.
#[derive(Clone)]
pub struct Keypair {
    inner: identity::Keypair,
}

impl Keypair {
    /// Generates a new random keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            inner: identity::Keypair::generate_ed25519(),
        }
    }

    /// Creates a keypair from a secret key (32 bytes).
    ///
    /// # Errors
    ///
    /// Returns an error if the secret key has the wrong length.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let mut secret: Zeroizing<[u8; 32]> = Zeroizing::new(
            bytes
                .try_into()
                .map_err(|_| P2pError::InvalidKey("secret key must be 32 bytes".into()))?,
        );

        let inner = identity::Keypair::ed25519_from_bytes(&mut secret[..])
            .map_err(|e| P2pError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Loads the hex-encoded secret key at `path`, generating and saving a new
    /// one if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, or does not
    /// contain a valid key.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = Zeroizing::new(std::fs::read_to_string(path)?);
            let bytes = Zeroizing::new(hex::decode(contents.trim()).map_err(|e| {
                P2pError::InvalidKey(format!("malformed key file {}: {e}", path.display()))
            })?);
            return Self::from_secret_bytes(&bytes);
        }

        let keypair = Self::generate();
        let encoded = Zeroizing::new(hex::encode(*keypair.secret_bytes()?));
        write_private(path, encoded.as_bytes())?;
        tracing::info!(path = %path.display(), peer_id = %keypair.peer_id(), "Generated node identity");
        Ok(keypair)
    }

    /// Returns the peer id for this keypair.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId::from(self.inner.public().to_peer_id())
    }

    /// Returns the secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the keypair is not an Ed25519 key.
    pub fn secret_bytes(&self) -> Result<Zeroizing<[u8; 32]>> {
        let keypair = self
            .inner
            .clone()
            .try_into_ed25519()
            .map_err(|e| P2pError::InvalidKey(e.to_string()))?;
        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(keypair.secret().as_ref());
        Ok(secret)
    }

    /// Returns the libp2p identity the swarm runs under.
    pub(crate) fn to_identity(&self) -> identity::Keypair {
        self.inner.clone()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
