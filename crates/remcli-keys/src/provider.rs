//! Collects the keys a client offers during authentication

use crate::error::KeyError;
use crate::keypair::KeyPair;
use crate::loader::load_key;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// File names tried under `~/.ssh` when no key is given explicitly
pub const DEFAULT_KEY_NAMES: &[&str] = &["id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

#[derive(Debug, Default, Clone)]
pub struct KeyProvider {
    keys: Vec<Arc<KeyPair>>,
}

impl KeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing default key files, in preference order
    pub fn default_key_files() -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        Self::key_files_in(&home.join(".ssh"))
    }

    fn key_files_in(dir: &Path) -> Vec<PathBuf> {
        DEFAULT_KEY_NAMES
            .iter()
            .map(|name| dir.join(name))
            .filter(|path| path.is_file())
            .collect()
    }

    /// Load one key file; any error is returned to the caller
    pub fn read_key(
        &mut self,
        path: impl AsRef<Path>,
        passphrase: Option<&str>,
    ) -> Result<(), KeyError> {
        let key = load_key(path, passphrase)?;
        debug!("loaded {:?}", key);
        self.keys.push(Arc::new(key));
        Ok(())
    }

    /// Load whatever default keys can be loaded, skipping the rest with a warning
    ///
    /// Returns how many keys were added.
    pub fn read_default_keys(&mut self, passphrase: Option<&str>) -> usize {
        self.read_keys_from(&Self::default_key_files(), passphrase)
    }

    fn read_keys_from(&mut self, files: &[PathBuf], passphrase: Option<&str>) -> usize {
        let before = self.keys.len();
        for path in files {
            if let Err(err) = self.read_key(path, passphrase) {
                warn!("Failed to load {}: {}", path.display(), err);
            }
        }
        self.keys.len() - before
    }

    pub fn keys(&self) -> &[Arc<KeyPair>] {
        &self.keys
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

    #[test]
    fn test_default_names_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::copy(
            Path::new(FIXTURES).join("ed25519_openssh"),
            dir.path().join("id_ed25519"),
        )
        .unwrap();
        std::fs::write(dir.path().join("id_rsa"), "garbage").unwrap();
        std::fs::write(dir.path().join("unrelated"), "garbage").unwrap();

        let files = KeyProvider::key_files_in(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("id_rsa"), dir.path().join("id_ed25519")]
        );

        let mut provider = KeyProvider::new();
        assert_eq!(provider.read_keys_from(&files, None), 1);
        assert!(provider.has_keys());
        assert_eq!(provider.keys()[0].comment(), "remcli-test");
    }
}
