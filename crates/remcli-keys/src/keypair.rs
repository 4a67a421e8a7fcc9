use crate::error::KeyError;
use crate::SIGNATURE_NAMESPACE;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey, PublicKey, SshSig};
use std::fmt;

/// A loaded private key and its public half
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    pub(crate) fn new(private: PrivateKey) -> Self {
        Self {
            public: private.public_key().clone(),
            private,
        }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }

    pub fn algorithm(&self) -> Algorithm {
        self.public.algorithm()
    }

    pub fn comment(&self) -> &str {
        self.private.comment()
    }

    /// The public key in `authorized_keys` format
    pub fn public_key_openssh(&self) -> Result<String, KeyError> {
        self.public
            .to_openssh()
            .map_err(|e| KeyError::Signing(e.to_string()))
    }

    /// SHA-256 fingerprint, e.g. `SHA256:...`
    pub fn fingerprint(&self) -> String {
        self.public.fingerprint(HashAlg::Sha256).to_string()
    }

    /// Sign a server challenge
    pub fn sign_challenge(&self, challenge: &[u8]) -> Result<SshSig, KeyError> {
        self.private
            .sign(SIGNATURE_NAMESPACE, HashAlg::Sha512, challenge)
            .map_err(|e| KeyError::Signing(e.to_string()))
    }

    /// Sign a server challenge and armor the signature
    pub fn sign_challenge_pem(&self, challenge: &[u8]) -> Result<String, KeyError> {
        self.sign_challenge(challenge)?
            .to_pem(LineEnding::LF)
            .map_err(|e| KeyError::Signing(e.to_string()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
