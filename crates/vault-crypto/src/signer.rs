use serde::{Deserialize, Serialize};

/// Ed25519 signing key (private).
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Ed25519 verifying key (public).
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

/// Ed25519 signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "signature_serde")] ed25519_dalek::Signature);

/// Errors from signing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key")]
    InvalidKey,
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Signs the canonical bytes of a commit record.
///
/// Implemented by whatever owns the user's identity; the object model only
/// hands over bytes and stores the returned signature next to the signer's
/// public key.
pub trait CommitSigner: Send + Sync {
    /// Sign `message`.
    fn sign_commit(&self, message: &[u8]) -> Result<Signature, SignatureError>;

    /// The public key verifiers should check the signature against.
    fn public_key(&self) -> VerifyingKey;
}

/// Verifies a commit signature against a known public key.
///
/// Returns `Ok(false)` for a well-formed signature that does not match;
/// `Err` is reserved for failures of the verifier itself.
pub trait CommitVerifier: Send + Sync {
    fn verify_commit(
        &self,
        message: &[u8],
        signature: &Signature,
        key: &VerifyingKey,
    ) -> Result<bool, SignatureError>;
}

/// Plain Ed25519 verification with no key registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl CommitVerifier for Ed25519Verifier {
    fn verify_commit(
        &self,
        message: &[u8],
        signature: &Signature,
        key: &VerifyingKey,
    ) -> Result<bool, SignatureError> {
        Ok(key.verify(message, signature).is_ok())
    }
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create from raw 32-byte secret.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// The corresponding public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message))
    }

    /// Raw secret key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl CommitSigner for SigningKey {
    fn sign_commit(&self, message: &[u8]) -> Result<Signature, SignatureError> {
        Ok(self.sign(message))
    }

    fn public_key(&self) -> VerifyingKey {
        self.verifying_key()
    }
}

impl VerifyingKey {
    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        use ed25519_dalek::Verifier;
        self.0
            .verify(message, &signature.0)
            .map_err(|_| SignatureError::InvalidSignature)
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Create from raw 32-byte public key.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, SignatureError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self(key))
    }
}

impl Signature {
    /// Raw 64-byte signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    /// Rebuild from raw 64 bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(&bytes))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", hex::encode(self.0.to_bytes()))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0.to_bytes()[..8]))
    }
}

mod signature_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(sig: &ed25519_dalek::Signature, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&sig.to_bytes())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ed25519_dalek::Signature, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 64-byte signature"))?;
        Ok(ed25519_dalek::Signature::from_bytes(&arr))
    }
}
