//! Cryptographic channel between host and dialog.
//!
//! Two layers:
//!
//! - **Sealed tokens** for small secrets addressed to one key pair: the
//!   wrapped session key, every payload IV, and the handshake confirmation.
//!   A token is `ephemeral_public || AES-256-GCM(plaintext)`, keyed by
//!   HKDF-SHA256 over the X25519 agreement between a fresh ephemeral secret
//!   and the recipient's static key.
//! - **Bulk payloads** under the symmetric session key with AES-256-GCM and
//!   a fresh random 96-bit IV per message ([`SessionCipher`]).
//!
//! Sealing the IV as well as encrypting under the session key means a
//! message is only readable by the holder of both the session key and the
//! recipient's private key.
//!
//! # Invariants
//!
//! - **Domain Separation**: every sealed-token use has its own HKDF label,
//!   so a token minted for one purpose never opens as another.
//! - **No IV Reuse**: a [`SessionCipher`] refuses to encrypt under an IV it
//!   has already issued or accepted.
//! - **No Contributory Failure**: agreements with low-order points are
//!   rejected before any key is derived.
//!
//! All randomness comes from the [`Environment`].

use std::collections::HashSet;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use confdialog_proto::{IV_SIZE, PUBLIC_KEY_SIZE};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{env::Environment, error::CryptoError};

/// Symmetric key size
pub const KEY_SIZE: usize = 32;

/// AES-GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// Largest plaintext accepted by sealed tokens
pub const MAX_SEALED_PLAINTEXT: usize = 64;

/// IVs one session may issue and accept before it must be replaced
pub const MAX_SESSION_IVS: usize = 1 << 20;

/// Payload IV
pub type Iv = [u8; IV_SIZE];

/// Public key bytes as carried on the wire
pub type PublicKeyBytes = [u8; PUBLIC_KEY_SIZE];

/// X25519 key pair owned by one side of one session
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Public half, for the wire
    #[must_use]
    pub fn public_bytes(&self) -> PublicKeyBytes {
        self.public.to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Symmetric session key, zeroized on drop
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; KEY_SIZE]>);

impl SessionKey {
    /// SHA-256 of the key.
    ///
    /// Lets two sides (or a test) confirm they hold the same key without
    /// revealing it.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_slice()).into()
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey(<redacted>, fingerprint {})", hex::encode(&self.fingerprint()[..4]))
    }
}

/// Sealed-token use, mapped to an HKDF label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    WrapKey,
    SealIv,
    Request,
}

impl Purpose {
    const fn label(self) -> &'static [u8] {
        match self {
            Self::WrapKey => b"confdialog/v1/wrap-key",
            Self::SealIv => b"confdialog/v1/seal-iv",
            Self::Request => b"confdialog/v1/request",
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::WrapKey => "wrapped key",
            Self::SealIv => "sealed IV",
            Self::Request => "sealed request",
        }
    }
}

/// Generate a fresh key pair
pub fn generate_key_pair(env: &impl Environment) -> KeyPair {
    let secret = StaticSecret::from(env.random_array::<KEY_SIZE>());
    let public = PublicKey::from(&secret);
    KeyPair { secret, public }
}

/// Generate a fresh session key
pub fn generate_session_key(env: &impl Environment) -> SessionKey {
    SessionKey(Zeroizing::new(env.random_array::<KEY_SIZE>()))
}

/// Wrap `key` so that only the holder of `peer`'s private key can unwrap it
///
/// # Errors
///
/// Returns [`CryptoError::WeakPeerKey`] for low-order peer keys.
pub fn wrap_session_key(
    key: &SessionKey,
    peer: &PublicKeyBytes,
    env: &impl Environment,
) -> Result<Vec<u8>, CryptoError> {
    seal(key.0.as_slice(), peer, Purpose::WrapKey, env)
}

/// Recover a session key wrapped by [`wrap_session_key`]
///
/// # Errors
///
/// Returns [`CryptoError`] if the token is malformed, was not addressed to
/// `local`, or has been tampered with.
pub fn unwrap_session_key(token: &[u8], local: &KeyPair) -> Result<SessionKey, CryptoError> {
    let plaintext = open(token, local, Purpose::WrapKey)?;
    let bytes: [u8; KEY_SIZE] = plaintext.as_slice().try_into().map_err(|_| {
        CryptoError::Malformed { what: "session key", expected: KEY_SIZE, actual: plaintext.len() }
    })?;
    Ok(SessionKey(Zeroizing::new(bytes)))
}

/// Seal a payload IV to the peer
///
/// # Errors
///
/// Returns [`CryptoError::WeakPeerKey`] for low-order peer keys.
pub fn seal_iv(
    iv: &Iv,
    peer: &PublicKeyBytes,
    env: &impl Environment,
) -> Result<Vec<u8>, CryptoError> {
    seal(iv, peer, Purpose::SealIv, env)
}

/// Open a sealed IV
///
/// # Errors
///
/// Returns [`CryptoError`] if the token does not open or holds the wrong
/// number of bytes.
pub fn open_iv(token: &[u8], local: &KeyPair) -> Result<Iv, CryptoError> {
    let plaintext = open(token, local, Purpose::SealIv)?;
    plaintext.as_slice().try_into().map_err(|_| CryptoError::Malformed {
        what: "IV",
        expected: IV_SIZE,
        actual: plaintext.len(),
    })
}

/// Seal a short handshake request to the peer
///
/// # Errors
///
/// Returns [`CryptoError::PlaintextTooLarge`] or
/// [`CryptoError::WeakPeerKey`].
pub fn seal_request(
    request: &str,
    peer: &PublicKeyBytes,
    env: &impl Environment,
) -> Result<Vec<u8>, CryptoError> {
    seal(request.as_bytes(), peer, Purpose::Request, env)
}

/// Open a sealed handshake request
///
/// # Errors
///
/// Returns [`CryptoError`] if the token does not open.
pub fn open_request(token: &[u8], local: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    open(token, local, Purpose::Request).map(|plaintext| plaintext.to_vec())
}

fn seal(
    plaintext: &[u8],
    recipient: &PublicKeyBytes,
    purpose: Purpose,
    env: &impl Environment,
) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(CryptoError::PlaintextTooLarge {
            size: plaintext.len(),
            max: MAX_SEALED_PLAINTEXT,
        });
    }

    let ephemeral = StaticSecret::from(env.random_array::<KEY_SIZE>());
    let ephemeral_public = PublicKey::from(&ephemeral);
    let recipient = PublicKey::from(*recipient);

    let shared = ephemeral.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakPeerKey);
    }

    let (cipher, nonce) =
        sealing_cipher(shared.as_bytes(), ephemeral_public.as_bytes(), recipient.as_bytes(), purpose)?;
    let ciphertext =
        cipher.encrypt(Nonce::from_slice(&nonce), plaintext).map_err(|_| CryptoError::Encrypt)?;

    let mut token = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    token.extend_from_slice(ephemeral_public.as_bytes());
    token.extend_from_slice(&ciphertext);
    Ok(token)
}

fn open(
    token: &[u8],
    local: &KeyPair,
    purpose: Purpose,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let min = PUBLIC_KEY_SIZE + TAG_SIZE;
    if token.len() < min {
        return Err(CryptoError::Malformed { what: purpose.name(), expected: min, actual: token.len() });
    }

    let (ephemeral, ciphertext) = token.split_at(PUBLIC_KEY_SIZE);
    let ephemeral: PublicKeyBytes = ephemeral.try_into().map_err(|_| CryptoError::Malformed {
        what: purpose.name(),
        expected: min,
        actual: token.len(),
    })?;
    let ephemeral = PublicKey::from(ephemeral);

    let shared = local.secret.diffie_hellman(&ephemeral);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakPeerKey);
    }

    let (cipher, nonce) =
        sealing_cipher(shared.as_bytes(), ephemeral.as_bytes(), local.public.as_bytes(), purpose)?;
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt)
}

fn sealing_cipher(
    shared: &[u8; 32],
    ephemeral: &PublicKeyBytes,
    recipient: &PublicKeyBytes,
    purpose: Purpose,
) -> Result<(Aes256Gcm, Iv), CryptoError> {
    let mut salt = [0u8; 2 * PUBLIC_KEY_SIZE];
    salt[..PUBLIC_KEY_SIZE].copy_from_slice(ephemeral);
    salt[PUBLIC_KEY_SIZE..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE + IV_SIZE]);
    hk.expand(purpose.label(), &mut okm[..]).map_err(|_| CryptoError::KeyDerivation)?;

    let cipher =
        Aes256Gcm::new_from_slice(&okm[..KEY_SIZE]).map_err(|_| CryptoError::KeyDerivation)?;
    let mut nonce = [0u8; IV_SIZE];
    nonce.copy_from_slice(&okm[KEY_SIZE..]);
    Ok((cipher, nonce))
}

/// Bulk encryption under the session key.
///
/// Both directions share one key, so each side's cipher remembers the IVs
/// it issued and the IVs it accepted from the peer. Encrypting under any of
/// them, or accepting one twice, fails with [`CryptoError::IvReuse`].
///
/// The IV set lives as long as the session and holds at most
/// [`MAX_SESSION_IVS`] entries. Past that both directions fail with
/// [`CryptoError::SessionExhausted`]; the failed outbound seal closes the
/// session and the next dialog starts over with a fresh key.
pub struct SessionCipher {
    key: SessionKey,
    cipher: Aes256Gcm,
    seen: HashSet<Iv>,
    limit: usize,
}

impl SessionCipher {
    /// Create a cipher for a fresh session
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if the key is rejected.
    pub fn new(key: SessionKey) -> Result<Self, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(key.0.as_slice()).map_err(|_| CryptoError::KeyDerivation)?;
        Ok(Self { key, cipher, seen: HashSet::new(), limit: MAX_SESSION_IVS })
    }

    #[cfg(test)]
    fn with_iv_limit(key: SessionKey, limit: usize) -> Result<Self, CryptoError> {
        Ok(Self { limit, ..Self::new(key)? })
    }

    /// Session key in use
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Number of IVs issued or accepted so far
    #[must_use]
    pub fn ivs_seen(&self) -> usize {
        self.seen.len()
    }

    /// Encrypt under a fresh IV drawn from `env`
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IvReuse`] if `env` repeats an IV,
    /// [`CryptoError::SessionExhausted`] once the IV budget is spent, or
    /// [`CryptoError::Encrypt`].
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        env: &impl Environment,
    ) -> Result<(Vec<u8>, Iv), CryptoError> {
        self.check_budget()?;
        let iv: Iv = env.random_array();
        if !self.seen.insert(iv) {
            return Err(CryptoError::IvReuse);
        }

        let ciphertext =
            self.cipher.encrypt(Nonce::from_slice(&iv), plaintext).map_err(|_| CryptoError::Encrypt)?;
        Ok((ciphertext, iv))
    }

    /// Decrypt a peer message and remember its IV
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IvReuse`] for a replayed IV,
    /// [`CryptoError::SessionExhausted`] once the IV budget is spent, or
    /// [`CryptoError::Decrypt`].
    pub fn decrypt(&mut self, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.seen.contains(iv) {
            return Err(CryptoError::IvReuse);
        }
        self.check_budget()?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        self.seen.insert(*iv);
        Ok(plaintext)
    }

    fn check_budget(&self) -> Result<(), CryptoError> {
        if self.seen.len() >= self.limit {
            return Err(CryptoError::SessionExhausted { limit: self.limit });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("key", &self.key)
            .field("ivs_seen", &self.seen.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::testing::TestEnv;

    #[test]
    fn wrapped_key_unwraps_only_for_recipient() {
        let env = TestEnv::new(1);
        let dialog = generate_key_pair(&env);
        let stranger = generate_key_pair(&env);
        let key = generate_session_key(&env);

        let token = wrap_session_key(&key, &dialog.public_bytes(), &env).unwrap();

        let unwrapped = unwrap_session_key(&token, &dialog).unwrap();
        assert_eq!(unwrapped.fingerprint(), key.fingerprint());
        assert_eq!(unwrap_session_key(&token, &stranger).unwrap_err(), CryptoError::Decrypt);
    }

    #[test]
    fn sealed_iv_does_not_open_as_key() {
        let env = TestEnv::new(2);
        let local = generate_key_pair(&env);
        let token = seal_iv(&[7; IV_SIZE], &local.public_bytes(), &env).unwrap();

        assert_eq!(open_iv(&token, &local).unwrap(), [7; IV_SIZE]);
        assert_eq!(unwrap_session_key(&token, &local).unwrap_err(), CryptoError::Decrypt);
    }

    #[test]
    fn tampered_token_fails() {
        let env = TestEnv::new(3);
        let local = generate_key_pair(&env);
        let mut token = seal_request("GetConfiguration", &local.public_bytes(), &env).unwrap();
        let last = token.len() - 1;
        token[last] ^= 0x01;

        assert_eq!(open_request(&token, &local).unwrap_err(), CryptoError::Decrypt);
    }

    #[test]
    fn short_token_is_malformed() {
        let env = TestEnv::new(4);
        let local = generate_key_pair(&env);
        let result = open_iv(&[0; 20], &local);
        assert!(matches!(result, Err(CryptoError::Malformed { actual: 20, .. })));
    }

    #[test]
    fn sealing_rejects_large_plaintext() {
        let env = TestEnv::new(5);
        let local = generate_key_pair(&env);
        let request = "x".repeat(MAX_SEALED_PLAINTEXT + 1);
        let result = seal_request(&request, &local.public_bytes(), &env);
        assert!(matches!(result, Err(CryptoError::PlaintextTooLarge { .. })));
    }

    #[test]
    fn sealing_rejects_low_order_key() {
        let env = TestEnv::new(6);
        let result = seal_iv(&[1; IV_SIZE], &[0; PUBLIC_KEY_SIZE], &env);
        assert_eq!(result.unwrap_err(), CryptoError::WeakPeerKey);
    }

    #[test]
    fn session_cipher_roundtrip_and_replay() {
        let env = TestEnv::new(7);
        let key = generate_session_key(&env);
        let mut sender = SessionCipher::new(key.clone()).unwrap();
        let mut receiver = SessionCipher::new(key).unwrap();

        let (ciphertext, iv) = sender.encrypt(b"{\"lifecycle\":\"Close\"}", &env).unwrap();
        assert_eq!(receiver.decrypt(&iv, &ciphertext).unwrap(), b"{\"lifecycle\":\"Close\"}");
        assert_eq!(receiver.decrypt(&iv, &ciphertext).unwrap_err(), CryptoError::IvReuse);
    }

    #[test]
    fn session_cipher_refuses_repeated_iv() {
        #[derive(Clone)]
        struct StuckEnv;

        impl Environment for StuckEnv {
            type Instant = std::time::Instant;

            fn now(&self) -> Self::Instant {
                std::time::Instant::now()
            }

            async fn sleep(&self, _duration: std::time::Duration) {}

            fn random_bytes(&self, buffer: &mut [u8]) {
                buffer.fill(0x42);
            }
        }

        let mut cipher = SessionCipher::new(generate_session_key(&StuckEnv)).unwrap();
        assert!(cipher.encrypt(b"one", &StuckEnv).is_ok());
        assert_eq!(cipher.encrypt(b"two", &StuckEnv).unwrap_err(), CryptoError::IvReuse);
    }

    #[test]
    fn session_cipher_stops_at_iv_budget() {
        let env = TestEnv::new(9);
        let key = generate_session_key(&env);
        let mut sender = SessionCipher::with_iv_limit(key.clone(), 2).unwrap();
        let mut receiver = SessionCipher::with_iv_limit(key, 1).unwrap();

        let (first, first_iv) = sender.encrypt(b"one", &env).unwrap();
        let (second, second_iv) = sender.encrypt(b"two", &env).unwrap();
        assert_eq!(
            sender.encrypt(b"three", &env).unwrap_err(),
            CryptoError::SessionExhausted { limit: 2 }
        );
        assert_eq!(sender.ivs_seen(), 2);

        assert_eq!(receiver.decrypt(&first_iv, &first).unwrap(), b"one");
        assert_eq!(
            receiver.decrypt(&second_iv, &second).unwrap_err(),
            CryptoError::SessionExhausted { limit: 1 }
        );
        assert_eq!(receiver.decrypt(&first_iv, &first).unwrap_err(), CryptoError::IvReuse);
    }

    #[test]
    fn debug_redacts_key_material() {
        let env = TestEnv::new(8);
        let key = generate_session_key(&env);
        let debug = format!("{:?}", SessionCipher::new(key).unwrap());
        assert!(debug.contains("<redacted>"));
    }
}
