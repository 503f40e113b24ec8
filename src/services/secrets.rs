use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use thiserror::Error;
use tracing::debug;

const KEYCHAIN_SERVICE: &str = "calipso";
const KEYCHAIN_ACCOUNT: &str = "ai_api_key";
/// Settings value meaning "the key is in the OS keychain".
const KEYCHAIN_MARKER: &str = "keychain:calipso:ai_api_key";
/// Settings value prefix for a key sealed on this machine: base64(salt | nonce | ciphertext+tag).
const SEALED_PREFIX: &str = "sealed:v1:";
const SEAL_PASSPHRASE: &[u8] = b"calipso-secret-v1";
const SEAL_CONTEXT: &[u8] = b"calipso:ai_api_key";
const PBKDF2_ROUNDS: u32 = 100_000;
const SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("AI API key missing. Run `calipso settings set --api-key <KEY>` or set CALIPSO_API_KEY")]
    Missing,
    #[error("keychain: {0}")]
    Keychain(String),
    #[error("stored API key is malformed: {0}")]
    Malformed(&'static str),
    #[error("stored API key could not be decrypted")]
    Unseal,
    #[error("API key could not be encrypted")]
    Seal,
}

/// Where the key in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Override,
    Keychain,
    Sealed,
}

impl KeySource {
    pub fn describe(&self) -> &'static str {
        match self {
            KeySource::Override => "given on the command line or CALIPSO_API_KEY",
            KeySource::Keychain => "stored in system keychain",
            KeySource::Sealed => "stored encrypted",
        }
    }
}

#[derive(Debug, PartialEq)]
enum StoredKey {
    Keychain,
    Sealed(Vec<u8>),
}

impl StoredKey {
    fn parse(stored: &str) -> Result<Self, SecretError> {
        if stored == KEYCHAIN_MARKER {
            return Ok(StoredKey::Keychain);
        }
        let payload = stored
            .strip_prefix(SEALED_PREFIX)
            .ok_or(SecretError::Malformed("unknown format"))?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|_| SecretError::Malformed("not base64"))?;
        if bytes.len() < SALT_LEN + NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(SecretError::Malformed("truncated"));
        }
        Ok(StoredKey::Sealed(bytes))
    }

    fn source(&self) -> KeySource {
        match self {
            StoredKey::Keychain => KeySource::Keychain,
            StoredKey::Sealed(_) => KeySource::Sealed,
        }
    }
}

/// The key to call the AI service with. An explicit override wins over the
/// settings value, which points either at the keychain or at a sealed payload.
pub fn resolve_api_key(override_key: Option<&str>, stored: Option<&str>) -> Result<(String, KeySource), SecretError> {
    if let Some(key) = override_key.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok((key.to_string(), KeySource::Override));
    }
    let stored = StoredKey::parse(stored.ok_or(SecretError::Missing)?)?;
    let key = match &stored {
        StoredKey::Keychain => keychain_entry()?
            .get_password()
            .map_err(|e| SecretError::Keychain(e.to_string()))?,
        StoredKey::Sealed(bytes) => unseal(bytes)?,
    };
    Ok((key, stored.source()))
}

/// Settings value to persist for `api_key`: the keychain marker when the OS
/// keychain accepts it, a sealed payload otherwise.
pub fn protect_api_key(api_key: &str) -> Result<String, SecretError> {
    let stored = keychain_entry().and_then(|entry| {
        entry
            .set_password(api_key)
            .map_err(|e| SecretError::Keychain(e.to_string()))
    });
    match stored {
        Ok(()) => Ok(KEYCHAIN_MARKER.to_string()),
        Err(err) => {
            debug!("Keychain unavailable, sealing API key locally: {}", err);
            seal(api_key)
        }
    }
}

/// Human-readable state of the stored settings value, without unsealing it.
pub fn describe_stored(stored: Option<&str>) -> &'static str {
    match stored.map(StoredKey::parse) {
        None => "not set",
        Some(Ok(key)) => key.source().describe(),
        Some(Err(_)) => "unreadable",
    }
}

fn keychain_entry() -> Result<keyring::Entry, SecretError> {
    keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT).map_err(|e| SecretError::Keychain(e.to_string()))
}

fn sealing_key(salt: &[u8]) -> Result<LessSafeKey, SecretError> {
    let rounds = NonZeroU32::new(PBKDF2_ROUNDS).ok_or(SecretError::Seal)?;
    let mut key_bytes = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, rounds, salt, SEAL_PASSPHRASE, &mut key_bytes);
    let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| SecretError::Seal)?;
    Ok(LessSafeKey::new(unbound))
}

fn seal(plaintext: &str) -> Result<String, SecretError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill(&mut salt).map_err(|_| SecretError::Seal)?;
    rng.fill(&mut nonce).map_err(|_| SecretError::Seal)?;

    let mut sealed = plaintext.as_bytes().to_vec();
    sealing_key(&salt)?
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(SEAL_CONTEXT), &mut sealed)
        .map_err(|_| SecretError::Seal)?;

    let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&sealed);
    Ok(format!("{}{}", SEALED_PREFIX, STANDARD.encode(payload)))
}

fn unseal(payload: &[u8]) -> Result<String, SecretError> {
    let (salt, rest) = payload.split_at(SALT_LEN);
    let (nonce, sealed) = rest.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| SecretError::Malformed("nonce"))?;

    let mut data = sealed.to_vec();
    let plain = sealing_key(salt)?
        .open_in_place(nonce, Aad::from(SEAL_CONTEXT), &mut data)
        .map_err(|_| SecretError::Unseal)?;
    String::from_utf8(plain.to_vec()).map_err(|_| SecretError::Unseal)
}
