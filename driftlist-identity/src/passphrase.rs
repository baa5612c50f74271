//! Passphrase generation and deterministic identity derivation.

use crate::{IdentityError, IdentityResult};
use driftlist_types::Identity;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generates a 12-word BIP39 mnemonic passphrase with 128 bits of entropy.
pub fn generate_passphrase() -> IdentityResult<String> {
    let mut entropy = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut entropy);

    let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
        .map_err(|e| IdentityError::Generation(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// Derives the identity for a passphrase.
///
/// Pure and deterministic: the phrase is validated against the BIP39
/// wordlist and checksum, stretched to the standard 64-byte seed, hashed
/// with SHA-256, and the first 64 bits are rendered as 16 lowercase hex
/// characters. The same phrase yields the same identity on every device and
/// every invocation; no network or storage access occurs.
///
/// Empty or whitespace-only input fails with [`IdentityError::InvalidInput`],
/// as does anything that is not a well-formed mnemonic — a typo must fail
/// fast rather than silently derive a fresh empty namespace.
pub fn derive_identity(passphrase: &str) -> IdentityResult<Identity> {
    let trimmed = passphrase.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::InvalidInput(
            "passphrase is empty".to_string(),
        ));
    }

    let mnemonic: bip39::Mnemonic = trimmed
        .parse()
        .map_err(|e| IdentityError::InvalidInput(format!("not a valid mnemonic: {e}")))?;

    let seed = mnemonic.to_seed("");
    let digest = Sha256::digest(seed);
    let id = hex::encode(&digest[..8]);

    Ok(Identity::parse(&id).expect("sha256 prefix is always 16 lowercase hex chars"))
}
