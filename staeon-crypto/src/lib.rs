//! The ECDSA capability spec.md §1/§6 treats as an external collaborator:
//! Bitcoin-compatible recoverable secp256k1 signing, verification, and
//! base58check P2PKH-style address derivation, plus WIF key import/export
//! for the node-identity config file (spec.md §6 "Configuration").

use base64::Engine;
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use staeon_core::Address;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secret key: {0}")]
    BadSecretKey(String),
    #[error("invalid public key: {0}")]
    BadPublicKey(String),
    #[error("signature is not valid base64")]
    BadSignatureEncoding,
    #[error("signature has the wrong length (expected 65 bytes)")]
    BadSignatureLength,
    #[error("unrecognized recovery id")]
    BadRecoveryId,
    #[error("signature does not recover to a valid public key")]
    RecoveryFailed,
    #[error("WIF decode failed")]
    BadWif,
    #[error(transparent)]
    Address(#[from] staeon_core::AddressError),
}

#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

pub fn generate_keypair() -> KeyMaterial {
    let secp = Secp256k1::new();
    let secret_key = SecretKey::new(&mut OsRng);
    let public_key = PublicKey::from_secret_key(&secp, &secret_key);
    KeyMaterial {
        secret_key,
        public_key,
    }
}

fn message_from_bytes(msg: &[u8]) -> Message {
    let digest = Sha256::digest(msg);
    // A SHA-256 digest is always 32 bytes, so this never panics.
    Message::from_digest(digest.into())
}

/// Signs `msg` with `secret_key`, returning a base64-encoded recoverable
/// signature: one leading recovery-id byte followed by the 64-byte compact
/// signature.
pub fn sign(msg: &[u8], secret_key: &SecretKey) -> String {
    let secp = Secp256k1::new();
    let message = message_from_bytes(msg);
    let recoverable = secp.sign_ecdsa_recoverable(&message, secret_key);
    let (recid, compact) = recoverable.serialize_compact();
    let mut out = Vec::with_capacity(65);
    out.push(recid.to_i32() as u8);
    out.extend_from_slice(&compact);
    base64::engine::general_purpose::STANDARD.encode(out)
}

fn decode_recoverable(sig_b64: &str) -> Result<RecoverableSignature, CryptoError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(sig_b64)
        .map_err(|_| CryptoError::BadSignatureEncoding)?;
    if bytes.len() != 65 {
        return Err(CryptoError::BadSignatureLength);
    }
    let recid = RecoveryId::from_i32(bytes[0] as i32).map_err(|_| CryptoError::BadRecoveryId)?;
    RecoverableSignature::from_compact(&bytes[1..], recid)
        .map_err(|_| CryptoError::BadSignatureEncoding)
}

/// Recovers the public key that produced `sig_b64` over `msg`.
pub fn recover(msg: &[u8], sig_b64: &str) -> Result<PublicKey, CryptoError> {
    let recoverable = decode_recoverable(sig_b64)?;
    let message = message_from_bytes(msg);
    recoverable
        .recover_ecdsa(&message)
        .map_err(|_| CryptoError::RecoveryFailed)
}

/// Verifies that `sig_b64` is a valid signature over `msg` under `public_key`.
pub fn verify(msg: &[u8], sig_b64: &str, public_key: &PublicKey) -> Result<bool, CryptoError> {
    let recovered = recover(msg, sig_b64)?;
    Ok(&recovered == public_key)
}

/// Derives the base58check "1"-class address for a public key (`SHA-256`
/// then `RIPEMD-160` of the compressed key, as in spec.md §6).
pub fn pubkey_to_address(public_key: &PublicKey) -> Address {
    let sha = Sha256::digest(public_key.serialize());
    let ripe = Ripemd160::digest(sha);
    let mut hash160 = [0u8; 20];
    hash160.copy_from_slice(&ripe);
    Address::from_payload(&hash160)
}

pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_slice(bytes).map_err(|e| CryptoError::BadPublicKey(e.to_string()))
}

const WIF_VERSION: u8 = 0x80;

/// Encodes a secret key as a compressed-pubkey WIF string, the format the
/// node-identity file's second line holds (spec.md §6).
pub fn export_wif(secret_key: &SecretKey) -> String {
    let mut body = Vec::with_capacity(34);
    body.push(WIF_VERSION);
    body.extend_from_slice(&secret_key.secret_bytes());
    body.push(0x01); // compressed-public-key marker
    let digest1 = Sha256::digest(&body);
    let digest2 = Sha256::digest(digest1);
    body.extend_from_slice(&digest2[0..4]);
    bs58::encode(body).into_string()
}

/// Decodes a WIF private key string.
pub fn import_wif(wif: &str) -> Result<SecretKey, CryptoError> {
    let payload = bs58::decode(wif)
        .into_vec()
        .map_err(|_| CryptoError::BadWif)?;
    if payload.len() < 5 {
        return Err(CryptoError::BadWif);
    }
    let (body, checksum) = payload.split_at(payload.len() - 4);
    let digest1 = Sha256::digest(body);
    let digest2 = Sha256::digest(digest1);
    if &digest2[0..4] != checksum {
        return Err(CryptoError::BadWif);
    }
    if body.first().copied() != Some(WIF_VERSION) {
        return Err(CryptoError::BadWif);
    }
    let key_bytes = match body.len() {
        33 => &body[1..33],
        34 => &body[1..33], // trailing compressed-pubkey marker byte ignored
        _ => return Err(CryptoError::BadWif),
    };
    SecretKey::from_slice(key_bytes).map_err(|e| CryptoError::BadSecretKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = generate_keypair();
        let msg = b"staeon transaction payload";
        let sig = sign(msg, &kp.secret_key);
        assert!(verify(msg, &sig, &kp.public_key).unwrap());
    }

    #[test]
    fn recover_matches_signer() {
        let kp = generate_keypair();
        let msg = b"another message";
        let sig = sign(msg, &kp.secret_key);
        let recovered = recover(msg, &sig).unwrap();
        assert_eq!(recovered, kp.public_key);
    }

    #[test]
    fn bit_flip_in_message_breaks_verification() {
        let kp = generate_keypair();
        let msg = b"integrity matters";
        let sig = sign(msg, &kp.secret_key);
        let mut mutated = msg.to_vec();
        mutated[0] ^= 0x01;
        assert!(!verify(&mutated, &sig, &kp.public_key).unwrap());
    }

    #[test]
    fn bit_flip_in_signature_breaks_verification() {
        let kp = generate_keypair();
        let msg = b"integrity matters";
        let sig = sign(msg, &kp.secret_key);
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&sig)
            .unwrap();
        raw[10] ^= 0x01;
        let mutated_sig = base64::engine::general_purpose::STANDARD.encode(raw);
        let result = verify(msg, &mutated_sig, &kp.public_key);
        assert!(result.is_err() || !result.unwrap());
    }

    #[test]
    fn address_starts_with_one() {
        let kp = generate_keypair();
        let addr = pubkey_to_address(&kp.public_key);
        assert!(addr.as_str().starts_with('1'));
    }

    #[test]
    fn wif_roundtrip() {
        let kp = generate_keypair();
        let wif = export_wif(&kp.secret_key);
        let recovered = import_wif(&wif).unwrap();
        assert_eq!(recovered.secret_bytes(), kp.secret_key.secret_bytes());
    }
}
