//! Attestation primitives
//!
//! Pure helpers for the challenge-response flow: nonce handling, DER
//! re-encoding of the raw signature returned at the tail of the
//! attestation payload, and ECDSA P-384 verification over SHA-384.
//! File orchestration lives with the CLI; everything here operates on
//! byte slices so it can be tested without a device.

use std::time::{SystemTime, UNIX_EPOCH};

use p384::ecdsa::signature::DigestVerifier;
use p384::ecdsa::{Signature, VerifyingKey};
use p384::pkcs8::DecodePublicKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha384};

use crate::error::AttestationError;
use crate::protocol::{NONCE_LEN, SIGNATURE_SIZE};

// ============================================================================
// Status Lines
// ============================================================================

pub const STATUS_SUCCESS: &str = "Completed successfully.";
pub const STATUS_NONCE_MISMATCH: &str = "Failed.Random numbers are different.";
pub const STATUS_SIGNATURE_INVALID: &str = "Failed.Signature validation failure.";
pub const STATUS_SIGNATURE_EXCEPTION: &str = "Failed.Exception during signature validation.";
pub const STATUS_BAD_NONCE: &str = "Failed. Check the custom provided random numbers.";
pub const STATUS_INTERNAL: &str = "Failed.Other internal failures.";

// ============================================================================
// Scratch Directory Filenames
// ============================================================================

pub const RESPONSE_FILE: &str = "sign_response.bin";
pub const DATA_FILE: &str = "sign_data.bin";
pub const SIGNATURE_FILE: &str = "signature.bin";
pub const STATUS_FILE: &str = "attest_status.txt";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

// ============================================================================
// Nonce Handling
// ============================================================================

/// Parse a caller-supplied nonce of 32 hex-encoded bytes
pub fn parse_nonce_hex(input: &str) -> Result<[u8; NONCE_LEN], AttestationError> {
    let trimmed = input.trim();
    if trimmed.len() != NONCE_LEN * 2 {
        return Err(AttestationError::BadNonce(format!(
            "expected {} hex characters, got {}",
            NONCE_LEN * 2,
            trimmed.len()
        )));
    }
    let bytes =
        hex::decode(trimmed).map_err(|e| AttestationError::BadNonce(e.to_string()))?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes);
    Ok(nonce)
}

/// Generate a challenge nonce from a wall-clock seeded PRNG
///
/// Each byte is drawn from 0..100, matching what the CEC tooling
/// historically sends.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut nonce = [0u8; NONCE_LEN];
    for byte in &mut nonce {
        *byte = rng.gen_range(0..100);
    }
    nonce
}

/// Check that the payload echoes the challenge nonce at offset 0
pub fn check_nonce_echo(payload: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<(), AttestationError> {
    if payload.len() < NONCE_LEN || &payload[..NONCE_LEN] != nonce {
        return Err(AttestationError::NonceMismatch);
    }
    Ok(())
}

// ============================================================================
// Signature Handling
// ============================================================================

/// DER-encode the raw 96-byte signature tail of an attestation payload
///
/// The tail carries the two 48-byte big-endian halves r and s; the
/// result is `SEQUENCE{INTEGER r, INTEGER s}` with a 0x00 pad byte
/// prepended to a half whose most significant bit is set.
pub fn der_signature(tail: &[u8]) -> Result<Vec<u8>, AttestationError> {
    if tail.len() != SIGNATURE_SIZE {
        return Err(AttestationError::SignatureInvalid(format!(
            "signature tail of {} bytes, expected {}",
            tail.len(),
            SIGNATURE_SIZE
        )));
    }
    let r = p384::FieldBytes::clone_from_slice(&tail[..SIGNATURE_SIZE / 2]);
    let s = p384::FieldBytes::clone_from_slice(&tail[SIGNATURE_SIZE / 2..]);
    let signature = Signature::from_scalars(r, s)
        .map_err(|e| AttestationError::SignatureInvalid(e.to_string()))?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Recover the raw r and s halves from a DER signature
pub fn split_der_signature(
    der: &[u8],
) -> Result<([u8; SIGNATURE_SIZE / 2], [u8; SIGNATURE_SIZE / 2]), AttestationError> {
    let signature = Signature::from_der(der)
        .map_err(|e| AttestationError::SignatureInvalid(e.to_string()))?;
    let (r, s) = signature.split_bytes();
    let mut r_half = [0u8; SIGNATURE_SIZE / 2];
    let mut s_half = [0u8; SIGNATURE_SIZE / 2];
    r_half.copy_from_slice(&r);
    s_half.copy_from_slice(&s);
    Ok((r_half, s_half))
}

/// Verify a DER signature over SHA-384 hashed data with a PEM public key
pub fn verify_signature(
    data: &[u8],
    der: &[u8],
    public_key_pem: &str,
) -> Result<bool, AttestationError> {
    let key = VerifyingKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AttestationError::SignatureInvalid(format!("load key failed: {e}")))?;
    let signature = Signature::from_der(der)
        .map_err(|e| AttestationError::SignatureInvalid(e.to_string()))?;
    Ok(key
        .verify_digest(Sha384::new_with_prefix(data), &signature)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p384::ecdsa::signature::DigestSigner;
    use p384::ecdsa::SigningKey;
    use p384::pkcs8::{EncodePublicKey, LineEnding};

    #[test]
    fn test_parse_nonce_hex() {
        let hex: String = (0..32).map(|i| format!("{i:02x}")).collect();
        let nonce = parse_nonce_hex(&hex).unwrap();
        assert_eq!(nonce[0], 0);
        assert_eq!(nonce[31], 31);
    }

    #[test]
    fn test_parse_nonce_rejects_bad_input() {
        assert!(parse_nonce_hex("0011").is_err());
        let bad: String = "zz".repeat(32);
        assert!(parse_nonce_hex(&bad).is_err());
    }

    #[test]
    fn test_generated_nonce_range() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.iter().all(|b| *b < 100));
    }

    #[test]
    fn test_nonce_echo() {
        let nonce: [u8; NONCE_LEN] = core::array::from_fn(|i| i as u8);
        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&[9u8; 64]);
        assert!(check_nonce_echo(&payload, &nonce).is_ok());

        // Scenario: first byte replaced
        payload[0] = 0xFF;
        assert!(matches!(
            check_nonce_echo(&payload, &nonce),
            Err(AttestationError::NonceMismatch)
        ));
    }

    #[test]
    fn test_der_roundtrip_recovers_halves() {
        let mut tail = [0u8; SIGNATURE_SIZE];
        tail[47] = 0x01;
        tail[95] = 0x02;
        let der = der_signature(&tail).unwrap();
        let (r, s) = split_der_signature(&der).unwrap();
        assert_eq!(r, tail[..48]);
        assert_eq!(s, tail[48..]);
    }

    #[test]
    fn test_der_pads_high_msb_halves() {
        let mut tail = [0u8; SIGNATURE_SIZE];
        tail[0] = 0x80;
        tail[47] = 0x01;
        tail[48] = 0x80;
        tail[95] = 0x02;
        let der = der_signature(&tail).unwrap();
        // SEQUENCE, len, INTEGER, 49 bytes with leading 0x00 pad
        assert_eq!(der[0], 0x30);
        assert_eq!(der[2], 0x02);
        assert_eq!(der[3], 49);
        assert_eq!(der[4], 0x00);
        assert_eq!(der[5], 0x80);

        let (r, s) = split_der_signature(&der).unwrap();
        assert_eq!(r, tail[..48]);
        assert_eq!(s, tail[48..]);
    }

    #[test]
    fn test_der_rejects_wrong_length() {
        assert!(der_signature(&[0u8; 95]).is_err());
        assert!(der_signature(&[0u8; 97]).is_err());
    }

    #[test]
    fn test_verify_signature_roundtrip() {
        let key = SigningKey::from_slice(&[7u8; 48]).unwrap();
        let pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let data = b"attestation payload without trailing signature";
        let signature: Signature = key.sign_digest(Sha384::new_with_prefix(data));
        let der = signature.to_der();

        assert!(verify_signature(data, der.as_bytes(), &pem).unwrap());

        // Tampered data must not verify
        assert!(!verify_signature(b"tampered", der.as_bytes(), &pem).unwrap());
    }

    #[test]
    fn test_verify_signature_bad_key() {
        let result = verify_signature(b"data", &[0x30, 0x00], "not a pem key");
        assert!(result.is_err());
    }
}
