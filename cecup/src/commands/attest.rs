//! Challenge-response attestation flow
//!
//! Drives the Attestation command, reassembles the challenge response
//! from blocked reads, checks the nonce echo, and verifies the
//! trailing ECDSA signature when a public key is supplied. Results are
//! written to fixed filenames under the scratch directory:
//!
//! - `sign_response.bin`: full response payload
//! - `sign_data.bin`: payload minus the trailing signature
//! - `signature.bin`: DER-encoded ECDSA signature
//! - `attest_status.txt`: human-readable result

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::error;

use cecup_common::attest::{self, STATUS_SUCCESS};
use cecup_common::i2c::CecBus;
use cecup_common::protocol::{
    attestation_block_code, challenge_block_lens, NONCE_LEN, SIGNATURE_SIZE,
};

pub struct AttestArgs {
    pub data_size: u16,
    pub block_size: u16,
    pub public_key: Option<PathBuf>,
    pub nonce: Option<String>,
    pub dir: PathBuf,
}

/// Run one attestation round
pub fn run(bus: u8, addr: u8, args: AttestArgs) -> Result<()> {
    clean_scratch_dir(&args.dir)
        .with_context(|| format!("failed to prepare scratch dir {}", args.dir.display()))?;

    let nonce = match &args.nonce {
        Some(hex) => match attest::parse_nonce_hex(hex) {
            Ok(nonce) => nonce,
            Err(e) => {
                write_status(&args.dir, attest::STATUS_BAD_NONCE)?;
                return Err(e.into());
            }
        },
        None => attest::generate_nonce(),
    };

    // Stage the public key into the scratch directory when provided
    let staged_key = match &args.public_key {
        Some(source) if source.is_file() => {
            let staged = args.dir.join(attest::PUBLIC_KEY_FILE);
            fs::copy(source, &staged)
                .with_context(|| format!("failed to stage {}", source.display()))?;
            Some(staged)
        }
        Some(source) => {
            write_status(&args.dir, attest::STATUS_INTERNAL)?;
            anyhow::bail!("public key file {} does not exist", source.display());
        }
        None => None,
    };

    let (block_code, block_size) = attestation_block_code(args.block_size);

    let payload = match collect_payload(bus, addr, block_code, block_size, args.data_size, &nonce)
    {
        Ok(payload) => payload,
        Err(e) => {
            write_status(&args.dir, attest::STATUS_INTERNAL)?;
            return Err(e);
        }
    };

    if let Err(e) = attest::check_nonce_echo(&payload, &nonce) {
        write_status(&args.dir, attest::STATUS_NONCE_MISMATCH)?;
        return Err(e.into());
    }

    fs::write(args.dir.join(attest::RESPONSE_FILE), &payload)?;

    let status = match &staged_key {
        Some(key_path) => verify_payload(&args.dir, &payload, key_path)?,
        None => STATUS_SUCCESS,
    };

    // The staged key is an input, not an output
    if let Some(key_path) = staged_key {
        let _ = fs::remove_file(key_path);
    }

    write_status(&args.dir, status)?;
    println!("{status}");
    Ok(())
}

/// Start the attestation command and assemble the challenge response
fn collect_payload(
    bus: u8,
    addr: u8,
    block_code: u8,
    block_size: u16,
    data_size: u16,
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let mut device = CecBus::open(bus, addr)?;
    device.start_attestation(block_code, nonce)?;

    let mut payload = Vec::with_capacity(usize::from(data_size));
    for len in challenge_block_lens(data_size, block_size) {
        let block = device.read_challenge_block(len)?;
        payload.extend_from_slice(&block);
    }
    Ok(payload)
}

/// Split off the trailing signature, DER-encode it and verify
fn verify_payload(dir: &Path, payload: &[u8], key_path: &Path) -> Result<&'static str> {
    if payload.len() < SIGNATURE_SIZE {
        error!(
            payload_len = payload.len(),
            "payload too short to carry a signature"
        );
        return Ok(attest::STATUS_SIGNATURE_INVALID);
    }

    let data = &payload[..payload.len() - SIGNATURE_SIZE];
    fs::write(dir.join(attest::DATA_FILE), data)?;

    let der = match attest::der_signature(&payload[payload.len() - SIGNATURE_SIZE..]) {
        Ok(der) => der,
        Err(e) => {
            error!(error = %e, "could not encode the response signature");
            return Ok(attest::STATUS_SIGNATURE_EXCEPTION);
        }
    };
    fs::write(dir.join(attest::SIGNATURE_FILE), &der)?;

    let pem = fs::read_to_string(key_path)?;
    match attest::verify_signature(data, &der, &pem) {
        Ok(true) => Ok(STATUS_SUCCESS),
        Ok(false) => Ok(attest::STATUS_SIGNATURE_INVALID),
        Err(e) => {
            error!(error = %e, "exception during signature validation");
            Ok(attest::STATUS_SIGNATURE_EXCEPTION)
        }
    }
}

/// Remove the previous round's artifacts from the scratch directory
fn clean_scratch_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    for name in [
        attest::STATUS_FILE,
        attest::RESPONSE_FILE,
        attest::DATA_FILE,
        attest::SIGNATURE_FILE,
        attest::PUBLIC_KEY_FILE,
    ] {
        let path = dir.join(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

fn write_status(dir: &Path, status: &str) -> io::Result<()> {
    fs::write(dir.join(attest::STATUS_FILE), status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p384::ecdsa::signature::DigestSigner;
    use p384::ecdsa::{Signature, SigningKey};
    use p384::pkcs8::{EncodePublicKey, LineEnding};
    use sha2::{Digest, Sha384};
    use tempfile::TempDir;

    fn signed_payload(key: &SigningKey, data: &[u8]) -> Vec<u8> {
        let signature: Signature = key.sign_digest(Sha384::new_with_prefix(data));
        let (r, s) = signature.split_bytes();
        let mut payload = data.to_vec();
        payload.extend_from_slice(&r);
        payload.extend_from_slice(&s);
        payload
    }

    #[test]
    fn test_clean_scratch_dir_removes_previous_artifacts() {
        let dir = TempDir::new().unwrap();
        for name in [attest::STATUS_FILE, attest::RESPONSE_FILE, "unrelated.txt"] {
            fs::write(dir.path().join(name), b"stale").unwrap();
        }

        clean_scratch_dir(dir.path()).unwrap();

        assert!(!dir.path().join(attest::STATUS_FILE).exists());
        assert!(!dir.path().join(attest::RESPONSE_FILE).exists());
        // Unrelated files are left alone
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_verify_payload_accepts_device_signature() {
        let dir = TempDir::new().unwrap();
        let key = SigningKey::from_slice(&[11u8; 48]).unwrap();
        let pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let key_path = dir.path().join(attest::PUBLIC_KEY_FILE);
        fs::write(&key_path, pem).unwrap();

        let data = vec![0x5Au8; 561];
        let payload = signed_payload(&key, &data);
        assert_eq!(payload.len(), 657);

        let status = verify_payload(dir.path(), &payload, &key_path).unwrap();
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(fs::read(dir.path().join(attest::DATA_FILE)).unwrap(), data);
        assert!(dir.path().join(attest::SIGNATURE_FILE).exists());
    }

    #[test]
    fn test_verify_payload_rejects_tampered_data() {
        let dir = TempDir::new().unwrap();
        let key = SigningKey::from_slice(&[12u8; 48]).unwrap();
        let pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let key_path = dir.path().join(attest::PUBLIC_KEY_FILE);
        fs::write(&key_path, pem).unwrap();

        let data = vec![0x5Au8; 561];
        let mut payload = signed_payload(&key, &data);
        payload[0] ^= 0xFF;

        let status = verify_payload(dir.path(), &payload, &key_path).unwrap();
        assert_eq!(status, attest::STATUS_SIGNATURE_INVALID);
    }

    #[test]
    fn test_verify_payload_too_short() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join(attest::PUBLIC_KEY_FILE);
        fs::write(&key_path, "irrelevant").unwrap();

        let status = verify_payload(dir.path(), &[0u8; 64], &key_path).unwrap();
        assert_eq!(status, attest::STATUS_SIGNATURE_INVALID);
    }
}
