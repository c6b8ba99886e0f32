//! age envelopes: multi-recipient ciphertext and passphrase-sealed private keys
//!
//! Ciphertext blobs are binary age files with one X25519 stanza per
//! recipient. Private keys at rest are ASCII-armored age files with a single
//! scrypt stanza keyed by the source's keypair secret.

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::x25519;
use secrecy::ExposeSecret;
use std::io::{BufReader, Read, Write};
use zeroize::{Zeroize, Zeroizing};

use tipdrop_core::{TipdropError, TipdropResult};
use tipdrop_crypto::KeypairSecret;

/// Encrypt everything read from `plaintext` to `recipients`, writing the
/// binary age file into `output`. Returns `output` once the final chunk and
/// MAC are flushed.
///
/// An empty recipient list is an error: ciphertext nobody can open is never
/// produced.
pub fn encrypt_to<R: Read, W: Write>(
    recipients: &[x25519::Recipient],
    mut plaintext: R,
    output: W,
) -> TipdropResult<W> {
    if recipients.is_empty() {
        return Err(TipdropError::crypto("no recipients for encryption"));
    }
    let encryptor =
        age::Encryptor::with_recipients(recipients.iter().map(|r| r as &dyn age::Recipient))
            .map_err(|e| TipdropError::crypto(format!("building encryptor: {e}")))?;

    let mut writer = encryptor
        .wrap_output(output)
        .map_err(|e| TipdropError::crypto(format!("starting age stream: {e}")))?;
    std::io::copy(&mut plaintext, &mut writer)
        .map_err(|e| TipdropError::crypto(format!("encrypting stream: {e}")))?;
    writer
        .finish()
        .map_err(|e| TipdropError::crypto(format!("finishing age stream: {e}")))
}

/// Decrypt an age file (binary or armored) with any of `identities`.
///
/// The whole stream is authenticated before anything is returned; on any
/// failure the partial plaintext is wiped and only an error comes back.
pub fn decrypt_from<R: Read>(
    identities: &[x25519::Identity],
    ciphertext: R,
) -> TipdropResult<Vec<u8>> {
    if identities.is_empty() {
        return Err(TipdropError::crypto("no identities for decryption"));
    }
    let armored = ArmoredReader::new(BufReader::new(ciphertext));
    let decryptor = age::Decryptor::new(armored)
        .map_err(|e| TipdropError::crypto(format!("parsing age header: {e}")))?;
    if decryptor.is_scrypt() {
        return Err(TipdropError::crypto(
            "passphrase-only ciphertext is not accepted here",
        ));
    }

    let mut reader = decryptor
        .decrypt(identities.iter().map(|i| i as &dyn age::Identity))
        .map_err(|e| TipdropError::crypto(format!("decrypting: {e}")))?;

    let mut plaintext = Vec::new();
    if let Err(e) = reader.read_to_end(&mut plaintext) {
        plaintext.zeroize();
        return Err(TipdropError::crypto(format!("reading decrypted stream: {e}")));
    }
    Ok(plaintext)
}

/// Seal an X25519 private key under the keypair secret.
pub(crate) fn seal_identity(
    identity: &x25519::Identity,
    secret: &KeypairSecret,
    work_factor: u8,
) -> TipdropResult<Vec<u8>> {
    let mut recipient = age::scrypt::Recipient::new(secret.to_passphrase());
    recipient.set_work_factor(work_factor);
    let encryptor = age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))
        .map_err(|e| TipdropError::crypto(format!("building key sealer: {e}")))?;

    let seal = || -> std::io::Result<Vec<u8>> {
        let armored = ArmoredWriter::wrap_output(Vec::new(), Format::AsciiArmor)?;
        let mut writer = encryptor.wrap_output(armored)?;
        writer.write_all(identity.to_string().expose_secret().as_bytes())?;
        writer.finish()?.finish()
    };
    seal().map_err(|e| TipdropError::crypto(format!("sealing private key: {e}")))
}

/// Open a sealed private key. `Ok(None)` means the secret does not unlock it.
pub(crate) fn unseal_identity(
    sealed: &[u8],
    secret: &KeypairSecret,
    max_work_factor: u8,
) -> TipdropResult<Option<x25519::Identity>> {
    let decryptor = age::Decryptor::new(ArmoredReader::new(sealed))
        .map_err(|e| TipdropError::crypto(format!("parsing sealed key: {e}")))?;
    if !decryptor.is_scrypt() {
        return Err(TipdropError::crypto("sealed key is not passphrase-protected"));
    }

    let mut identity = age::scrypt::Identity::new(secret.to_passphrase());
    identity.set_max_work_factor(max_work_factor);

    let mut reader = match decryptor.decrypt(std::iter::once(&identity as &dyn age::Identity)) {
        Ok(reader) => reader,
        Err(age::DecryptError::DecryptionFailed) | Err(age::DecryptError::NoMatchingKeys) => {
            return Ok(None)
        }
        Err(e) => return Err(TipdropError::crypto(format!("unsealing private key: {e}"))),
    };

    let mut encoded = Zeroizing::new(String::new());
    reader
        .read_to_string(&mut encoded)
        .map_err(|e| TipdropError::crypto(format!("reading sealed key: {e}")))?;
    encoded
        .trim()
        .parse::<x25519::Identity>()
        .map(Some)
        .map_err(|e| TipdropError::crypto(format!("sealed key is not an X25519 identity: {e}")))
}
