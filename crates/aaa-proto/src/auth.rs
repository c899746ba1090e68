//! Authenticator calculation and User-Password obfuscation.
//!
//! RADIUS packet integrity rests on keyed MD5 over the packet bytes
//! and the shared secret (RFC 2865 Section 3, RFC 2866 Section 3).
//! MD5 is mandated by the protocol; it is not a choice this crate
//! gets to make.

use crate::packet::{Packet, PacketError};
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PasswordError {
    #[error("encrypted password length {0} is not a non-zero multiple of 16")]
    BadLength(usize),
    #[error("decrypted password is not valid UTF-8")]
    NotUtf8,
}

/// Random 16-byte Request Authenticator (RFC 2865 Section 3).
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut authenticator = [0u8; 16];
    rand::rng().fill(&mut authenticator);
    authenticator
}

/// Response Authenticator:
/// MD5(code + identifier + length + request authenticator + attributes + secret).
///
/// Used for Access-Accept, Access-Reject and Accounting-Response on
/// the way out.
pub fn calculate_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let length = response.length() as u16;

    let mut data = Vec::with_capacity(response.length() + secret.len());
    data.push(response.code.as_u8());
    data.push(response.identifier);
    data.extend_from_slice(&length.to_be_bytes());
    data.extend_from_slice(request_authenticator);
    for attr in &response.attributes {
        // Attribute construction already bounds value length.
        let _ = attr.encode_into(&mut data);
    }
    data.extend_from_slice(secret);

    md5::compute(&data).0
}

/// Sign an encoded Accounting-Request in place: the NAS side of
/// [`verify_accounting_request_authenticator`]. The authenticator
/// field is computed over the packet with those 16 bytes zeroed.
pub fn sign_accounting_request(datagram: &mut [u8], secret: &[u8]) -> Result<(), PacketError> {
    if datagram.len() < Packet::HEADER_SIZE {
        return Err(PacketError::Truncated(datagram.len()));
    }

    let mut data = Vec::with_capacity(datagram.len() + secret.len());
    data.extend_from_slice(&datagram[..4]);
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&datagram[Packet::HEADER_SIZE..]);
    data.extend_from_slice(secret);

    let digest = md5::compute(&data).0;
    datagram[4..20].copy_from_slice(&digest);
    Ok(())
}

/// Verify the Request Authenticator of an Accounting-Request
/// (RFC 2866 Section 3):
/// MD5(code + identifier + length + 16 zero octets + attributes + secret)
/// must match the authenticator carried in the datagram.
///
/// Operates on the raw datagram so the comparison covers exactly the
/// bytes the NAS signed. A mismatch means wrong secret or spoofed
/// source; the caller drops the packet without a response.
pub fn verify_accounting_request_authenticator(datagram: &[u8], secret: &[u8]) -> bool {
    if datagram.len() < Packet::HEADER_SIZE {
        return false;
    }
    let declared = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    if declared < Packet::HEADER_SIZE || declared > datagram.len() {
        return false;
    }

    let mut data = Vec::with_capacity(declared + secret.len());
    data.extend_from_slice(&datagram[..4]);
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&datagram[Packet::HEADER_SIZE..declared]);
    data.extend_from_slice(secret);

    md5::compute(&data).0 == datagram[4..20]
}

/// Obfuscate a User-Password per RFC 2865 Section 5.2.
///
/// The password is zero-padded to a multiple of 16 bytes and XORed
/// chunk by chunk against MD5(secret + previous block), where the
/// first "previous block" is the Request Authenticator.
pub fn encrypt_user_password(password: &str, secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let mut padded = password.as_bytes().to_vec();
    let rem = padded.len() % 16;
    if rem != 0 || padded.is_empty() {
        padded.resize(padded.len() + 16 - rem, 0);
    }

    let mut out = Vec::with_capacity(padded.len());
    let mut prev: [u8; 16] = *authenticator;

    for chunk in padded.chunks_exact(16) {
        let digest = keystream_block(secret, &prev);
        for (i, byte) in chunk.iter().enumerate() {
            prev[i] = byte ^ digest[i];
        }
        out.extend_from_slice(&prev);
    }

    out
}

/// Recover the clear-text password from a User-Password value.
pub fn decrypt_user_password(
    encrypted: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<String, PasswordError> {
    if encrypted.is_empty() || encrypted.len() % 16 != 0 {
        return Err(PasswordError::BadLength(encrypted.len()));
    }

    let mut out = Vec::with_capacity(encrypted.len());
    let mut prev: [u8; 16] = *authenticator;

    for chunk in encrypted.chunks_exact(16) {
        let digest = keystream_block(secret, &prev);
        for (i, byte) in chunk.iter().enumerate() {
            out.push(byte ^ digest[i]);
        }
        prev.copy_from_slice(chunk);
    }

    // Strip the zero padding added on encryption.
    while out.last() == Some(&0) {
        out.pop();
    }

    String::from_utf8(out).map_err(|_| PasswordError::NotUtf8)
}

fn keystream_block(secret: &[u8], prev: &[u8; 16]) -> [u8; 16] {
    let mut data = Vec::with_capacity(secret.len() + 16);
    data.extend_from_slice(secret);
    data.extend_from_slice(prev);
    md5::compute(&data).0
}
