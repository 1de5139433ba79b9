// Copyright 2021 Gravitational, Inc
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The RDP Security envelope: the Basic Security Header plus one of two
//! encryption/signing schemes.
//!
//! FIPS mode runs 3DES-CBC with an 8-byte HMAC-SHA1 signature and explicit
//! padding to a multiple of 8. Legacy mode runs RC4 with a bespoke
//! MD5+SHA1 MAC construction (salted or unsalted, selected by
//! `SECURE_CHECKSUM`). A legacy MAC mismatch is not automatically fatal,
//! see [`legacy_decrypt`], because some servers in the wild get this wrong
//! and the original client tolerated it; new code must opt in explicitly.

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use md5::{Digest as _, Md5};
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::{Digest as _, Sha1};

use crate::errors::{CryptoError, FrameError};
use crate::packer::BytePacker;

type TdesCbcEnc = cbc::Encryptor<des::TdesEde3>;
type TdesCbcDec = cbc::Decryptor<des::TdesEde3>;
type HmacSha1 = Hmac<Sha1>;

bitflags::bitflags! {
    /// `TS_SECURITY_HEADER.flags` (MS-RDPBCGR 2.2.8.1.1.2.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityFlags: u16 {
        const EXCHANGE_PKT        = 0x0001;
        const TRANSPORT_REQ       = 0x0002;
        const TRANSPORT_RSP       = 0x0004;
        const ENCRYPT             = 0x0008;
        const RESET_SEQNO         = 0x0010;
        const IGNORE_SEQNO        = 0x0020;
        const INFO_PKT            = 0x0040;
        const LICENSE_PKT         = 0x0080;
        const LICENSE_ENCRYPT_CS  = 0x0100;
        const LICENSE_ENCRYPT_SC  = 0x0200;
        const REDIRECTION_PKT     = 0x0400;
        const SECURE_CHECKSUM     = 0x0800;
        const AUTODETECT_REQ      = 0x1000;
        const AUTODETECT_RSP      = 0x2000;
        const HEARTBEAT           = 0x4000;
        const FLAGSHI_VALID       = 0x8000;
    }
}

pub const BASIC_HEADER_LEN: usize = 4;
pub const FIPS_HEADER_LEN: usize = 4;
pub const FIPS_SIGNATURE_LEN: usize = 8;
pub const LEGACY_MAC_LEN: usize = 8;

const FIPS_HEADER_LENGTH_FIELD: u16 = 0x0010;
const FIPS_VERSION: u8 = 0x01;

/// Per-direction symmetric key material and sequence counters, created once
/// the handshake (an external collaborator) has derived keys and destroyed
/// with the session.
#[derive(Clone)]
pub struct SecurityContext {
    pub encrypt_key: Vec<u8>,
    pub decrypt_key: Vec<u8>,
    pub mac_key: Vec<u8>,
    pub fips_key: [u8; 24],
    pub fips_iv: [u8; 8],
    pub fips_mac_key: Vec<u8>,
    pub encrypt_count: u32,
    pub decrypt_count: u32,
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("encrypt_count", &self.encrypt_count)
            .field("decrypt_count", &self.decrypt_count)
            .finish_non_exhaustive()
    }
}

/// Bytes this envelope must reserve ahead of the body write: 12 with
/// `ENCRYPT` staged (4-byte Basic Security Header plus an 8-byte
/// MAC/signature slot placeholder), +4 more under FIPS, 4 for any other
/// non-zero flag (header only), 0 otherwise.
///
/// Note: the MAC/signature slot itself is additional to the Basic Security
/// Header, so `ENCRYPT` reserves `BASIC_HEADER_LEN (4) + LEGACY_MAC_LEN (8)
/// = 12`, and FIPS adds `FIPS_HEADER_LEN (4) + FIPS_SIGNATURE_LEN (8) - 8 =
/// 4` more (the FIPS scheme's signature replaces the legacy MAC slot one
/// for one, but carries a 4-byte length/version/pad prefix the legacy slot
/// doesn't).
pub fn reserve_len(flags: SecurityFlags, fips: bool) -> usize {
    if flags.contains(SecurityFlags::ENCRYPT) {
        let base = BASIC_HEADER_LEN + LEGACY_MAC_LEN;
        if fips {
            base + FIPS_HEADER_LEN
        } else {
            base
        }
    } else if !flags.is_empty() {
        BASIC_HEADER_LEN
    } else {
        0
    }
}

pub fn write_basic_header(packer: &mut BytePacker, flags: SecurityFlags) {
    packer.write_u16_le(flags.bits());
    packer.write_u16_le(0); // flagsHi, unused by this crate
}

pub fn read_basic_header(packer: &mut BytePacker) -> Result<SecurityFlags, FrameError> {
    let bits = packer.read_u16_le()?;
    let _flags_hi = packer.read_u16_le()?;
    Ok(SecurityFlags::from_bits_truncate(bits))
}

/// `pad = (8 - len % 8) % 8`, the amount of zero padding FIPS mode appends
/// to reach a multiple of 8.
pub fn fips_pad_len(body_len: usize) -> u8 {
    ((8 - (body_len % 8)) % 8) as u8
}

fn fips_signature(mac_key: &[u8], data: &[u8]) -> [u8; FIPS_SIGNATURE_LEN] {
    let mut mac = HmacSha1::new_from_slice(mac_key).expect("HMAC accepts any key length");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; FIPS_SIGNATURE_LEN];
    out.copy_from_slice(&digest[..FIPS_SIGNATURE_LEN]);
    out
}

pub fn write_fips_header(packer: &mut BytePacker, pad: u8, signature: &[u8; FIPS_SIGNATURE_LEN]) {
    packer.write_u16_le(FIPS_HEADER_LENGTH_FIELD);
    packer.write_u8(FIPS_VERSION);
    packer.write_u8(pad);
    packer.write_slice(signature);
}

pub fn read_fips_header(
    packer: &mut BytePacker,
) -> Result<(u8, [u8; FIPS_SIGNATURE_LEN]), FrameError> {
    let _length = packer.read_u16_le()?;
    let _version = packer.read_u8()?;
    let pad = packer.read_u8()?;
    let mut signature = [0u8; FIPS_SIGNATURE_LEN];
    signature.copy_from_slice(packer.read_slice(FIPS_SIGNATURE_LEN)?);
    Ok((pad, signature))
}

/// Signs `padded[..body_len]` and encrypts `padded` (body + zero pad) in
/// place with 3DES-CBC. Returns the signature to write into the FIPS header.
pub fn fips_encrypt(
    ctx: &mut SecurityContext,
    body_len: usize,
    padded: &mut [u8],
) -> Result<[u8; FIPS_SIGNATURE_LEN], CryptoError> {
    if padded.len() % 8 != 0 {
        return Err(CryptoError::FipsUnalignedCiphertext(padded.len()));
    }
    let signature = fips_signature(&ctx.fips_mac_key, &padded[..body_len]);
    let enc = TdesCbcEnc::new(ctx.fips_key.as_slice().into(), ctx.fips_iv.as_slice().into());
    enc.encrypt_padded_mut::<NoPadding>(padded, padded.len())
        .map_err(|_| CryptoError::FipsUnalignedCiphertext(padded.len()))?;
    ctx.encrypt_count += 1;
    Ok(signature)
}

/// Decrypts `ciphertext` in place, verifies the signature over the
/// unpadded plaintext, and returns the unpadded (logical) length. A
/// signature mismatch is always fatal in FIPS mode.
pub fn fips_decrypt(
    ctx: &mut SecurityContext,
    ciphertext: &mut [u8],
    pad: u8,
    signature: &[u8; FIPS_SIGNATURE_LEN],
) -> Result<usize, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % 8 != 0 {
        return Err(CryptoError::FipsUnalignedCiphertext(ciphertext.len()));
    }
    let dec = TdesCbcDec::new(ctx.fips_key.as_slice().into(), ctx.fips_iv.as_slice().into());
    dec.decrypt_padded_mut::<NoPadding>(ciphertext)
        .map_err(|_| CryptoError::FipsUnalignedCiphertext(ciphertext.len()))?;
    ctx.decrypt_count += 1;

    let logical_len = ciphertext.len() - pad as usize;
    let computed = fips_signature(&ctx.fips_mac_key, &ciphertext[..logical_len]);
    if &computed != signature {
        return Err(CryptoError::FipsSignatureMismatch);
    }
    Ok(logical_len)
}

/// MS-RDPBCGR 5.3.6.2's `MACData`: SHA1 over `key | pad1 | data | len [|
/// enc_count]`, then MD5 over `key | pad2 | sha1_digest`, truncated to 8
/// bytes. The salted variant folds the running encryption count into the
/// SHA1 input; selected by `SECURE_CHECKSUM`.
fn legacy_mac(key: &[u8], data: &[u8], salted: bool, count: u32) -> [u8; LEGACY_MAC_LEN] {
    const PAD1: [u8; 40] = [0x36; 40];
    const PAD2: [u8; 48] = [0x5c; 48];

    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(PAD1);
    sha1.update(data);
    sha1.update((data.len() as u32).to_le_bytes());
    if salted {
        sha1.update(count.to_le_bytes());
    }
    let sha1_digest = sha1.finalize();

    let mut md5 = Md5::new();
    md5.update(key);
    md5.update(PAD2);
    md5.update(sha1_digest);
    let md5_digest = md5.finalize();

    let mut out = [0u8; LEGACY_MAC_LEN];
    out.copy_from_slice(&md5_digest[..LEGACY_MAC_LEN]);
    out
}

/// RC4-encrypts `plaintext` in place and returns the MAC to write ahead of
/// it.
pub fn legacy_encrypt(
    ctx: &mut SecurityContext,
    secure_checksum: bool,
    plaintext: &mut [u8],
) -> [u8; LEGACY_MAC_LEN] {
    let mac = legacy_mac(&ctx.mac_key, plaintext, secure_checksum, ctx.encrypt_count);
    let mut rc4 = Rc4::new(ctx.encrypt_key.as_slice().into());
    rc4.apply_keystream(plaintext);
    ctx.encrypt_count += 1;
    mac
}

/// RC4-decrypts `ciphertext` in place and checks the MAC. A mismatch is
/// logged but not fatal unless `allow_insecure_mac` is `false` (the
/// default), in which case it is promoted to a hard failure; the
/// original's always-accept behavior is preserved only behind an explicit
/// opt-in.
pub fn legacy_decrypt(
    ctx: &mut SecurityContext,
    secure_checksum: bool,
    ciphertext: &mut [u8],
    mac: &[u8; LEGACY_MAC_LEN],
    allow_insecure_mac: bool,
) -> Result<(), CryptoError> {
    let mut rc4 = Rc4::new(ctx.decrypt_key.as_slice().into());
    rc4.apply_keystream(ciphertext);
    let computed = legacy_mac(&ctx.mac_key, ciphertext, secure_checksum, ctx.decrypt_count);
    ctx.decrypt_count += 1;

    if &computed != mac {
        if allow_insecure_mac {
            log::warn!("legacy RDP security MAC mismatch; accepted per legacy_insecure_mac_accept");
            return Ok(());
        }
        return Err(CryptoError::LegacyMacMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> SecurityContext {
        SecurityContext {
            encrypt_key: vec![0x11; 16],
            decrypt_key: vec![0x11; 16],
            mac_key: vec![0x22; 16],
            fips_key: [0x33; 24],
            fips_iv: [0x44; 8],
            fips_mac_key: vec![0x55; 20],
            encrypt_count: 0,
            decrypt_count: 0,
        }
    }

    #[test]
    fn legacy_round_trips_and_mac_matches() {
        let mut ctx = test_ctx();
        let mut body = b"hello rdp world!".to_vec();
        let original = body.clone();
        let mac = legacy_encrypt(&mut ctx, false, &mut body);

        let mut ctx2 = test_ctx();
        legacy_decrypt(&mut ctx2, false, &mut body, &mac, false).unwrap();
        assert_eq!(body, original);
    }

    #[test]
    fn legacy_mac_mismatch_is_fatal_by_default() {
        let mut ctx = test_ctx();
        let mut body = b"hello rdp world!".to_vec();
        let mut mac = legacy_encrypt(&mut ctx, false, &mut body);
        mac[0] ^= 0xFF;

        let mut ctx2 = test_ctx();
        let err = legacy_decrypt(&mut ctx2, false, &mut body, &mac, false);
        assert!(err.is_err());
    }

    #[test]
    fn legacy_mac_mismatch_is_tolerated_when_opted_in() {
        let mut ctx = test_ctx();
        let mut body = b"hello rdp world!".to_vec();
        let mut mac = legacy_encrypt(&mut ctx, false, &mut body);
        mac[0] ^= 0xFF;

        let mut ctx2 = test_ctx();
        assert!(legacy_decrypt(&mut ctx2, false, &mut body, &mac, true).is_ok());
    }

    #[test]
    fn fips_pad_covers_all_residues() {
        assert_eq!(fips_pad_len(0), 0);
        assert_eq!(fips_pad_len(8), 0);
        assert_eq!(fips_pad_len(1), 7);
        assert_eq!(fips_pad_len(15), 1);
    }

    #[test]
    fn fips_round_trips_and_signature_verifies() {
        let mut ctx = test_ctx();
        let body_len = 10;
        let pad = fips_pad_len(body_len) as usize;
        let mut buf = vec![0u8; body_len + pad];
        buf[..body_len].copy_from_slice(&[0xAB; 10]);
        let sig = fips_encrypt(&mut ctx, body_len, &mut buf).unwrap();

        let mut ctx2 = test_ctx();
        let logical_len = fips_decrypt(&mut ctx2, &mut buf, pad as u8, &sig).unwrap();
        assert_eq!(logical_len, body_len);
        assert_eq!(&buf[..logical_len], &[0xAB; 10]);
    }

    #[test]
    fn fips_signature_mismatch_is_fatal() {
        let mut ctx = test_ctx();
        let body_len = 10;
        let pad = fips_pad_len(body_len) as usize;
        let mut buf = vec![0u8; body_len + pad];
        buf[..body_len].copy_from_slice(&[0xAB; 10]);
        let mut sig = fips_encrypt(&mut ctx, body_len, &mut buf).unwrap();
        sig[0] ^= 0xFF;

        let mut ctx2 = test_ctx();
        assert!(fips_decrypt(&mut ctx2, &mut buf, pad as u8, &sig).is_err());
    }
}
