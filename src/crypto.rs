use crate::constants::*;
use crate::error::KafsError;
use crate::krb::{EncryptionKey, EncryptionType};

use hmac::digest::FixedOutput;
use hmac::{Hmac, Mac};
use md5::Md5;

type HmacMd5 = Hmac<Md5>;

/// True if the key, with the parity bit of every byte masked off, matches
/// one of the sixteen published DES weak or semi-weak keys. Keys that only
/// differ from the table in their parity bits select the same degenerate
/// schedule, so they are rejected too.
pub fn is_weak_key(key: &[u8; DES_KEY_LEN]) -> bool {
    DES_WEAK_KEYS
        .iter()
        .any(|weak| key.iter().zip(weak.iter()).all(|(k, w)| k & 0xfe == w & 0xfe))
}

/// Force odd parity in the low bit of every byte, as DES key schedules
/// expect.
pub fn set_odd_parity(key: &mut [u8; DES_KEY_LEN]) {
    for byte in key.iter_mut() {
        let data = *byte & 0xfe;
        let parity = (data.count_ones() + 1) & 1;
        *byte = data | parity as u8;
    }
}

pub fn hmac_md5(key: &[u8], message: &[u8]) -> Result<[u8; 16], KafsError> {
    let mut mac = HmacMd5::new_from_slice(key).map_err(|_| KafsError::InvalidHmacMd5Key)?;
    mac.update(message);

    let mut buf = [0u8; 16];
    mac.finalize_into((&mut buf).into());
    Ok(buf)
}

/// Whether random-to-key for this enctype is the identity function, i.e.
/// the protocol key bytes are the raw key-generation seed. True for the
/// AES-CTS family and RC4; false for the DES families, which spread the
/// seed over parity-carrying bytes.
pub fn random_to_key_is_identity(etype: i32) -> bool {
    matches!(
        EncryptionType::try_from(etype),
        Ok(EncryptionType::AES128_CTS_HMAC_SHA1_96)
            | Ok(EncryptionType::AES256_CTS_HMAC_SHA1_96)
            | Ok(EncryptionType::AES128_CTS_HMAC_SHA256_128)
            | Ok(EncryptionType::AES256_CTS_HMAC_SHA384_192)
            | Ok(EncryptionType::RC4_HMAC)
            | Ok(EncryptionType::RC4_HMAC_EXP)
    )
}

fn is_single_des(etype: i32) -> bool {
    matches!(
        EncryptionType::try_from(etype),
        Ok(EncryptionType::DES_CBC_CRC)
            | Ok(EncryptionType::DES_CBC_MD4)
            | Ok(EncryptionType::DES_CBC_MD5)
    )
}

fn is_triple_des(etype: i32) -> bool {
    matches!(
        EncryptionType::try_from(etype),
        Ok(EncryptionType::DES3_CBC_MD5)
            | Ok(EncryptionType::DES3_CBC_SHA1)
            | Ok(EncryptionType::DES3_CBC_SHA1_KD)
    )
}

/// Triple-DES random-to-key: each 7 seed bytes expand into one 8-byte DES
/// subkey. The seed bytes fill the high seven bits of the first seven key
/// bytes; their low bits are collected into the eighth byte; every byte
/// then gets odd parity, and a subkey landing on the weak-key table has its
/// last byte flipped with 0xf0.
pub fn des3_random_to_key(seed: &[u8; DES3_SEED_LEN]) -> [u8; DES3_KEY_LEN] {
    let mut key = [0u8; DES3_KEY_LEN];

    for (subkey, group) in key.chunks_exact_mut(DES_KEY_LEN).zip(seed.chunks_exact(7)) {
        let mut sub = [0u8; DES_KEY_LEN];
        for i in 0..7 {
            sub[i] = group[i] & 0xfe;
            sub[7] |= (group[i] & 1) << (i + 1);
        }
        set_odd_parity(&mut sub);
        if is_weak_key(&sub) {
            sub[7] ^= 0xf0;
        }
        subkey.copy_from_slice(&sub);
    }

    key
}

/// Inverse of [`des3_random_to_key`]: fold the distributed low bits back
/// into their seed bytes and strip the parity bits. Exact for every key the
/// forward expansion produces from a random seed.
pub fn des3_key_to_random(key: &[u8; DES3_KEY_LEN]) -> [u8; DES3_SEED_LEN] {
    let mut seed = [0u8; DES3_SEED_LEN];

    for (group, subkey) in seed.chunks_exact_mut(7).zip(key.chunks_exact(DES_KEY_LEN)) {
        for i in 0..7 {
            group[i] = (subkey[i] & 0xfe) | ((subkey[7] >> (i + 1)) & 1);
        }
    }

    seed
}

/// Derive the single-DES token key from a Kerberos session key.
///
/// Single-DES session keys are already token keys and pass through
/// untouched. For everything else the key-generation seed is recovered
/// first (raw bytes when random-to-key is the identity, the folded seed for
/// triple-DES), then candidate keys are drawn as the leading 8 bytes of
/// HMAC-MD5 over a one-octet counter, parity-fixed, until one clears the
/// weak-key table.
pub fn derive_des_key(key: &EncryptionKey) -> Result<[u8; DES_KEY_LEN], KafsError> {
    if is_single_des(key.etype) {
        let kv: &[u8; DES_KEY_LEN] = key
            .value
            .as_slice()
            .try_into()
            .map_err(|_| KafsError::InvalidEncryptionKey)?;
        return Ok(*kv);
    }

    let seed: Vec<u8> = if random_to_key_is_identity(key.etype) {
        key.value.clone()
    } else if is_triple_des(key.etype) {
        let kv: &[u8; DES3_KEY_LEN] = key
            .value
            .as_slice()
            .try_into()
            .map_err(|_| KafsError::InvalidEncryptionKey)?;
        des3_key_to_random(kv).to_vec()
    } else {
        return Err(KafsError::UnsupportedEnctype);
    };

    for counter in 1..=DERIVE_MAX_ATTEMPTS {
        let digest = hmac_md5(&seed, &[counter])?;
        let mut candidate = [0u8; DES_KEY_LEN];
        candidate.copy_from_slice(&digest[..DES_KEY_LEN]);
        set_odd_parity(&mut candidate);
        if !is_weak_key(&candidate) {
            return Ok(candidate);
        }
    }

    Err(KafsError::WeakKeyDerivation)
}
