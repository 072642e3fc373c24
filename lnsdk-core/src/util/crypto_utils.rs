use bitcoin::hashes::sha256::Hash as BitcoinSha256;
use bitcoin::hashes::{Hash, HashEngine, Hmac, HmacEngine};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::sighash::EcdsaSighashType;
use rand::rngs::OsRng;
use rand::RngCore;

fn hkdf_extract_expand(salt: &[u8], secret: &[u8], info: &[u8], output: &mut [u8]) {
    let mut hmac = HmacEngine::<BitcoinSha256>::new(salt);
    hmac.input(secret);
    let prk = Hmac::from_engine(hmac).to_byte_array();

    let mut t = [0; 32];
    let mut n: u8 = 0;

    for chunk in output.chunks_mut(32) {
        let mut hmac = HmacEngine::<BitcoinSha256>::new(&prk[..]);
        // callers ask for a bounded number of chunks
        n = n.wrapping_add(1);
        if n != 1 {
            hmac.input(&t);
        }
        hmac.input(info);
        hmac.input(&[n]);
        t = Hmac::from_engine(hmac).to_byte_array();
        chunk.copy_from_slice(&t[..chunk.len()]);
    }
}

/// derive a secret from another secret using HKDF-SHA256
pub fn hkdf_sha256(secret: &[u8], info: &[u8], salt: &[u8]) -> [u8; 32] {
    let mut result = [0u8; 32];
    hkdf_extract_expand(salt, secret, info, &mut result);
    result
}

/// HMAC-SHA256 of `data` keyed with `key`
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut engine = HmacEngine::<BitcoinSha256>::new(key);
    engine.input(data);
    Hmac::from_engine(engine).to_byte_array()
}

/// SHA256 of `data`
pub fn sha256(data: &[u8]) -> [u8; 32] {
    BitcoinSha256::hash(data).to_byte_array()
}

/// Fresh random bytes from the OS RNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Convert a [Signature] to Bitcoin signature bytes, with SIGHASH_ALL
pub fn signature_to_bitcoin_vec(sig: Signature) -> Vec<u8> {
    let mut sigvec = sig.serialize_der().to_vec();
    sigvec.push(EcdsaSighashType::All as u8);
    sigvec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_test() {
        let a = hkdf_sha256(&[1u8; 32], b"nodeid", &[]);
        let b = hkdf_sha256(&[1u8; 32], b"nodeid", &[]);
        let c = hkdf_sha256(&[1u8; 32], b"backup encryption", &[]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hmac_test() {
        // RFC 4231 test case 2
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn random_test() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }
}
