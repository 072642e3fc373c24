use core::fmt;

use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;
use log::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{SdkError, SdkResult};
use crate::util::crypto_utils::{hkdf_sha256, hmac_sha256};

/// LUD-05 purpose for LNURL-auth linking keys
const LNURL_AUTH_PURPOSE: u32 = 138;

/// The node's signing seed.
///
/// Only lives in process memory and is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed(Vec<u8>);

impl Seed {
    /// Wrap raw seed bytes, which must be between 16 and 64 bytes
    pub fn from_bytes(bytes: &[u8]) -> SdkResult<Seed> {
        if bytes.len() < 16 || bytes.len() > 64 {
            return Err(SdkError::invalid_input(format!("bad seed length {}", bytes.len())));
        }
        Ok(Seed(bytes.to_vec()))
    }

    /// The raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// Derive a seed from a BIP-39 mnemonic, with an empty passphrase
pub fn derive_seed(mnemonic: &str) -> SdkResult<Seed> {
    let mnemonic = Mnemonic::parse(mnemonic.trim())
        .map_err(|e| SdkError::InvalidMnemonic(e.to_string()))?;
    let mut seed = mnemonic.to_seed("");
    let result = Seed(seed.to_vec());
    seed.zeroize();
    Ok(result)
}

/// Keys derived from the seed
pub struct KeyMaterial {
    seed: Seed,
    network: Network,
    secp_ctx: Secp256k1<All>,
}

impl KeyMaterial {
    /// Create from a seed
    pub fn new(seed: Seed, network: Network) -> Self {
        KeyMaterial { seed, network, secp_ctx: Secp256k1::new() }
    }

    /// The secp256k1 context
    pub fn secp_ctx(&self) -> &Secp256k1<All> {
        &self.secp_ctx
    }

    /// The node's identity key
    pub fn node_secret_key(&self) -> SdkResult<SecretKey> {
        let key = Zeroizing::new(hkdf_sha256(self.seed.as_bytes(), "nodeid".as_bytes(), &[]));
        Ok(SecretKey::from_slice(&key[..])?)
    }

    /// The node id
    pub fn node_id(&self) -> SdkResult<PublicKey> {
        Ok(PublicKey::from_secret_key(&self.secp_ctx, &self.node_secret_key()?))
    }

    /// Symmetric key for backup encryption
    pub fn backup_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(hkdf_sha256(self.seed.as_bytes(), "backup encryption".as_bytes(), &[]))
    }

    fn master_xpriv(&self) -> SdkResult<Xpriv> {
        Xpriv::new_master(self.network, self.seed.as_bytes())
            .map_err(|e| SdkError::generic(format!("master key: {}", e)))
    }

    fn derive(&self, path: Vec<ChildNumber>) -> SdkResult<SecretKey> {
        let path = DerivationPath::from(path);
        let xpriv = self
            .master_xpriv()?
            .derive_priv(&self.secp_ctx, &path)
            .map_err(|e| SdkError::generic(format!("derive {}: {}", path, e)))?;
        Ok(xpriv.private_key)
    }

    /// LUD-05 linking key for an LNURL-auth domain
    pub fn lnurl_auth_linking_key(&self, domain: &str) -> SdkResult<SecretKey> {
        let purpose = ChildNumber::from_hardened_idx(LNURL_AUTH_PURPOSE)
            .map_err(|e| SdkError::generic(e.to_string()))?;
        let hashing_key = Zeroizing::new(
            self.derive(vec![purpose, ChildNumber::from(0)])?.secret_bytes(),
        );
        let material = hmac_sha256(&hashing_key[..], domain.as_bytes());
        let mut path = vec![purpose];
        for chunk in material[..16].chunks(4) {
            let idx = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            path.push(ChildNumber::from(idx));
        }
        debug!("derived lnurl-auth linking key for {}", domain);
        self.derive(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn derive_seed_test() {
        let seed = derive_seed(MNEMONIC).unwrap();
        // BIP-39 reference vector with an empty passphrase
        assert_eq!(
            hex::encode(seed.as_bytes()),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc1\
             9a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
        );
        let again = derive_seed(&format!("  {} ", MNEMONIC)).unwrap();
        assert_eq!(seed.as_bytes(), again.as_bytes());
    }

    #[test]
    fn invalid_mnemonic_test() {
        let bad_checksum =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert_eq!(derive_seed(bad_checksum).unwrap_err().kind(), ErrorKind::InvalidMnemonic);
        assert_eq!(derive_seed("not a mnemonic").unwrap_err().kind(), ErrorKind::InvalidMnemonic);
    }

    #[test]
    fn seed_debug_hides_bytes_test() {
        let seed = Seed::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(format!("{:?}", seed), "Seed(..)");
        assert!(Seed::from_bytes(&[1u8; 8]).is_err());
    }

    #[test]
    fn keys_test() {
        let keys = KeyMaterial::new(derive_seed(MNEMONIC).unwrap(), Network::Regtest);
        let node_id = keys.node_id().unwrap();
        assert_eq!(node_id, keys.node_id().unwrap());

        let a = keys.lnurl_auth_linking_key("site.com").unwrap();
        let b = keys.lnurl_auth_linking_key("site.com").unwrap();
        let c = keys.lnurl_auth_linking_key("other.com").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(keys.backup_key()[..], keys.node_secret_key().unwrap().secret_bytes()[..]);
    }
}
