use bitcoin::secp256k1::{All, Secp256k1, rand};
use bitcoin::{Address, Network as BitcoinNetwork, PrivateKey};

use crate::error::AppError;
use crate::types::KeyPair;

/// Source of fresh destination keys.
pub trait KeyGenerator {
    fn generate_key_pair(&self) -> Result<KeyPair, AppError>;
}

/// Random secp256k1 keys, WIF-encoded, with a compressed P2PKH receiving address.
pub struct SecpKeyGenerator {
    secp: Secp256k1<All>,
    network: BitcoinNetwork,
}

impl SecpKeyGenerator {
    pub fn new(network: BitcoinNetwork) -> Self {
        SecpKeyGenerator { secp: Secp256k1::new(), network }
    }
}

impl KeyGenerator for SecpKeyGenerator {
    fn generate_key_pair(&self) -> Result<KeyPair, AppError> {
        let (secret_key, _) = self.secp.generate_keypair(&mut rand::thread_rng());
        let private_key = PrivateKey::new(secret_key, self.network);
        let public_key = private_key.public_key(&self.secp);
        let address = Address::p2pkh(public_key.pubkey_hash(), self.network);

        Ok(KeyPair {
            private_key: private_key.to_wif(),
            public_address: address.to_string(),
        })
    }
}
