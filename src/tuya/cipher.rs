use crate::error::{ChargeSyncError, Result};
use aes::Aes128;
use ecb::cipher::block_padding::Pkcs7;
use ecb::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};

type EcbEncryptor = ecb::Encryptor<Aes128>;
type EcbDecryptor = ecb::Decryptor<Aes128>;

const BLOCK: usize = 16;

/// AES-128-ECB with PKCS#7 padding, keyed by the device local key
#[derive(Clone)]
pub struct TuyaCipher {
    key: [u8; BLOCK],
}

impl TuyaCipher {
    pub fn new(local_key: &[u8]) -> Result<Self> {
        let key = <[u8; BLOCK]>::try_from(local_key).map_err(|_| {
            ChargeSyncError::validation("charger.local_key", "Local key must be exactly 16 bytes")
        })?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        EcbEncryptor::new(&self.key.into()).encrypt_padded_vec_mut::<Pkcs7>(plain)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() || data.len() % BLOCK != 0 {
            return Err(ChargeSyncError::frame(format!(
                "Ciphertext length {} is not a multiple of the block size",
                data.len()
            )));
        }
        EcbDecryptor::new(&self.key.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| ChargeSyncError::frame("Invalid PKCS#7 padding (wrong local key?)"))
    }
}

impl std::fmt::Debug for TuyaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TuyaCipher(..)")
    }
}
