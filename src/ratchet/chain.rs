use crate::Error;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Symmetric ratchet chain for deriving message keys
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Chain {
    pub(crate) chain_key: Box<[u8; 32]>,
    /// Counter of the next message key this chain will produce.
    pub(crate) index: u32,
}

impl Chain {
    pub(crate) fn new(chain_key: Box<[u8; 32]>) -> Self {
        Self {
            chain_key,
            index: 0,
        }
    }

    /// Advances the chain and returns the message key for the current index
    pub(crate) fn next(&mut self) -> Result<Box<[u8; 32]>, Error> {
        let next_index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::Protocol("chain counter exhausted".to_string()))?;

        let mut message_key = Box::new([0u8; 32]);
        message_key.copy_from_slice(&self.mac(0x01)?);

        let chain_result = self.mac(0x02)?;
        self.chain_key.copy_from_slice(&chain_result);
        self.index = next_index;

        Ok(message_key)
    }

    fn mac(&self, input: u8) -> Result<[u8; 32], Error> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.chain_key.as_slice())
            .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))?;
        mac.update(&[input]);
        Ok(mac.finalize().into_bytes().into())
    }
}
