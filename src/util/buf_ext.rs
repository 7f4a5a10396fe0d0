use anyhow::{anyhow, bail};
use crate::protocol::MAGIC;

/// RakNet-specific additions on top of `bytes::Buf`. Fixed width integers are read with the
///  `try_get_*` methods `Buf` provides itself.
pub trait BufExt: bytes::Buf {
    fn try_get_u24_le(&mut self) -> anyhow::Result<u32> {
        if self.remaining() < 3 {
            bail!("buffer underflow");
        }
        Ok(self.get_uint_le(3) as u32)
    }

    fn try_get_raknet_bool(&mut self) -> anyhow::Result<bool> {
        match self.try_get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(anyhow!("invalid value for a boolean: {}", b)),
        }
    }

    /// Reads the 16 byte offline message magic, failing if it does not match
    fn try_check_magic(&mut self) -> anyhow::Result<()> {
        if self.remaining() < MAGIC.len() {
            bail!("buffer underflow");
        }
        let mut actual = [0u8; 16];
        self.copy_to_slice(&mut actual);
        if actual != MAGIC {
            bail!("invalid offline message magic");
        }
        Ok(())
    }
}

pub trait BufMutExt: bytes::BufMut {
    fn put_u24_le(&mut self, v: u32) {
        self.put_uint_le((v & 0xff_ffff) as u64, 3);
    }

    fn put_raknet_bool(&mut self, v: bool) {
        self.put_u8(if v { 1 } else { 0 });
    }

    fn put_magic(&mut self) {
        self.put_slice(&MAGIC);
    }
}

impl <T: bytes::Buf> BufExt for T {
}

impl <T: bytes::BufMut> BufMutExt for T {
}
