use crate::error::Fault;

/// The flat story image: dynamic, static and high memory in one byte array.
///
/// All other components go through these accessors, which makes this the sole
/// arbiter of the bounds and read-only invariants. The image never resizes
/// after load; only the region below `static_base` may be written.
pub struct Memory {
    bytes: Vec<u8>,
    static_base: u32,
}

impl Memory {
    pub fn new(bytes: Vec<u8>, static_base: u32) -> Self {
        Memory { bytes, static_base }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Start of static (read-only) memory.
    pub fn static_base(&self) -> u32 {
        self.static_base
    }

    /// Raw view of the whole image, for the text engine and the decoder.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn read_byte(&self, addr: u32) -> Result<u8, Fault> {
        self.bytes
            .get(addr as usize)
            .copied()
            .ok_or(Fault::OutOfBounds { addr })
    }

    /// Big-endian 16-bit read.
    pub fn read_word(&self, addr: u32) -> Result<u16, Fault> {
        let high = self.read_byte(addr)? as u16;
        let low = self.read_byte(addr + 1)? as u16;
        Ok((high << 8) | low)
    }

    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        if addr >= self.static_base {
            return Err(Fault::ReadOnlyWrite { addr });
        }
        match self.bytes.get_mut(addr as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Fault::OutOfBounds { addr }),
        }
    }

    /// Big-endian 16-bit write.
    pub fn write_word(&mut self, addr: u32, value: u16) -> Result<(), Fault> {
        self.write_byte(addr, (value >> 8) as u8)?;
        self.write_byte(addr + 1, (value & 0xFF) as u8)
    }

    /// The writable region, as captured by snapshots and restored on restart.
    pub fn dynamic_region(&self) -> &[u8] {
        &self.bytes[..self.static_base as usize]
    }

    /// Overwrite the dynamic region wholesale. The replacement must be exactly
    /// the region's current size; snapshots from a different image are refused
    /// upstream.
    pub fn load_dynamic_region(&mut self, data: &[u8]) -> Result<(), Fault> {
        if data.len() != self.static_base as usize {
            return Err(Fault::BadSnapshot("dynamic region size mismatch"));
        }
        self.bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }
}
