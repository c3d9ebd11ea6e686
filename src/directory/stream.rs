use std::sync::Arc;
use parking_lot::Mutex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::directory::file::VirtualFile;

pub type SharedFile = Arc<Mutex<VirtualFile>>;

/// Sequential writer over a virtual file. Numbers are big-endian.
pub struct IndexOutput {
    file: SharedFile,
    position: u64,
}

impl IndexOutput {
    pub(crate) fn new(file: SharedFile) -> Self {
        IndexOutput { file, position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.lock().write_range(self.position, bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Flushes the file to the chunk store; the output is unusable afterwards.
    pub fn close(self) -> Result<()> {
        self.file.lock().flush()
    }
}

/// Random-access reader over a virtual file.
pub struct IndexInput {
    file: SharedFile,
    position: u64,
    length: u64,
}

impl IndexInput {
    pub(crate) fn new(file: SharedFile) -> Self {
        let length = file.lock().length();
        IndexInput { file, position: 0, length }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.length {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("seek to {} beyond length {}", position, self.length),
            ));
        }
        self.position = position;
        Ok(())
    }

    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        self.file.lock().read_range(self.position, out)?;
        self.position += out.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        Ok(buf)
    }

    /// Everything from the current position to the end.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = (self.length - self.position) as usize;
        self.read_vec(remaining)
    }
}
