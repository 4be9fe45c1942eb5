//! Classic pcap writer (little-endian, microsecond timestamps)

use crate::frame::FrameRecord;
use cipdip_core::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

const MAGIC: u32 = 0xA1B2_C3D4;
const SNAPLEN: u32 = 65535;

pub struct PcapWriter<W: Write> {
    inner: W,
    frames_written: u64,
}

impl PcapWriter<BufWriter<File>> {
    /// Create (or truncate) a capture file
    pub fn create(path: impl AsRef<Path>, linktype: u32) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), linktype)
    }
}

impl<W: Write> PcapWriter<W> {
    /// Wrap `inner` and write the global header
    pub fn new(mut inner: W, linktype: u32) -> Result<Self> {
        inner.write_all(&MAGIC.to_le_bytes())?;
        inner.write_all(&2u16.to_le_bytes())?;
        inner.write_all(&4u16.to_le_bytes())?;
        inner.write_all(&0i32.to_le_bytes())?;
        inner.write_all(&0u32.to_le_bytes())?;
        inner.write_all(&SNAPLEN.to_le_bytes())?;
        inner.write_all(&linktype.to_le_bytes())?;

        Ok(Self {
            inner,
            frames_written: 0,
        })
    }

    /// Append one frame; `original_len` is the on-wire length
    pub fn write_frame(&mut self, timestamp: Duration, data: &[u8], original_len: u32) -> Result<()> {
        let caplen = data.len() as u32;
        self.inner.write_all(&(timestamp.as_secs() as u32).to_le_bytes())?;
        self.inner.write_all(&timestamp.subsec_micros().to_le_bytes())?;
        self.inner.write_all(&caplen.to_le_bytes())?;
        self.inner.write_all(&original_len.max(caplen).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn write_record(&mut self, record: &FrameRecord) -> Result<()> {
        self.write_frame(record.captured_at, &record.raw, record.original_len)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and return the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
