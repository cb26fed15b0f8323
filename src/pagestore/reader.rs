//! Block Log Reader
//!
//! Sequential scanning of the block log (used by recovery and compaction
//! tooling) and positioned frame reads (used by the read path).
//!
//! ## Damaged frames
//! A frame that fails its CRC is skipped by its length when the bytes after
//! it start a valid frame (or end the log). Otherwise its length field is
//! not trusted: the scan searches forward for the next frame that verifies
//! and carries a newer LSN, and reports everything in between as one
//! corrupt range. Only when no valid frame follows is the rest a torn tail.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{NativeIoError, Result};

use super::record::{Frame, FrameHeader, FramePointer, LogHeader};
use super::{FRAME_HEADER_SIZE, LOG_HEADER_SIZE};

/// One step of a sequential scan
#[derive(Debug)]
pub enum ScanItem {
    /// A frame whose CRC checked out
    Frame { pointer: FramePointer, frame: Frame },

    /// A damaged frame or range; the scan goes on after it
    Corrupt { pointer: FramePointer },

    /// Nothing valid follows `offset`
    Torn { offset: u64 },

    /// Clean end of log
    End,
}

/// Bytes examined per read while searching for the next valid frame
const RESYNC_WINDOW: usize = 64 * 1024;

/// Reads frames from the block log in order
pub struct LogReader {
    file: BufReader<File>,
    header: LogHeader,
    position: u64,
    file_len: u64,
    /// LSN of the last frame that verified
    last_lsn: u64,
}

impl LogReader {
    /// Open a log for scanning and validate its header
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut header = [0u8; LOG_HEADER_SIZE as usize];
        if file_len < LOG_HEADER_SIZE {
            return Err(NativeIoError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("block log is {} bytes, shorter than its header", file_len),
            )));
        }
        file.read_exact(&mut header)?;
        let header = LogHeader::decode(&header)?;

        Ok(Self {
            file: BufReader::new(file),
            header,
            position: LOG_HEADER_SIZE,
            file_len,
            last_lsn: 0,
        })
    }

    pub fn header(&self) -> LogHeader {
        self.header
    }

    /// Offset of the next frame to be read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Size of the log file when it was opened
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Continue scanning from `offset` (must be a frame boundary)
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset < LOG_HEADER_SIZE || offset > self.file_len {
            return Err(NativeIoError::InvalidArgument(format!(
                "scan offset {} outside log of {} bytes",
                offset, self.file_len
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Read the next frame
    pub fn next_frame(&mut self) -> Result<ScanItem> {
        let remaining = self.file_len - self.position;
        if remaining == 0 {
            return Ok(ScanItem::End);
        }
        if remaining < FRAME_HEADER_SIZE as u64 {
            return Ok(ScanItem::Torn {
                offset: self.position,
            });
        }

        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        self.file.read_exact(&mut header_bytes)?;
        let header = match FrameHeader::parse(&header_bytes) {
            Some(header) if header.is_plausible() && header.frame_len() <= remaining => header,
            _ => return self.resync(),
        };

        let mut payload = vec![0u8; header.len as usize];
        self.file.read_exact(&mut payload)?;

        let pointer = FramePointer {
            offset: self.position,
            len: header.frame_len() as u32,
            lsn: header.lsn,
        };

        if !header.verify(&payload) {
            let next = pointer.end();
            if next != self.file_len && !self.valid_frame_at(next)? {
                return self.resync();
            }
            self.position = next;
            return Ok(ScanItem::Corrupt { pointer });
        }

        self.position = pointer.end();
        self.last_lsn = self.last_lsn.max(header.lsn);
        match bincode::deserialize(&payload) {
            Ok(record) => Ok(ScanItem::Frame {
                pointer,
                frame: Frame::new(header.lsn, record),
            }),
            Err(_) => Ok(ScanItem::Corrupt { pointer }),
        }
    }

    /// Skip from the current position to the next frame that verifies
    fn resync(&mut self) -> Result<ScanItem> {
        let start = self.position;
        let Some(found) = self.find_valid_frame(start + 1)? else {
            return Ok(ScanItem::Torn { offset: start });
        };

        tracing::warn!(
            "Skipping {} damaged bytes at offset {} of the block log",
            found - start,
            start
        );
        self.file.seek(SeekFrom::Start(found))?;
        self.position = found;
        Ok(ScanItem::Corrupt {
            pointer: FramePointer {
                offset: start,
                len: u32::try_from(found - start).unwrap_or(u32::MAX),
                lsn: self.last_lsn,
            },
        })
    }

    /// First offset at or after `from` where a valid frame starts
    fn find_valid_frame(&self, from: u64) -> Result<Option<u64>> {
        let file = self.file.get_ref();
        let mut buf = vec![0u8; RESYNC_WINDOW + FRAME_HEADER_SIZE];
        let mut start = from;

        while start + FRAME_HEADER_SIZE as u64 <= self.file_len {
            let len = ((self.file_len - start) as usize).min(buf.len());
            read_exact_at(file, &mut buf[..len], start)?;

            let candidates = (len - FRAME_HEADER_SIZE + 1).min(RESYNC_WINDOW);
            for i in 0..candidates {
                let header = match FrameHeader::parse(&buf[i..len]) {
                    Some(header) => header,
                    None => continue,
                };
                if self.verifies(start + i as u64, &header)? {
                    return Ok(Some(start + i as u64));
                }
            }
            start += RESYNC_WINDOW as u64;
        }
        Ok(None)
    }

    fn valid_frame_at(&self, offset: u64) -> Result<bool> {
        if offset + FRAME_HEADER_SIZE as u64 > self.file_len {
            return Ok(false);
        }
        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        read_exact_at(self.file.get_ref(), &mut header_bytes, offset)?;
        match FrameHeader::parse(&header_bytes) {
            Some(header) => self.verifies(offset, &header),
            None => Ok(false),
        }
    }

    /// Whether `header` at `offset` introduces a complete, newer frame whose
    /// CRC checks out
    fn verifies(&self, offset: u64, header: &FrameHeader) -> Result<bool> {
        if header.lsn <= self.last_lsn
            || !header.is_plausible()
            || offset + header.frame_len() > self.file_len
        {
            return Ok(false);
        }
        let mut payload = vec![0u8; header.len as usize];
        read_exact_at(
            self.file.get_ref(),
            &mut payload,
            offset + FRAME_HEADER_SIZE as u64,
        )?;
        Ok(header.verify(&payload))
    }
}

// =============================================================================
// Positioned Reads
// =============================================================================

/// Read and verify the frame at `pointer`
pub fn read_frame_at(file: &File, pointer: &FramePointer) -> Result<Frame> {
    let mut buf = vec![0u8; pointer.len as usize];
    read_exact_at(file, &mut buf, pointer.offset)?;

    let frame = Frame::decode(&buf)?;
    if frame.lsn != pointer.lsn {
        return Err(NativeIoError::Corruption(format!(
            "frame at offset {} has lsn {}, expected {}",
            pointer.offset, frame.lsn, pointer.lsn
        )));
    }
    Ok(frame)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
