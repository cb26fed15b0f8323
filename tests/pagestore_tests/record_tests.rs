//! Tests for block log records
//!
//! These tests verify:
//! - Log header encoding and rejection of foreign files
//! - Frame encoding, decoding and CRC validation
//! - Block checksums

use nativeio::pagestore::{
    BlockRecord, Frame, FrameHeader, LogHeader, LogRecord, FRAME_HEADER_SIZE, LOG_HEADER_SIZE,
    MAX_FRAME_PAYLOAD,
};
use nativeio::NativeIoError;

// =============================================================================
// Helper Functions
// =============================================================================

fn block(seq: u64, data: &[u8]) -> LogRecord {
    LogRecord::Block(BlockRecord::new(7, seq, 0, 1, 0, data.len() as u64, data.to_vec()))
}

// =============================================================================
// Log Header Tests
// =============================================================================

#[test]
fn test_header_layout() {
    let header = LogHeader::new(0xDEAD_BEEF, 4096);
    let bytes = header.encode();

    assert_eq!(bytes.len() as u64, LOG_HEADER_SIZE);
    assert_eq!(&bytes[0..4], b"NIOL");
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1);
    assert_eq!(LogHeader::decode(&bytes).unwrap(), header);
}

#[test]
fn test_header_bad_magic_is_io_failure() {
    let mut bytes = LogHeader::new(1, 4096).encode();
    bytes[0..4].copy_from_slice(b"XXXX");

    match LogHeader::decode(&bytes) {
        Err(NativeIoError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
        other => panic!("expected Io(InvalidData), got {:?}", other),
    }
}

#[test]
fn test_header_unknown_version_rejected() {
    let mut bytes = LogHeader::new(1, 4096).encode();
    bytes[4..6].copy_from_slice(&9u16.to_le_bytes());
    assert!(matches!(LogHeader::decode(&bytes), Err(NativeIoError::Io(_))));
}

#[test]
fn test_header_truncated_rejected() {
    let bytes = LogHeader::new(1, 4096).encode();
    assert!(LogHeader::decode(&bytes[..10]).is_err());
}

// =============================================================================
// Frame Tests
// =============================================================================

#[test]
fn test_frame_decode_matches_encode() {
    let frame = Frame::new(42, block(3, b"hello world"));
    let bytes = frame.encode().unwrap();

    let header = FrameHeader::parse(&bytes).unwrap();
    assert_eq!(header.lsn, 42);
    assert_eq!(header.frame_len(), bytes.len() as u64);
    assert_eq!(Frame::decode(&bytes).unwrap(), frame);
}

#[test]
fn test_frame_payload_corruption_detected() {
    let frame = Frame::new(1, LogRecord::Create {
        file_id: 1,
        name: "alpha".to_string(),
    });
    let mut bytes = frame.encode().unwrap().to_vec();
    bytes[FRAME_HEADER_SIZE + 2] ^= 0xFF;

    assert!(matches!(Frame::decode(&bytes), Err(NativeIoError::Corruption(_))));
}

#[test]
fn test_frame_lsn_is_covered_by_crc() {
    let frame = Frame::new(5, LogRecord::Delete { file_id: 3 });
    let mut bytes = frame.encode().unwrap().to_vec();
    bytes[0] ^= 0x01;

    assert!(matches!(Frame::decode(&bytes), Err(NativeIoError::Corruption(_))));
}

#[test]
fn test_frame_incomplete_rejected() {
    let bytes = Frame::new(1, block(1, &[9u8; 64])).encode().unwrap();

    assert!(FrameHeader::parse(&bytes[..FRAME_HEADER_SIZE - 1]).is_none());
    assert!(matches!(
        Frame::decode(&bytes[..bytes.len() - 1]),
        Err(NativeIoError::Corruption(_))
    ));
}

#[test]
fn test_frame_oversized_record_rejected() {
    let data = vec![0u8; MAX_FRAME_PAYLOAD as usize + 1];
    let result = Frame::new(1, block(1, &data)).encode();
    assert!(matches!(result, Err(NativeIoError::InvalidArgument(_))));
}

#[test]
fn test_implausible_length_flagged() {
    let header = FrameHeader {
        lsn: 1,
        crc: 0,
        len: MAX_FRAME_PAYLOAD + 1,
    };
    assert!(!header.is_plausible());
}

// =============================================================================
// Block Record Tests
// =============================================================================

#[test]
fn test_block_checksum() {
    let mut record = BlockRecord::new(1, 1, 0, 1, 0, 4, vec![1, 2, 3, 4]);
    assert!(record.verify());

    record.data[2] = 0;
    assert!(!record.verify());
}
