//! End-to-end ZMODEM protocol loop: the sender and receiver engines driven
//! against each other through in-memory byte queues, files on real tempdirs.

use std::fs;
use std::path::Path;

use bbsterm::core::zmodem::frame::Header;
use bbsterm::core::zmodem::{FrameType, Receiver, Sender, TransferEvent, Zrinit};

/// Shuttle bytes between the two engines until both finish.
fn run_session(tx: &mut Sender, rx: &mut Receiver, mut sender_out: Vec<u8>, mut receiver_out: Vec<u8>) -> (Vec<TransferEvent>, Vec<TransferEvent>) {
    let mut tx_events = Vec::new();
    let mut rx_events = Vec::new();

    for _ in 0..200 {
        let inbound = std::mem::take(&mut sender_out);
        rx.feed(&inbound, &mut receiver_out, &mut rx_events);

        let inbound = std::mem::take(&mut receiver_out);
        tx.feed(&inbound, &mut sender_out, &mut tx_events);
        tx.pump(&mut sender_out, &mut tx_events);

        if tx.is_done() && rx.is_done() && sender_out.is_empty() && receiver_out.is_empty() {
            break;
        }
    }
    assert!(tx.is_done(), "sender never finished");
    assert!(rx.is_done(), "receiver never finished");
    (tx_events, rx_events)
}

fn make_source(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_small_file_round_trip() {
    let src_dir = tempfile::tempdir().unwrap();
    let dl_dir = tempfile::tempdir().unwrap();
    let content = b"ZMODEM was designed by Chuck Forsberg.\r\n".repeat(20);
    let source = make_source(src_dir.path(), "notes.txt", &content);

    let mut sender_out = Vec::new();
    let mut tx = Sender::new(&source).unwrap();
    tx.start(&mut sender_out);
    let mut rx = Receiver::new(dl_dir.path());
    let mut receiver_out = Vec::new();
    rx.start(&mut receiver_out);

    let (tx_events, rx_events) = run_session(&mut tx, &mut rx, sender_out, receiver_out);

    let delivered = dl_dir.path().join("notes.txt");
    assert_eq!(fs::read(&delivered).unwrap(), content);

    assert!(tx_events
        .iter()
        .any(|e| matches!(e, TransferEvent::Finished { success: true, .. })));
    assert!(rx_events
        .iter()
        .any(|e| matches!(e, TransferEvent::Finished { success: true, path } if path == &delivered)));
}

#[test]
fn test_multi_batch_file_crosses_pump_boundaries() {
    let src_dir = tempfile::tempdir().unwrap();
    let dl_dir = tempfile::tempdir().unwrap();
    // Larger than one 64-block pump batch, not a multiple of the block size.
    let content: Vec<u8> = (0..150_001u32).map(|i| (i.wrapping_mul(7) % 251) as u8).collect();
    let source = make_source(src_dir.path(), "payload.bin", &content);

    let mut sender_out = Vec::new();
    let mut tx = Sender::new(&source).unwrap();
    tx.start(&mut sender_out);
    let mut rx = Receiver::new(dl_dir.path());
    let mut receiver_out = Vec::new();
    rx.start(&mut receiver_out);

    let (_, rx_events) = run_session(&mut tx, &mut rx, sender_out, receiver_out);

    assert_eq!(fs::read(dl_dir.path().join("payload.bin")).unwrap(), content);

    // Progress must have been reported along the way with a running total.
    let progress: Vec<u64> = rx_events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress { bytes, .. } => Some(*bytes),
            _ => None,
        })
        .collect();
    assert!(progress.len() > 100);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*progress.last().unwrap(), 150_001);
}

#[test]
fn test_crc16_only_receiver() {
    let src_dir = tempfile::tempdir().unwrap();
    let dl_dir = tempfile::tempdir().unwrap();
    let content = b"legacy 16-bit frame check".to_vec();
    let source = make_source(src_dir.path(), "legacy.txt", &content);

    let mut sender_out = Vec::new();
    let mut tx = Sender::new(&source).unwrap();
    tx.start(&mut sender_out);
    let mut rx = Receiver::new(dl_dir.path());
    let mut discard = Vec::new();
    rx.start(&mut discard);

    // Replace the receiver's greeting with one lacking CANFC32 so the sender
    // must fall back to CRC-16 framing.
    let caps = Zrinit::CANFDX | Zrinit::CANOVIO;
    let receiver_out = Header::with_flags(FrameType::Zrinit, [0, 0, 0, caps.bits()]).to_hex();

    let (_, _) = run_session(&mut tx, &mut rx, sender_out, receiver_out);
    assert_eq!(fs::read(dl_dir.path().join("legacy.txt")).unwrap(), content);
}

#[test]
fn test_zero_length_file_round_trip() {
    let src_dir = tempfile::tempdir().unwrap();
    let dl_dir = tempfile::tempdir().unwrap();
    let source = make_source(src_dir.path(), "empty.dat", b"");

    let mut sender_out = Vec::new();
    let mut tx = Sender::new(&source).unwrap();
    tx.start(&mut sender_out);
    let mut rx = Receiver::new(dl_dir.path());
    let mut receiver_out = Vec::new();
    rx.start(&mut receiver_out);

    run_session(&mut tx, &mut rx, sender_out, receiver_out);

    let delivered = dl_dir.path().join("empty.dat");
    assert!(delivered.exists());
    assert_eq!(fs::metadata(&delivered).unwrap().len(), 0);
}
