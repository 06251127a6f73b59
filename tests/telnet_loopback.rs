//! Live-socket tests: negotiation, IAC reassembly, DSR replies, and ZMODEM
//! steering against a scripted peer on a loopback listener.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use bbsterm::core::zmodem::frame::{build_subpacket, Header};
use bbsterm::core::zmodem::{EndType, FrameType, Receiver, Zrinit};
use bbsterm::{ScreenSnapshot, Session, SessionConfig, SessionEvent};

const IAC: u8 = 255;
const DO: u8 = 253;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;
const ECHO: u8 = 1;
const TTYPE: u8 = 24;

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn config(port: u16, dl: &Path, logs: &Path) -> SessionConfig {
    SessionConfig::new("loopback", "127.0.0.1")
        .port(port)
        .download_dir(dl)
        .logs_dir(logs)
        .logging(false)
}

/// Read from the socket until `needle` appears (5 s bound).
async fn expect_bytes(sock: &mut TcpStream, needle: &[u8]) {
    let mut seen = Vec::new();
    let found = timeout(Duration::from_secs(5), async {
        let mut tmp = [0u8; 1024];
        loop {
            if seen.windows(needle.len()).any(|w| w == needle) {
                return true;
            }
            match sock.read(&mut tmp).await {
                Ok(0) => return false,
                Ok(n) => seen.extend_from_slice(&tmp[..n]),
                Err(_) => return false,
            }
        }
    })
    .await;
    assert!(matches!(found, Ok(true)), "expected {needle:02x?} on the wire");
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn row_text(snapshot: &ScreenSnapshot, row: u16) -> String {
    (0..snapshot.cols)
        .map(|c| snapshot.cell(c, row).unwrap().ch)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// ZRINIT exactly as our receiver greets: CANFDX|CANOVIO|CANFC32.
fn receiver_zrinit() -> Vec<u8> {
    let caps = Zrinit::CANFDX | Zrinit::CANOVIO | Zrinit::CANFC32;
    Header::with_flags(FrameType::Zrinit, [0, 0, 0, caps.bits()]).to_hex()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_negotiation_and_screen_output() {
    let (listener, port) = bind().await;
    let dl = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(&[IAC, DO, TTYPE]).await.unwrap();
        expect_bytes(&mut sock, &[IAC, WILL, TTYPE]).await;

        sock.write_all(&[IAC, SB, TTYPE, 1, IAC, SE]).await.unwrap();
        expect_bytes(
            &mut sock,
            &[IAC, SB, TTYPE, 0, b'A', b'N', b'S', b'I', IAC, SE],
        )
        .await;

        sock.write_all(&[IAC, WILL, ECHO]).await.unwrap();
        expect_bytes(&mut sock, &[IAC, DO, ECHO]).await;

        sock.write_all(b"hello").await.unwrap();
        sleep(Duration::from_secs(2)).await;
    });

    let (session, _events) = Session::connect(config(port, dl.path(), logs.path()))
        .await
        .unwrap();
    wait_until(|| row_text(&session.snapshot(), 0) == "hello", "screen text").await;
    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_iac_sequence_split_across_reads() {
    let (listener, port) = bind().await;
    let dl = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // Chunk 1 ends mid-command; chunk 2 completes WILL ECHO.
        sock.write_all(&[0x41, IAC]).await.unwrap();
        sock.flush().await.unwrap();
        sleep(Duration::from_millis(200)).await;
        sock.write_all(&[WILL, ECHO]).await.unwrap();

        expect_bytes(&mut sock, &[IAC, DO, ECHO]).await;
        sleep(Duration::from_secs(1)).await;
    });

    let (session, _events) = Session::connect(config(port, dl.path(), logs.path()))
        .await
        .unwrap();
    wait_until(|| row_text(&session.snapshot(), 0) == "A", "the A to land").await;
    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dsr_reply_reaches_the_wire() {
    let (listener, port) = bind().await;
    let dl = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // Park the cursor, then ask where it is.
        sock.write_all(b"\x1b[5;4H\x1b[6n").await.unwrap();
        expect_bytes(&mut sock, b"\x1b[5;4R").await;
        sleep(Duration::from_millis(500)).await;
    });

    let (session, _events) = Session::connect(config(port, dl.path(), logs.path()))
        .await
        .unwrap();
    server.await.unwrap();
    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zmodem_download_steering() {
    let (listener, port) = bind().await;
    let dl = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();
    let content = b"file from the board\r\n".repeat(40);
    let expected = content.clone();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"rz\r").await.unwrap();
        sock.write_all(&Header::new(FrameType::Zrqinit).to_hex())
            .await
            .unwrap();
        expect_bytes(&mut sock, &receiver_zrinit()).await;

        let mut zfile = Header::new(FrameType::Zfile).to_binary(true);
        let info = format!("board.dat\0{} 0 0\0", content.len());
        zfile.extend_from_slice(&build_subpacket(info.as_bytes(), EndType::Zcrcw, true));
        sock.write_all(&zfile).await.unwrap();
        expect_bytes(&mut sock, &Header::with_pos(FrameType::Zrpos, 0).to_hex()).await;

        let mut data = Header::with_pos(FrameType::Zdata, 0).to_binary(true);
        data.extend_from_slice(&build_subpacket(&content, EndType::Zcrce, true));
        data.extend_from_slice(
            &Header::with_pos(FrameType::Zeof, content.len() as u32).to_binary(true),
        );
        sock.write_all(&data).await.unwrap();
        expect_bytes(&mut sock, &receiver_zrinit()).await;

        sock.write_all(&Header::new(FrameType::Zfin).to_hex())
            .await
            .unwrap();
        expect_bytes(&mut sock, &Header::new(FrameType::Zfin).to_hex()).await;

        // Transfer over; the stream belongs to the screen again.
        sock.write_all(b"back to board").await.unwrap();
        sleep(Duration::from_secs(2)).await;
    });

    let (session, mut events) = Session::connect(config(port, dl.path(), logs.path()))
        .await
        .unwrap();

    let (path, success) = timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Some(SessionEvent::ZmodemFinished { path, success }) => return (path, success),
                Some(_) => {}
                None => panic!("event stream ended before the transfer finished"),
            }
        }
    })
    .await
    .unwrap();

    assert!(success);
    assert_eq!(path, dl.path().join("board.dat"));
    assert_eq!(std::fs::read(&path).unwrap(), expected);

    wait_until(
        || row_text(&session.snapshot(), 0) == "back to board",
        "post-transfer screen output",
    )
    .await;
    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zmodem_upload_to_receiver_peer() {
    let (listener, port) = bind().await;
    let dl = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();
    let server_dl = tempfile::tempdir().unwrap();
    let server_dl_path = server_dl.path().to_path_buf();

    let src_dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let source = src_dir.path().join("up.bin");
    std::fs::write(&source, &content).unwrap();

    // The peer runs the receiver engine directly over the raw socket.
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut rx = Receiver::new(&server_dl_path);
        let mut out = Vec::new();
        let mut events = Vec::new();
        rx.start(&mut out);
        sock.write_all(&out).await.unwrap();

        let mut buf = [0u8; 4096];
        while !rx.is_done() {
            let n = timeout(Duration::from_secs(5), sock.read(&mut buf))
                .await
                .expect("receiver peer timed out")
                .unwrap();
            if n == 0 {
                break;
            }
            let mut out = Vec::new();
            rx.feed(&buf[..n], &mut out, &mut events);
            if !out.is_empty() {
                sock.write_all(&out).await.unwrap();
            }
        }
        assert!(rx.is_done());
    });

    let (session, mut events) = Session::connect(config(port, dl.path(), logs.path()))
        .await
        .unwrap();
    session.upload(&source).await.unwrap();

    let success = timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Some(SessionEvent::ZmodemFinished { success, .. }) => return success,
                Some(SessionEvent::ZmodemError(message)) => panic!("upload failed: {message}"),
                Some(_) => {}
                None => panic!("event stream ended before the upload finished"),
            }
        }
    })
    .await
    .unwrap();
    assert!(success);

    server.await.unwrap();
    assert_eq!(
        std::fs::read(server_dl.path().join("up.bin")).unwrap(),
        content
    );
    session.disconnect().await;
}
