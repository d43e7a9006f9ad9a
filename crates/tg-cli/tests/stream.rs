//! End-to-end: `tg serve` over a real socket, then `tg reconstruct`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn tg_binary() -> std::path::PathBuf {
    assert_cmd::cargo::cargo_bin!("tg").into()
}

struct Server(Child);

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn start(dir: &TempDir, addr: &str) -> Server {
    let child = Command::new(tg_binary())
        .env("TG_DATA_DIR", dir.path())
        .args(["serve", "--bind", addr])
        .spawn()
        .unwrap();
    Server(child)
}

fn connect(addr: &str) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => panic!("server never came up on {addr}: {e}"),
        }
    }
}

fn reconstruct(dir: &TempDir, id: &str) -> Option<String> {
    let output = Command::new(tg_binary())
        .env("TG_DATA_DIR", dir.path())
        .args(["reconstruct", id])
        .output()
        .unwrap();
    output
        .status
        .success()
        .then(|| String::from_utf8(output.stdout).unwrap())
}

#[test]
fn test_streamed_session_reconstructs() {
    let dir = TempDir::new().unwrap();
    let addr = format!("127.0.0.1:{}", free_port());
    let _server = start(&dir, &addr);

    let text = "she sells sea shells by the sea shore, the shells she sells are sea shells";
    let mut stream = connect(&addr);
    let mut id = [0u8; 36];
    stream.read_exact(&mut id).unwrap();
    let id = std::str::from_utf8(&id).unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let bytes: Vec<u8> = text
        .chars()
        .flat_map(|c| (c as i32).to_le_bytes())
        .collect();
    // uneven writes, some splitting a symbol
    for piece in bytes.chunks(13) {
        stream.write_all(piece).unwrap();
    }
    stream.shutdown(std::net::Shutdown::Write).unwrap();
    drop(stream);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match reconstruct(&dir, &id) {
            Some(rebuilt) if rebuilt == text => break,
            _ if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(100)),
            other => panic!("session never completed, last read {other:?}"),
        }
    }
}
