//! Loopback HTTP server for transfer tests.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use crossbeam_channel as channel;

pub struct Request {
    pub line: String,
    pub body_len: usize,
}

/// Read one request, consuming a `Content-Length` body if present.
pub fn read_request(stream: &mut TcpStream) -> Request {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).unwrap_or(0);
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let line = head.lines().next().unwrap_or_default().to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_len = data.len().saturating_sub(header_end);
    while body_len < content_length {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => body_len += n,
        }
    }
    Request { line, body_len }
}

fn respond(stream: &mut TcpStream, status: &str, body_len: usize) {
    let head = format!("HTTP/1.1 {status}\r\nContent-Length: {body_len}\r\nConnection: close\r\n\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&vec![7u8; body_len]);
}

/// Serve a single request on an ephemeral port. Returns the server's upload
/// URL and a channel yielding the request once answered.
pub fn serve_once(status: &'static str, body_len: usize) -> (String, channel::Receiver<Request>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = channel::bounded(1);
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let req = read_request(&mut stream);
            respond(&mut stream, status, body_len);
            let _ = tx.send(req);
        }
    });
    (format!("http://{addr}/speedtest/upload.php"), rx)
}

/// Answer every request with `200 OK` and `body_len` bytes until the test
/// process exits.
pub fn serve_forever(body_len: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            thread::spawn(move || {
                read_request(&mut stream);
                respond(&mut stream, "200 OK", body_len);
            });
        }
    });
    format!("http://{addr}/speedtest/upload.php")
}
