use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use webserv::config::parse_str;
use webserv::server::Server;

fn spawn_server(conf: &str) {
    let app_config = parse_str(conf).expect("test config must parse");
    thread::spawn(move || {
        let mut server = Server::new(app_config).expect("server must bind");
        server.run().expect("event loop");
    });
    thread::sleep(Duration::from_millis(200));
}

#[test]
fn chunked_multipart_upload_lands_on_disk() {
    let root = tempfile::tempdir().unwrap();
    let uploads = root.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();

    spawn_server(&format!(
        "server {{
            host 127.0.0.1;
            port 18080;
            root {root};

            location {{
                route /upload;
                methods POST;
                upload_store {uploads};
            }}
        }}",
        root = root.path().display(),
        uploads = uploads.display(),
    ));

    let mut stream = TcpStream::connect("127.0.0.1:18080").expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let body = b"--X\r\nContent-Disposition: form-data; name=\"file\"; filename=\"note.txt\"\r\n\r\nHello World!\r\n--X--\r\n";
    let headers = format!(
        "POST /upload HTTP/1.1\r\nHost: 127.0.0.1:18080\r\nContent-Type: multipart/form-data; boundary=X\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(headers.as_bytes()).unwrap();
    stream.write_all(body).unwrap();
    stream.flush().unwrap();

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.contains("201"), "unexpected response: {response}");

    let found = std::fs::read_dir(&uploads)
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| std::fs::read(e.path()).map(|c| c == b"Hello World!").unwrap_or(false));
    assert!(found, "uploaded file not found with expected contents");
}

#[test]
fn pipelined_requests_both_get_responses() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "Hello").unwrap();

    spawn_server(&format!(
        "server {{
            host 127.0.0.1;
            port 18081;
            root {root};

            location {{
                route /;
            }}
        }}",
        root = root.path().display(),
    ));

    let mut stream = TcpStream::connect("127.0.0.1:18081").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let pipeline = "GET /index.html HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n\
                    GET /index.html HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
    stream.write_all(pipeline.as_bytes()).unwrap();

    let mut buf = [0u8; 4096];
    let mut received = String::new();
    while received.matches("200 OK").count() < 2 {
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "connection closed before both responses arrived");
        received.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
}

#[test]
fn slow_trickled_chunked_body_still_completes() {
    let root = tempfile::tempdir().unwrap();
    let uploads = root.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();

    spawn_server(&format!(
        "server {{
            host 127.0.0.1;
            port 18082;
            root {root};

            location {{
                route /upload;
                methods POST;
                upload_store {uploads};
            }}
        }}",
        root = root.path().display(),
        uploads = uploads.display(),
    ));

    let mut stream = TcpStream::connect("127.0.0.1:18082").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

    let part = b"--X\r\nContent-Disposition: form-data; name=\"file\"; filename=\"slow.txt\"\r\n\r\n";
    let tail = b"trickled\r\n--X--\r\n";
    let mut body = Vec::new();
    body.extend_from_slice(part);
    body.extend_from_slice(tail);

    let headers = format!(
        "POST /upload HTTP/1.1\r\nHost: 127.0.0.1:18082\r\nContent-Type: multipart/form-data; boundary=X\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(headers.as_bytes()).unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(100));

    for byte in &body {
        stream.write_all(&[*byte]).unwrap();
        stream.flush().unwrap();
    }

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.contains("201"), "unexpected response: {response}");
}
