use webserv::handlers::{handle_delete, handle_get};
use webserv::http::{HttpResponse, Method};
use webserv::router::resolve;

fn drain(response: &mut HttpResponse) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match response.read_next_chunk(&mut buf).unwrap() {
            0 => break,
            n => out.extend_from_slice(&buf[..n]),
        }
    }
    out
}

fn server_with_root(root: &std::path::Path) -> webserv::config::ServerConfig {
    let mut server = webserv::config::ServerConfig {
        root: root.to_str().unwrap().to_string(),
        ..Default::default()
    };
    server.locations.push(webserv::config::LocationConfig::new("/".to_string()));
    server
}

#[test]
fn get_serves_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hi there").unwrap();
    let server = server_with_root(dir.path());

    let route = resolve(&server, &Method::GET, "/hello.txt");
    let mut response = HttpResponse::new();
    handle_get(&route, "/hello.txt", &mut response, Some(&server));

    let bytes = drain(&mut response);
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 8"));
    assert!(text.ends_with("hi there"));
}

#[test]
fn get_missing_file_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_with_root(dir.path());

    let route = resolve(&server, &Method::GET, "/nope.txt");
    let mut response = HttpResponse::new();
    handle_get(&route, "/nope.txt", &mut response, Some(&server));
    assert_eq!(response.status_code(), 404);
}

#[test]
fn get_directory_without_trailing_slash_redirects() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let server = server_with_root(dir.path());

    let route = resolve(&server, &Method::GET, "/sub");
    let mut response = HttpResponse::new();
    handle_get(&route, "/sub", &mut response, Some(&server));
    assert_eq!(response.status_code(), 301);

    let bytes = drain(&mut response);
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("Location: /sub/"));
    assert!(text.contains("Content-Length: 0"));
}

#[test]
fn get_directory_without_index_or_autoindex_is_403() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let server = server_with_root(dir.path());

    let route = resolve(&server, &Method::GET, "/sub/");
    let mut response = HttpResponse::new();
    handle_get(&route, "/sub/", &mut response, Some(&server));
    assert_eq!(response.status_code(), 403);
}

#[test]
fn get_directory_with_autoindex_lists_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("a.txt"), b"x").unwrap();
    let mut server = server_with_root(dir.path());
    server.autoindex = true;

    let route = resolve(&server, &Method::GET, "/sub/");
    let mut response = HttpResponse::new();
    handle_get(&route, "/sub/", &mut response, Some(&server));

    let bytes = drain(&mut response);
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("a.txt"));
}

#[test]
fn delete_removes_file_under_upload_dir() {
    let upload_dir = tempfile::tempdir().unwrap();
    let target = upload_dir.path().join("doomed.txt");
    std::fs::write(&target, b"bye").unwrap();

    let mut loc = webserv::config::LocationConfig::new("/uploads".to_string());
    loc.upload_store = Some(upload_dir.path().to_str().unwrap().to_string());
    let mut server = webserv::config::ServerConfig {
        root: upload_dir.path().to_str().unwrap().to_string(),
        ..Default::default()
    };
    server.locations.push(loc);

    let route = resolve(&server, &Method::DELETE, "/uploads/doomed.txt");
    let mut response = handle_delete(&route, Some(&server));
    assert_eq!(response.status_code(), 204);
    assert!(!target.exists());
    drain(&mut response);
}

#[test]
fn delete_outside_upload_dir_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keep.txt"), b"stay").unwrap();
    let server = server_with_root(dir.path());

    let route = resolve(&server, &Method::DELETE, "/keep.txt");
    let response = handle_delete(&route, Some(&server));
    assert_ne!(response.status_code(), 204);
    assert!(dir.path().join("keep.txt").exists());
}
