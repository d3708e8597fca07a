use webserv::config::parse_str;
use webserv::http::Method;
use webserv::router::resolve;

#[test]
fn end_to_end_config_to_route_for_static_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hello").unwrap();

    let cfg = parse_str(&format!(
        "server {{
            host 127.0.0.1;
            port 8080;
            root {};

            location {{
                route /;
            }}
        }}",
        dir.path().display()
    ))
    .unwrap();

    let m = resolve(&cfg.servers[0], &Method::GET, "/index.html");
    assert!(m.is_valid_match);
    assert!(m.method_allowed);
    assert!(m.is_file);
    assert_eq!(m.fs_path, dir.path().join("index.html"));
}

#[test]
fn redirect_location_is_flagged() {
    let cfg = parse_str(
        "server {
            host 127.0.0.1;
            port 8080;

            location {
                route /old;
                redirect /new;
            }
        }",
    )
    .unwrap();

    let m = resolve(&cfg.servers[0], &Method::GET, "/old/page");
    assert!(m.is_valid_match);
    assert!(m.is_redirect);
    assert_eq!(m.redirect_url.as_deref(), Some("/new"));
}

#[test]
fn method_restriction_from_config_is_enforced() {
    let cfg = parse_str(
        "server {
            host 127.0.0.1;
            port 8080;

            location {
                route /readonly;
                methods GET;
            }
        }",
    )
    .unwrap();

    let get = resolve(&cfg.servers[0], &Method::GET, "/readonly/file");
    assert!(get.method_allowed);
    let post = resolve(&cfg.servers[0], &Method::POST, "/readonly/file");
    assert!(post.is_valid_match);
    assert!(!post.method_allowed);
}

#[test]
fn unmatched_path_falls_back_to_root_location() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = parse_str(&format!(
        "server {{
            host 127.0.0.1;
            port 8080;
            root {};

            location {{
                route /api;
                methods GET;
            }}
        }}",
        dir.path().display()
    ))
    .unwrap();

    // No "/" location was configured, so a path outside /api has nothing to match.
    let m = resolve(&cfg.servers[0], &Method::GET, "/elsewhere");
    assert!(!m.is_valid_match);
}
