use webserv::config::{parse_str, validate_configs};

#[test]
fn parses_minimal_server_block() {
    let cfg = parse_str(
        "server {
            host 127.0.0.1;
            port 8080;
        }",
    )
    .unwrap();
    assert_eq!(cfg.servers.len(), 1);
    let s = &cfg.servers[0];
    assert_eq!(s.host, "127.0.0.1");
    assert_eq!(s.port, 8080);
    assert_eq!(s.index, vec!["index.html".to_string()]);
}

#[test]
fn parses_location_blocks_and_directives() {
    let cfg = parse_str(
        r#"server {
            host 0.0.0.0;
            port 9090;
            server_name example.com www.example.com;
            client_max_body_size 2m;

            location {
                route /uploads;
                methods GET POST;
                upload_store ./www/uploads;
                client_max_body_size 10m;
            }
        }"#,
    )
    .unwrap();

    let s = &cfg.servers[0];
    assert_eq!(s.server_names, vec!["example.com", "www.example.com"]);
    assert_eq!(s.client_max_body_size, 2 * 1024 * 1024);
    assert_eq!(s.locations.len(), 1);
    let loc = &s.locations[0];
    assert_eq!(loc.route, "/uploads");
    assert_eq!(loc.client_max_body_size, Some(10 * 1024 * 1024));
    assert_eq!(loc.upload_store.as_deref(), Some("./www/uploads"));
}

#[test]
fn parses_cgi_location() {
    let cfg = parse_str(
        r#"server {
            host 127.0.0.1;
            port 8080;

            location {
                route /cgi-bin;
                cgi_pass script.py;
                script_interpreter /usr/bin/python3;
                cgi_timeout 2000;
            }
        }"#,
    )
    .unwrap();
    let loc = &cfg.servers[0].locations[0];
    assert_eq!(loc.cgi_pass.as_deref(), Some("script.py"));
    assert_eq!(loc.script_interpreter.as_deref(), Some("/usr/bin/python3"));
    assert_eq!(loc.cgi_timeout_ms, Some(2000));
}

#[test]
fn rejects_duplicate_index_directive() {
    let err = parse_str(
        "server {
            index a.html;
            index b.html;
        }",
    )
    .unwrap_err();
    assert!(format!("{}", err).contains("duplicate 'index'"));
}

#[test]
fn rejects_unknown_directive() {
    let err = parse_str("server { frobnicate on; }").unwrap_err();
    assert!(format!("{}", err).contains("unknown server directive"));
}

#[test]
fn rejects_location_missing_route() {
    let err = parse_str("server { location { autoindex on; } }").unwrap_err();
    assert!(format!("{}", err).contains("missing a 'route' directive"));
}

#[test]
fn rejects_empty_config() {
    assert!(parse_str("").is_err());
}

#[test]
fn size_suffixes_are_parsed() {
    let cfg = parse_str("server { client_max_body_size 5k; }").unwrap();
    assert_eq!(cfg.servers[0].client_max_body_size, 5 * 1024);
}

#[test]
fn parse_then_validate_drops_conflicting_hosts() {
    let cfg = parse_str(
        "server {
            host 127.0.0.1;
            port 8080;
            server_name same.com;
        }
        server {
            host 127.0.0.1;
            port 8080;
            server_name same.com;
        }",
    )
    .unwrap();
    assert_eq!(cfg.servers.len(), 2);
    let valid = validate_configs(cfg.servers);
    assert!(valid.is_empty());
}
