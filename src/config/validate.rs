use std::collections::{HashMap, HashSet};

use crate::config::types::ServerConfig;

pub fn validate_configs(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut conflict_indices = HashSet::new();

    // Key: (host, port, server_name) -> config indices that claim it
    let mut usage_map: HashMap<(String, u16, String), Vec<usize>> = HashMap::new();
    for (idx, config) in configs.iter().enumerate() {
        let names = if config.server_names.is_empty() {
            vec![String::new()]
        } else {
            config.server_names.clone()
        };
        for name in names {
            let key = (config.host.clone(), config.port, name);
            usage_map.entry(key).or_default().push(idx);
        }
    }

    for ((host, port, name), indices) in usage_map {
        if indices.len() > 1 {
            println!(
                "\x1b[1;31mconflict:\x1b[0m multiple servers bound to {}:{} with name '{}', dropping them",
                host, port, name
            );
            conflict_indices.extend(indices);
        }
    }

    // wildcard vs specific-IP bind conflicts on the same port
    let mut port_hosts: HashMap<u16, HashSet<String>> = HashMap::new();
    for config in &configs {
        port_hosts.entry(config.port).or_default().insert(config.host.clone());
    }
    for (port, hosts) in port_hosts {
        if hosts.contains("0.0.0.0") && hosts.len() > 1 {
            println!(
                "\x1b[1;31mbind conflict:\x1b[0m port {} mixes wildcard 0.0.0.0 with specific hosts {:?}",
                port, hosts
            );
            for (idx, config) in configs.iter().enumerate() {
                if config.port == port {
                    conflict_indices.insert(idx);
                }
            }
        }
    }

    for (idx, config) in configs.iter().enumerate() {
        let mut valid = true;

        for (code, path) in &config.error_pages {
            if *code < 100 || *code > 599 {
                println!(
                    "\x1b[1;31minvalid status code:\x1b[0m server '{:?}' has error_page code {}, must be 100-599",
                    config.server_names, code
                );
                valid = false;
            }
            if std::fs::File::open(path).is_err() {
                println!(
                    "\x1b[1;31mmissing file:\x1b[0m server '{:?}' error_page {} refers to '{}'",
                    config.server_names, code, path
                );
                valid = false;
            }
        }

        if std::fs::read_dir(&config.root).is_err() {
            println!(
                "\x1b[1;31mmissing root:\x1b[0m server '{:?}' root '{}' does not exist",
                config.server_names, config.root
            );
            valid = false;
        }

        for loc in &config.locations {
            if let Some(root) = &loc.root {
                if std::fs::read_dir(root).is_err() {
                    println!(
                        "\x1b[1;31mmissing root:\x1b[0m location '{}' root '{}' does not exist",
                        loc.route, root
                    );
                    valid = false;
                }
            }
            if let Some(store) = &loc.upload_store {
                if std::fs::read_dir(store).is_err() {
                    println!(
                        "\x1b[1;31mmissing upload_store:\x1b[0m location '{}' store '{}' does not exist",
                        loc.route, store
                    );
                    valid = false;
                }
            }
        }

        if !valid {
            conflict_indices.insert(idx);
        }
    }

    let dropped = conflict_indices.len();
    let valid_configs: Vec<ServerConfig> = configs
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !conflict_indices.contains(idx))
        .map(|(_, c)| c)
        .collect();

    if dropped > 0 {
        println!("\x1b[33mresult:\x1b[0m {} server block(s) dropped due to conflicts", dropped);
    }

    valid_configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ServerConfig;

    fn make_config(host: &str, port: u16, name: &str) -> ServerConfig {
        let mut c = ServerConfig::default();
        c.host = host.to_string();
        c.port = port;
        c.server_names = vec![name.to_string()];
        c
    }

    #[test]
    fn no_conflicts() {
        let configs = vec![
            make_config("127.0.0.1", 8001, "s1"),
            make_config("127.0.0.1", 8002, "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn virtual_hosts_ok() {
        let configs = vec![
            make_config("127.0.0.1", 8080, "example.com"),
            make_config("127.0.0.1", 8080, "api.example.com"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn conflict_drops_both() {
        let configs = vec![
            make_config("127.0.0.1", 8080, "same.com"),
            make_config("127.0.0.1", 8080, "same.com"),
            make_config("127.0.0.1", 8081, "other.com"),
        ];
        let valid = validate_configs(configs);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].server_names, vec!["other.com".to_string()]);
    }

    #[test]
    fn wildcard_conflict() {
        let configs = vec![
            make_config("0.0.0.0", 8080, "s1"),
            make_config("127.0.0.1", 8080, "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 0);
    }

    #[test]
    fn wildcard_no_conflict() {
        let configs = vec![
            make_config("0.0.0.0", 8080, "s1"),
            make_config("0.0.0.0", 8080, "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn invalid_status_code() {
        let mut config = make_config("127.0.0.1", 8080, "s1");
        config.error_pages.insert(99, "exists".to_string());
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn missing_error_page_file() {
        let mut config = make_config("127.0.0.1", 8080, "s1");
        config.error_pages.insert(404, "/non/existent/path/err.html".to_string());
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn missing_root() {
        let mut config = make_config("127.0.0.1", 8080, "s1");
        config.root = "/non/existent/dir".to_string();
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn valid_with_tempfile() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("err.html");
        std::fs::write(&file_path, "error").unwrap();

        let mut config = make_config("127.0.0.1", 8080, "s1");
        config.root = temp_dir.path().to_str().unwrap().to_string();
        config
            .error_pages
            .insert(404, file_path.to_str().unwrap().to_string());

        assert_eq!(validate_configs(vec![config]).len(), 1);
    }
}
