use std::path::{Path, PathBuf};

use crate::config::{LocationConfig, ServerConfig};
use crate::http::Method;

#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub location: Option<LocationConfig>,
    pub is_valid_match: bool,
    pub method_allowed: bool,
    pub fs_path: PathBuf,
    pub script_path: Option<PathBuf>,
    pub interpreter: Option<String>,
    pub path_info: Option<String>,
    pub is_cgi: bool,
    pub is_redirect: bool,
    pub is_directory: bool,
    pub is_file: bool,
    pub does_exist: bool,
    pub autoindex: bool,
    pub upload_dir: Option<PathBuf>,
    pub redirect_url: Option<String>,
    pub max_body: usize,
    pub index_files: Vec<String>,
    pub client_timeout_secs: u64,
    pub cgi_timeout_ms: u64,
}

impl RouteMatch {
    fn invalid() -> Self {
        Self {
            location: None,
            is_valid_match: false,
            method_allowed: false,
            fs_path: PathBuf::new(),
            script_path: None,
            interpreter: None,
            path_info: None,
            is_cgi: false,
            is_redirect: false,
            is_directory: false,
            is_file: false,
            does_exist: false,
            autoindex: false,
            upload_dir: None,
            redirect_url: None,
            max_body: 0,
            index_files: Vec::new(),
            client_timeout_secs: 0,
            cgi_timeout_ms: 0,
        }
    }
}

/// Resolves a request path against one already-selected virtual server.
/// Host selection happens one layer up (`ServerConfig::matches_host`);
/// this is the longest-prefix location match, path canonicalization and
/// CGI script/PATH_INFO split described for the router component.
pub fn resolve(server: &ServerConfig, method: &Method, path: &str) -> RouteMatch {
    let Some(location) = server.match_location(path) else {
        return RouteMatch::invalid();
    };

    let root = server.effective_root(Some(location));
    let relative = path.strip_prefix(&location.route).unwrap_or(path);
    let fs_path = canonical_join(root, relative);

    let metadata = fs_path.metadata().ok();
    let does_exist = metadata.is_some();
    let is_directory = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
    let is_file = metadata.as_ref().map(|m| m.is_file()).unwrap_or(false);

    let (script_path, interpreter, path_info, is_cgi) = if location.cgi_pass.is_some() {
        let (script, path_info) = split_cgi(&fs_path);
        (script, location.script_interpreter.clone(), path_info, true)
    } else {
        (None, None, None, false)
    };

    RouteMatch {
        method_allowed: location.is_method_allowed(method),
        is_valid_match: true,
        fs_path,
        script_path,
        interpreter,
        path_info,
        is_cgi,
        is_redirect: location.redirect.is_some(),
        is_directory,
        is_file,
        does_exist,
        autoindex: server.effective_autoindex(Some(location)),
        upload_dir: location.upload_store.as_ref().map(PathBuf::from),
        redirect_url: location.redirect.clone(),
        max_body: server.effective_max_body(Some(location)),
        index_files: server.effective_index(Some(location)).to_vec(),
        client_timeout_secs: server.effective_client_timeout_secs(Some(location)),
        cgi_timeout_ms: server.effective_cgi_timeout_ms(Some(location)),
        location: Some(location.clone()),
    }
}

/// Splits on `/`, drops empty segments and `.`, pops on `..` without ever
/// popping above `root`.
fn canonical_join(root: &str, relative: &str) -> PathBuf {
    let mut segments: Vec<&str> = Vec::new();
    for seg in relative.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut path = PathBuf::from(root);
    for seg in segments {
        path.push(seg);
    }
    path
}

/// Iteratively strips trailing `/segment` from `fs_path` until the
/// remainder is a regular file; that becomes the script path, and the
/// stripped tail becomes `PATH_INFO`.
fn split_cgi(fs_path: &Path) -> (Option<PathBuf>, Option<String>) {
    let mut current = fs_path.to_path_buf();
    let mut tail: Vec<String> = Vec::new();

    loop {
        if current.is_file() {
            let path_info = if tail.is_empty() {
                None
            } else {
                tail.reverse();
                Some(format!("/{}", tail.join("/")))
            };
            return (Some(current), path_info);
        }
        match current.file_name().map(|f| f.to_string_lossy().into_owned()) {
            Some(name) => {
                tail.push(name);
                if !current.pop() {
                    return (None, None);
                }
            }
            None => return (None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn server_with_location(route: &str, methods: Vec<Method>, root: &str) -> ServerConfig {
        let mut loc = LocationConfig::new(route.to_string());
        loc.methods = methods;
        let mut server = ServerConfig {
            root: root.to_string(),
            ..Default::default()
        };
        server.locations.push(loc);
        server
    }

    #[test]
    fn matches_longest_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server_with_location("/", vec![], dir.path().to_str().unwrap());
        let mut nested = LocationConfig::new("/a/b".to_string());
        nested.methods = vec![Method::GET];
        server.locations.push(nested);

        let m = resolve(&server, &Method::GET, "/a/b/c");
        assert!(m.is_valid_match);
        assert_eq!(m.location.unwrap().route, "/a/b");
    }

    #[test]
    fn no_location_is_invalid() {
        let server = ServerConfig::default();
        let m = resolve(&server, &Method::GET, "/x");
        assert!(!m.is_valid_match);
    }

    #[test]
    fn method_not_allowed_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_with_location("/", vec![Method::GET], dir.path().to_str().unwrap());
        let m = resolve(&server, &Method::POST, "/anything");
        assert!(m.is_valid_match);
        assert!(!m.method_allowed);
    }

    #[test]
    fn path_traversal_never_escapes_root() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_with_location("/", vec![], dir.path().to_str().unwrap());
        let m = resolve(&server, &Method::GET, "/../../etc/passwd");
        assert_eq!(m.fs_path, dir.path().join("etc").join("passwd"));
    }

    #[test]
    fn cgi_split_finds_script_and_path_info() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("script.cgi"), b"#!/bin/sh\n").unwrap();
        let mut loc = LocationConfig::new("/cgi-bin".to_string());
        loc.cgi_pass = Some("script.cgi".to_string());
        let mut server = ServerConfig {
            root: dir.path().to_str().unwrap().to_string(),
            ..Default::default()
        };
        server.locations.push(loc);

        let m = resolve(&server, &Method::GET, "/cgi-bin/script.cgi/extra/info");
        assert!(m.is_cgi);
        assert_eq!(m.script_path, Some(dir.path().join("script.cgi")));
        assert_eq!(m.path_info, Some("/extra/info".to_string()));
    }
}
