use std::collections::HashMap;

use crate::http::Method;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_MAX_BODY: usize = 1_048_576;
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 7;
pub const DEFAULT_CGI_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub route: String,
    pub root: Option<String>,
    pub autoindex: Option<bool>,
    pub index: Vec<String>,
    pub methods: Vec<Method>,
    pub redirect: Option<String>,
    pub upload_store: Option<String>,
    pub cgi_pass: Option<String>,
    pub script_interpreter: Option<String>,
    pub cgi_timeout_ms: Option<u64>,
    pub client_max_body_size: Option<usize>,
    pub client_timeout_secs: Option<u64>,
}

impl LocationConfig {
    pub fn new(route: String) -> Self {
        Self {
            route,
            root: None,
            autoindex: None,
            index: Vec::new(),
            methods: Vec::new(),
            redirect: None,
            upload_store: None,
            cgi_pass: None,
            script_interpreter: None,
            cgi_timeout_ms: None,
            client_max_body_size: None,
            client_timeout_secs: None,
        }
    }

    pub fn is_method_allowed(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub server_names: Vec<String>,
    pub default_server: bool,
    pub root: String,
    pub client_max_body_size: usize,
    pub client_timeout_secs: u64,
    pub index: Vec<String>,
    pub autoindex: bool,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            server_names: Vec::new(),
            default_server: false,
            root: DEFAULT_ROOT.to_string(),
            client_max_body_size: DEFAULT_MAX_BODY,
            client_timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
            index: vec!["index.html".to_string()],
            autoindex: false,
            error_pages: HashMap::new(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Returns the most specific location whose `route` prefixes `path`, if any.
    pub fn match_location(&self, path: &str) -> Option<&LocationConfig> {
        self.locations
            .iter()
            .filter(|l| path == l.route || path.starts_with(&prefix_with_slash(&l.route)))
            .max_by_key(|l| l.route.len())
    }

    pub fn effective_root<'a>(&'a self, loc: Option<&'a LocationConfig>) -> &'a str {
        loc.and_then(|l| l.root.as_deref()).unwrap_or(&self.root)
    }

    pub fn effective_index<'a>(&'a self, loc: Option<&'a LocationConfig>) -> &'a [String] {
        match loc {
            Some(l) if !l.index.is_empty() => &l.index,
            _ => &self.index,
        }
    }

    pub fn effective_autoindex(&self, loc: Option<&LocationConfig>) -> bool {
        loc.and_then(|l| l.autoindex).unwrap_or(self.autoindex)
    }

    pub fn effective_max_body(&self, loc: Option<&LocationConfig>) -> usize {
        loc.and_then(|l| l.client_max_body_size)
            .unwrap_or(self.client_max_body_size)
    }

    pub fn effective_client_timeout_secs(&self, loc: Option<&LocationConfig>) -> u64 {
        loc.and_then(|l| l.client_timeout_secs)
            .unwrap_or(self.client_timeout_secs)
    }

    pub fn effective_cgi_timeout_ms(&self, loc: Option<&LocationConfig>) -> u64 {
        loc.and_then(|l| l.cgi_timeout_ms)
            .unwrap_or(DEFAULT_CGI_TIMEOUT_MS)
    }

    pub fn matches_host(&self, host: &str) -> bool {
        self.server_names.iter().any(|n| n == host)
    }
}

fn prefix_with_slash(route: &str) -> String {
    if route.ends_with('/') {
        route.to_string()
    } else {
        format!("{}/", route)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub servers: Vec<ServerConfig>,
}
