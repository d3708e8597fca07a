use std::collections::HashMap;
use std::sync::OnceLock;

/// Built-in error pages, built once and reused for every response rather
/// than assembled lazily per request.
static CATALOG: OnceLock<HashMap<u16, Vec<u8>>> = OnceLock::new();

fn build_catalog() -> HashMap<u16, Vec<u8>> {
    let mut map = HashMap::new();
    for (code, title) in [
        (400, "Bad Request"),
        (403, "Forbidden"),
        (404, "Not Found"),
        (405, "Method Not Allowed"),
        (408, "Request Timeout"),
        (411, "Length Required"),
        (413, "Payload Too Large"),
        (414, "URI Too Long"),
        (500, "Internal Server Error"),
        (501, "Not Implemented"),
        (502, "Bad Gateway"),
        (504, "Gateway Timeout"),
    ] {
        let body = format!(
            "<html><head><title>{code} {title}</title></head>\
             <body><center><h1>{code} {title}</h1></center><hr></body></html>"
        );
        map.insert(code, body.into_bytes());
    }
    map
}

pub fn get_error_page(code: u16) -> Vec<u8> {
    let catalog = CATALOG.get_or_init(build_catalog);
    catalog
        .get(&code)
        .cloned()
        .unwrap_or_else(|| format!("<html><body><h1>{code} Error</h1></body></html>").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code_has_title() {
        let body = get_error_page(404);
        assert!(String::from_utf8(body).unwrap().contains("Not Found"));
    }

    #[test]
    fn unknown_code_falls_back() {
        let body = get_error_page(799);
        assert!(String::from_utf8(body).unwrap().contains("799"));
    }
}
