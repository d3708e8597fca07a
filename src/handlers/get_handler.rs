use crate::config::ServerConfig;
use crate::http::{generate_autoindex, handle_error, HttpResponse};
use crate::router::RouteMatch;

/// Serves a GET against an already-resolved location: index-file lookup
/// inside directories, autoindex fallback, or a streamed file attachment.
/// `request_path` is the raw request URI, needed to add the trailing
/// slash a directory hit is missing.
pub fn handle_get(
    route: &RouteMatch,
    request_path: &str,
    response: &mut HttpResponse,
    s_cfg: Option<&ServerConfig>,
) {
    if !route.does_exist {
        handle_error(response, 404, s_cfg);
        return;
    }

    if route.is_directory {
        if !request_path.ends_with('/') {
            *response = HttpResponse::redirect(301, &format!("{request_path}/"));
            return;
        }
        if let Some(index_path) = find_index_file(route) {
            serve_file(&index_path, response, s_cfg);
            return;
        }
        if route.autoindex {
            *response = generate_autoindex(&route.fs_path, &route.fs_path.to_string_lossy());
            return;
        }
        handle_error(response, 403, s_cfg);
        return;
    }

    if !route.is_file {
        handle_error(response, 403, s_cfg);
        return;
    }

    serve_file(&route.fs_path, response, s_cfg);
}

fn find_index_file(route: &RouteMatch) -> Option<std::path::PathBuf> {
    route.index_files.iter().find_map(|name| {
        let candidate = route.fs_path.join(name);
        candidate.is_file().then_some(candidate)
    })
}

fn serve_file(path: &std::path::Path, response: &mut HttpResponse, s_cfg: Option<&ServerConfig>) {
    response.start_line(200);
    match response.attach_file(path) {
        Ok(_) => {
            response.end_headers();
        }
        Err(e) => {
            let code = match e.kind() {
                std::io::ErrorKind::NotFound => 404,
                std::io::ErrorKind::PermissionDenied => 403,
                _ => 500,
            };
            handle_error(response, code, s_cfg);
        }
    }
}
