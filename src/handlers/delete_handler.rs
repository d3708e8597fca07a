use std::fs;
use std::io::ErrorKind;

use crate::config::ServerConfig;
use crate::http::{handle_error, HttpResponse};
use crate::router::RouteMatch;

/// Deletes a file inside the location's configured upload directory only;
/// anything outside `upload_dir` (including the directory itself) is
/// refused rather than canonicalized away, since the route's `fs_path`
/// has already been traversal-checked by `router::resolve`.
pub fn handle_delete(route: &RouteMatch, s_cfg: Option<&ServerConfig>) -> HttpResponse {
    let mut response = HttpResponse::new();

    let Some(upload_dir) = &route.upload_dir else {
        handle_error(&mut response, 403, s_cfg);
        return response;
    };

    let Ok(absolute_upload_dir) = upload_dir.canonicalize() else {
        handle_error(&mut response, 404, s_cfg);
        return response;
    };

    if !route.fs_path.starts_with(upload_dir) {
        handle_error(&mut response, 403, s_cfg);
        return response;
    }

    let absolute_target = match route.fs_path.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::NotFound => 404,
                _ => 403,
            };
            handle_error(&mut response, code, s_cfg);
            return response;
        }
    };

    if !absolute_target.starts_with(&absolute_upload_dir) || absolute_target.is_dir() {
        handle_error(&mut response, 403, s_cfg);
        return response;
    }

    match fs::remove_file(&absolute_target) {
        Ok(()) => {
            response.start_line(204).add_header("Content-Length", "0");
            response.end_headers();
            response
        }
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::PermissionDenied => 403,
                ErrorKind::NotFound => 404,
                _ => 500,
            };
            handle_error(&mut response, code, s_cfg);
            response
        }
    }
}
