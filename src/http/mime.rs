//! MIME type detection based on file extensions.

/// Maps a file extension (without the dot) to a Content-Type value.
/// Unknown extensions fall back to `application/octet-stream`.
pub fn from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Content-Type for a file path, derived from its extension.
pub fn from_path(path: &std::path::Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .map(from_extension)
        .unwrap_or("application/octet-stream")
}
