//! Extension hints, byte sniffing and language hints for discovered files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::core::Classification;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "asciidoc", "adoc",
    "rs", "py", "pyi", "js", "mjs", "cjs", "ts", "jsx", "tsx", "java", "c", "cpp", "cxx", "cc",
    "h", "hpp", "hxx", "cs", "go", "rb", "php", "swift", "kt", "kts", "scala", "clj", "cljs",
    "hs", "ml", "fs", "fsx", "dart", "elm", "ex", "exs", "erl", "hrl", "nim", "zig", "lua",
    "pl", "r", "jl", "vue", "svelte",
    "html", "htm", "xml", "xhtml", "css", "scss", "sass", "less", "svg",
    "json", "jsonl", "ndjson", "yaml", "yml", "toml", "ini", "cfg", "conf", "properties", "env",
    "sql", "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd", "dockerfile", "cmake", "gradle",
    "tex", "bib", "graphql", "gql", "prisma", "proto", "thrift", "csv", "tsv",
    "diff", "patch", "lock", "gitignore", "gitattributes", "editorconfig", "nix", "tf", "hcl",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "ico", "webp", "heic", "avif",
    "mp3", "wav", "ogg", "flac", "aac", "mp4", "avi", "mov", "mkv", "wmv", "webm",
    "zip", "rar", "7z", "tar", "gz", "bz2", "xz", "zst",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp",
    "exe", "dll", "so", "dylib", "app", "msi", "deb", "rpm",
    "ttf", "otf", "woff", "woff2",
    "bin", "dat", "iso", "img", "pickle", "pkl", "pyc", "pyo", "pyd", "class", "jar", "war",
    "o", "obj", "a", "lib", "rlib", "rmeta", "wasm", "swf", "db", "sqlite", "sqlite3",
];

/// Bytes that may legitimately appear in text: BEL..CR, ESC and printable ASCII.
fn is_text_byte(byte: u8) -> bool {
    matches!(byte, 7..=13 | 27 | 0x20..=0x7e)
}

/// Share of non-text bytes above which a sample counts as binary.
const NON_TEXT_THRESHOLD: f64 = 0.15;

/// Classifies a path by its extension alone.
///
/// Returns `None` when the extension is unknown or missing and the content has
/// to be inspected.
pub fn extension_hint(path: &Path) -> Option<Classification> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if matches!(
        file_name,
        "Dockerfile" | "Makefile" | "Justfile" | "LICENSE" | "README" | "Gemfile" | "Rakefile"
    ) {
        return Some(Classification::Text);
    }

    let ext = path.extension().and_then(|e| e.to_str())?.to_lowercase();
    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return Some(Classification::Text);
    }
    if BINARY_EXTENSIONS.contains(&ext.as_str()) {
        return Some(Classification::Binary);
    }

    // Fall back to the MIME registry for extensions we do not list explicitly.
    let mime = mime_guess::from_ext(&ext).first()?;
    match mime.type_().as_str() {
        "image" | "audio" | "video" | "font" => Some(Classification::Binary),
        "text" => Some(Classification::Text),
        _ => None,
    }
}

/// Decides whether a sample of leading bytes looks binary.
pub fn looks_binary(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    if is_utf8_prefix(sample) {
        return false;
    }
    let mime = tree_magic_mini::from_u8(sample);
    if ["image/", "audio/", "video/", "font/"]
        .iter()
        .any(|prefix| mime.starts_with(prefix))
    {
        return true;
    }

    let non_text = sample.iter().filter(|b| !is_text_byte(**b)).count();
    non_text as f64 > sample.len() as f64 * NON_TEXT_THRESHOLD
}

/// `true` if `sample` is valid UTF-8, allowing a multi-byte sequence cut off at the end.
fn is_utf8_prefix(sample: &[u8]) -> bool {
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

/// Inspects up to `limit` leading bytes of a file.
pub fn sniff_file(path: &Path, limit: usize) -> std::io::Result<Classification> {
    let mut sample = Vec::with_capacity(limit);
    File::open(path)?
        .take(limit as u64)
        .read_to_end(&mut sample)?;

    if looks_binary(&sample) {
        tracing::debug!("Binary content detected in {}", path.display());
        Ok(Classification::Binary)
    } else {
        Ok(Classification::Text)
    }
}

/// Returns the fenced-block language hint for a path, or `""` when unknown.
pub fn language_hint(path: &Path) -> &'static str {
    match path.file_name().and_then(|n| n.to_str()) {
        Some("Dockerfile") => return "dockerfile",
        Some("Makefile") => return "makefile",
        _ => {}
    }

    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => return "",
    };
    match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "php" => "php",
        "rb" => "ruby",
        "sh" | "bash" | "zsh" => "bash",
        "ps1" => "powershell",
        "sql" => "sql",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" | "svg" => "xml",
        "lua" => "lua",
        "dockerfile" => "dockerfile",
        _ => "",
    }
}
