use std::path::{Component, Path, PathBuf};

const TEMP_SUFFIX: &str = ".temp";

/// Whether a remote name can become a local path segment at all. Names that
/// only need separators replaced pass; see [`segment_from_name`].
pub fn is_valid_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}

/// Single path segment for a remote name: separators and NUL become `_`, so
/// "2023/24 Taxes" stays one folder.
pub fn segment_from_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

/// Removes characters the local filesystem rejects from every normal
/// component of `path`. Root, prefix and `..` components are kept as is.
pub fn sanitize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(text) => {
                    let cleaned: String = text.chars().filter(|c| !is_invalid_char(*c)).collect();
                    if cleaned.is_empty() {
                        out.push("_");
                    } else {
                        out.push(cleaned);
                    }
                }
                None => out.push(part),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Sibling path the download is streamed into before the final rename.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    target.with_file_name(name)
}

fn is_invalid_char(c: char) -> bool {
    if c.is_ascii_control() {
        return true;
    }
    cfg!(windows) && matches!(c, '<' | '>' | '"' | '|' | '?' | '*')
}
