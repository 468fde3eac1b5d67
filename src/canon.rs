//! Path canonicalization.
//!
//! Paths are plain strings with `/` separators.  A trailing `/` marks a
//! directory, which is how the graph tells directory outputs apart from file
//! outputs without touching the disk.

/// Length of the root prefix of a path: "/" or a drive like "C:/".
fn root_len(path: &str) -> usize {
    let b = path.as_bytes();
    if b.first() == Some(&b'/') {
        1
    } else if b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && b[2] == b'/' {
        3
    } else {
        0
    }
}

pub fn is_absolute(path: &str) -> bool {
    root_len(&path.replace('\\', "/")) > 0
}

pub fn is_directory(path: &str) -> bool {
    path.ends_with('/')
}

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar".  ".." above the root of an absolute path is
/// dropped; leading ".." of a relative path is kept.
pub fn canon_path<T: Into<String>>(inpath: T) -> String {
    let mut path: String = inpath.into();
    if path.contains('\\') {
        path = path.replace('\\', "/");
    }
    let root = root_len(&path);

    let mut components: Vec<&str> = Vec::new();
    let mut trailing_slash = false;
    for component in path[root..].split('/') {
        match component {
            "" | "." => trailing_slash = true,
            ".." => {
                match components.last() {
                    Some(&last) if last != ".." => {
                        components.pop();
                    }
                    _ if root > 0 => {}
                    _ => components.push(".."),
                }
                trailing_slash = true;
            }
            _ => {
                components.push(component);
                trailing_slash = false;
            }
        }
    }

    let mut out = String::with_capacity(path.len());
    out.push_str(&path[..root]);
    out.push_str(&components.join("/"));
    if trailing_slash && !components.is_empty() {
        out.push('/');
    }
    out
}

/// Canonicalize and force the directory form (trailing slash).
pub fn canon_directory<T: Into<String>>(inpath: T) -> String {
    let mut path = canon_path(inpath);
    if !path.is_empty() && !is_directory(&path) {
        path.push('/');
    }
    path
}

/// Resolve `path` against `working_directory` (a canonical absolute
/// directory) unless it is already absolute.
pub fn resolve(path: &str, working_directory: &str) -> String {
    if is_absolute(path) {
        canon_path(path)
    } else {
        let mut joined = String::with_capacity(working_directory.len() + path.len() + 1);
        joined.push_str(working_directory);
        if !is_directory(working_directory) {
            joined.push('/');
        }
        joined.push_str(path);
        canon_path(joined)
    }
}

/// The directory containing a canonical absolute path, in directory form.
/// Returns None once the root is reached.
pub fn parent_directory(path: &str) -> Option<&str> {
    let root = root_len(path);
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.len() < root {
        return None;
    }
    let slash = trimmed.rfind('/')?;
    if slash + 1 < root {
        return None;
    }
    Some(&path[..=slash])
}

/// Whether `path` is `directory` or lies beneath it.  Both must be canonical;
/// `directory` in directory form.  A file spelled like the directory without
/// its trailing slash is not within it.
pub fn is_within(path: &str, directory: &str) -> bool {
    path.starts_with(directory)
}
