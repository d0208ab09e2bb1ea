use anyhow::Result;

/// Split `remote:path` into its parts. Windows drive letters (`C:\...`) are
/// not remote specs.
pub fn parse_remote_and_path(input: &str) -> Result<(String, String)> {
    let bytes = input.as_bytes();
    // 盘符 C:\ 或 C:/ 不是远端 (drive letters are local paths)
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() && input.len() > 2 {
        let third = bytes[2];
        if third == b'\\' || third == b'/' {
            return Err(anyhow::anyhow!("looks like a local drive path: {}", input));
        }
    }
    if let Some((remote, rest)) = input.split_once(':') {
        let r = remote.trim();
        let p = rest.trim();
        if r.is_empty() {
            return Err(anyhow::anyhow!("remote name is empty"));
        }
        Ok((r.to_string(), p.to_string()))
    } else {
        Err(anyhow::anyhow!("missing ':' separator"))
    }
}

/// Job names double as folder names on the mirror. Reject the ones that would
/// escape the source root or the download directory.
pub fn validate_job_name(name: &str) -> Result<String> {
    let n = name.trim();
    if n.is_empty() {
        return Err(anyhow::anyhow!("job name is empty"));
    }
    if n == "." || n == ".." || n.contains('/') || n.contains('\\') {
        return Err(anyhow::anyhow!("job name must be a single folder name: {}", n));
    }
    Ok(n.to_string())
}

/// Join a mirror-relative root and a folder name with exactly one `/`.
pub fn join_remote_path(root: &str, name: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() { name.to_string() } else { format!("{}/{}", root, name) }
}
