use std::env;

/// Resolve this node's identity: explicit override, then the host name.
pub fn node_id_from_env() -> String {
    if let Ok(id) = env::var("PROSPECTOR_NODE_ID") {
        if !id.trim().is_empty() {
            return normalize(&id);
        }
    }
    if let Ok(host) = env::var("HOSTNAME") {
        if !host.trim().is_empty() {
            return normalize(&host);
        }
    }
    match std::fs::read_to_string("/etc/hostname") {
        Ok(host) if !host.trim().is_empty() => normalize(&host),
        _ => "localhost".to_string(),
    }
}

/// Node ids are bare host names: no domain suffix, lowercase.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim().to_lowercase();
    let bare = trimmed
        .strip_suffix(".local")
        .or_else(|| trimmed.strip_suffix(".pi"))
        .unwrap_or(&trimmed);
    bare.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_local_suffixes() {
        assert_eq!(normalize("Octoprint.local\n"), "octoprint");
        assert_eq!(normalize("coder.pi"), "coder");
        assert_eq!(normalize("worker-1"), "worker-1");
    }
}
