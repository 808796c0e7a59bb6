/// Join a repository base URL and a chart download path.
///
/// A separating `/` is inserted only when the base does not already end
/// with one. Some repository indexes store fully qualified download URLs;
/// an absolute `http(s)://` path bypasses joining entirely.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_inserts_separator() {
        assert_eq!(
            join_url("https://charts.example.com", "charts/nginx-1.2.3.tgz"),
            "https://charts.example.com/charts/nginx-1.2.3.tgz"
        );
    }

    #[test]
    fn join_keeps_existing_separator() {
        assert_eq!(
            join_url("https://charts.example.com/", "charts/nginx-1.2.3.tgz"),
            "https://charts.example.com/charts/nginx-1.2.3.tgz"
        );
    }

    #[test]
    fn absolute_path_bypasses_base() {
        assert_eq!(
            join_url(
                "https://charts.example.com",
                "https://mirror.example.org/nginx-1.2.3.tgz"
            ),
            "https://mirror.example.org/nginx-1.2.3.tgz"
        );
    }
}
