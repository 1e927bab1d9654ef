use super::*;

#[test]
fn https_and_ssh_forms_normalize_equal() {
    let a = normalize_remote_url("https://github.com/Acme/Widgets.git");
    let b = normalize_remote_url("git@github.com:Acme/Widgets.git");
    assert_eq!(a, b);
}

#[test]
fn trailing_slash_is_stripped() {
    assert_eq!(normalize_remote_url("https://github.com/a/b/"), normalize_remote_url("https://github.com/a/b"));
}

#[test]
fn already_normalized_url_is_unchanged_besides_case() {
    assert_eq!(normalize_remote_url("HTTPS://GitHub.com/a/b"), "https://github.com/a/b");
}
