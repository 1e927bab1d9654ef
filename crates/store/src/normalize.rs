// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote-URL normalization for the `(scope, normalizedRemoteUrl)`
//! uniqueness invariant: lower-cases the scheme/host, strips a
//! trailing `.git` and trailing slashes, so `git@github.com:a/b.git`,
//! `https://github.com/a/b`, and `https://github.com/a/b.git/` all
//! normalize to the same key.

pub fn normalize_remote_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let scp_like = scp_to_url(trimmed);
    let candidate = scp_like.as_deref().unwrap_or(trimmed);

    let mut normalized = candidate.to_lowercase();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if let Some(stripped) = normalized.strip_suffix(".git") {
        normalized = stripped.to_string();
    }
    normalized
}

/// `git@host:owner/repo` -> `ssh://host/owner/repo`, the shape git's own
/// `scp`-like syntax uses for SSH remotes.
fn scp_to_url(raw: &str) -> Option<String> {
    if raw.contains("://") {
        return None;
    }
    let (user_host, path) = raw.split_once(':')?;
    let (_user, host) = user_host.split_once('@')?;
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some(format!("ssh://{host}/{path}"))
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;
