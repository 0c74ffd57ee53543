//! Stateless matchers behind rule specifiers.
//!
//! Three shapes exist: shell commands (`bash(npm run *)`), file paths
//! (`write(src/**)`) and network domains (`webfetch(domain:github.com)`).

use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use regex::Regex;

/// Compile a command glob. `*` matches any run of characters (spaces
/// included); everything else is literal, whitespace too, so `ls *` and
/// `ls*` are different rules.
pub fn bash_glob_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?s)^{}$", body)).ok()
}

pub fn bash_glob_matches(pattern: &str, command: &str) -> bool {
    bash_glob_regex(pattern).is_some_and(|re| re.is_match(command.trim()))
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Gitignore-style path match.
///
/// Pattern anchors:
/// - `//etc/**`: filesystem absolute
/// - `~/.ssh/*`: relative to `home`
/// - `/src/**`: relative to `cwd`
/// - `src/*.rs` or `*.env`: relative to `cwd`; a pattern with no inner slash
///   matches at any depth
///
/// A trailing `/` restricts the pattern to directory contents, and any
/// pattern also covers everything below a directory it names. The target
/// is tried in absolute form and, when inside `cwd`, in cwd-relative form.
pub fn path_matches(pattern: &str, path: &str, cwd: &Path, home: &Path) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    let absolute = normalize(&cwd.join(expand_home(path, home)));
    let relative = absolute
        .strip_prefix(normalize(cwd))
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty());
    let absolute = absolute.to_string_lossy().into_owned();

    let (glob, anchored) = if let Some(rest) = pattern.strip_prefix("//") {
        (format!("/{}", rest), true)
    } else if let Some(rest) = pattern.strip_prefix("~/") {
        (join_escaped(home, rest), true)
    } else if let Some(rest) = pattern.strip_prefix('/') {
        (join_escaped(cwd, rest), true)
    } else {
        (pattern.to_string(), false)
    };

    let mut candidates: Vec<String> = Vec::new();
    let (base, dir_only) = match glob.strip_suffix('/') {
        Some(stripped) => (stripped.to_string(), true),
        None => (glob, false),
    };
    let floating = !anchored && !base.contains('/');
    let base = if floating { format!("**/{}", base) } else { base };
    if !dir_only {
        candidates.push(base.clone());
    }
    candidates.push(format!("{}/**", base));

    candidates.iter().any(|candidate| {
        let Ok(compiled) = Pattern::new(candidate) else {
            return false;
        };
        compiled.matches_with(&absolute, GLOB_OPTIONS)
            || (!anchored
                && relative
                    .as_deref()
                    .is_some_and(|rel| compiled.matches_with(rel, GLOB_OPTIONS)))
    })
}

/// Match a URL's host (or a bare host) against a domain pattern.
///
/// `github.com` matches itself and any subdomain; `*.github.com` matches
/// subdomains only. A leading `domain:` is accepted and ignored.
pub fn domain_matches(pattern: &str, url_or_host: &str) -> bool {
    let pattern = pattern.trim();
    let pattern = pattern.strip_prefix("domain:").unwrap_or(pattern).to_ascii_lowercase();
    let Some(host) = host_of(url_or_host) else {
        return false;
    };
    if pattern.is_empty() {
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host.ends_with(&format!(".{}", suffix));
    }
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

fn host_of(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = if let Some(v6) = authority.strip_prefix('[') {
        v6.split(']').next()?
    } else {
        authority.split(':').next()?
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

fn expand_home(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if path == "~" => home.to_path_buf(),
        None => PathBuf::from(path),
    }
}

fn join_escaped(base: &Path, rest: &str) -> String {
    let base = Pattern::escape(&normalize(base).to_string_lossy());
    let base = base.trim_end_matches('/');
    format!("{}/{}", base, rest)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
