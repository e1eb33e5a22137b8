//! Index naming and file web address helpers

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static VSTS_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<host>https?://[^/]+/)(?P<project>[^/]+/)?(_[^/]+/)+(?P<repo>[^/?#]+)")
        .expect("static regex")
});

static AZURE_DEVOPS_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<host>https?://[^/]+/[^/]+/)(?P<project>[^/]+/)?(_[^/]+/)+(?P<repo>[^/?#]+)")
        .expect("static regex")
});

static GITHUB_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<host>https?://[^/]+/)(?P<owner>[^/]+/)(?P<project>[^/]+)/?")
        .expect("static regex")
});

/// Characters replaced by `_` in repository names used as index names
const UNSAFE_NAME_CHARS: &[char] = &[
    '#', '.', ',', ' ', '\\', '/', '+', '*', '?', '"', '<', '>', '|', ':',
];

/// Repository name with index-unsafe characters replaced
#[must_use]
pub fn safe_repo_name(repo_name: &str) -> String {
    let replaced: String = repo_name
        .chars()
        .map(|c| if UNSAFE_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    replaced.trim_start_matches('_').to_string()
}

/// Lower-cased [`safe_repo_name`]
#[must_use]
pub fn safe_index_name(repo_name: &str) -> String {
    safe_repo_name(&repo_name.to_lowercase())
}

/// Timestamped target index name: `{safe name}.{yyMMdd.HHmmss}`
#[must_use]
pub fn target_index_name(repo_name: &str, now: DateTime<Utc>) -> String {
    format!("{}.{}", safe_index_name(repo_name), now.format("%y%m%d.%H%M%S"))
}

/// Build the browsable address of a file from the repository's source
/// control address
///
/// Understands VSTS, Azure DevOps and GitHub address shapes; anything else is
/// treated as a plain prefix.
#[must_use]
pub fn file_web_address(source_control_address: &str, repo_relative_path: &str) -> String {
    let mut address = source_control_address.trim().to_string();
    let lower = address.to_lowercase();

    if lower.contains(".visualstudio.com") {
        if !lower.contains("?path=") && !lower.contains("#path=") {
            address = VSTS_ADDRESS
                .replace(&address, "${host}${project}_git/${repo}?path=")
                .into_owned();
        }
    } else if lower.contains("dev.azure.com") {
        if !lower.contains("?path=") && !lower.contains("#path=") {
            address = AZURE_DEVOPS_ADDRESS
                .replace(&address, "${host}${project}_git/${repo}?path=")
                .into_owned();
        }
    } else if lower.contains("github.com") {
        address = trim_end_ignore_case(&address, "/").to_string();
        address = trim_end_ignore_case(&address, ".git").to_string();
        let lower = address.to_lowercase();
        if !lower.contains("/blob/") && !lower.contains("/tree/") {
            address = GITHUB_ADDRESS
                .replace(&address, "${host}${owner}${project}/blob/master/")
                .into_owned();
        }
    }

    if !address.ends_with('/') && !address.ends_with('=') {
        address.push('/');
    }
    format!("{address}{repo_relative_path}").replace('\\', "/")
}

fn trim_end_ignore_case<'a>(value: &'a str, suffix: &str) -> &'a str {
    if value.len() >= suffix.len()
        && value.is_char_boundary(value.len() - suffix.len())
        && value[value.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    {
        &value[..value.len() - suffix.len()]
    } else {
        value
    }
}
