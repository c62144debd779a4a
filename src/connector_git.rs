//! Repository acquisition and candidate file discovery.
//!
//! A [`RepositorySource`] turns a repository reference into a
//! [`RepositorySnapshot`], a working copy that lives only as long as the
//! snapshot value. [`GitCliSource`] shells out to `git clone` into a
//! temporary directory that is removed when the snapshot drops, whether the
//! ingestion run succeeded or not. [`LocalDirSource`] snapshots a directory
//! that already exists on disk.
//!
//! Access tokens are embedded in the clone URL as `scheme://token@host/...`.
//! Anything reported back (errors, the run record, logs) goes through
//! [`redact_url`] first.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Always excluded from discovery, on top of configured excludes.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/__pycache__/**", "**/*.pyc"];

/// A working copy of a repository at one branch.
pub struct RepositorySnapshot {
    root: PathBuf,
    head: Option<String>,
    // Held for its Drop; removes the clone.
    _workdir: Option<TempDir>,
}

impl RepositorySnapshot {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Commit the snapshot was taken at, when known.
    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }
}

#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn acquire(
        &self,
        url: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<RepositorySnapshot>;
}

/// Clones with the `git` command line client.
#[derive(Debug, Clone, Default)]
pub struct GitCliSource;

#[async_trait]
impl RepositorySource for GitCliSource {
    async fn acquire(
        &self,
        url: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<RepositorySnapshot> {
        let clone_url = authenticated_url(url, token);
        let branch = branch.to_string();
        let token = token.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let workdir = tempfile::Builder::new()
                .prefix("tsg-clone-")
                .tempdir()
                .with_context(|| "Failed to create temporary clone directory")?;
            let dest = workdir.path().join("repo");

            git_clone(&clone_url, &branch, &dest, token.as_deref())?;
            let head = git_head_sha(&dest).ok();

            Ok(RepositorySnapshot {
                root: dest,
                head,
                _workdir: Some(workdir),
            })
        })
        .await?
    }
}

fn git_clone(url: &str, branch: &str, dest: &Path, token: Option<&str>) -> Result<()> {
    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--branch", branch, "--single-branch"])
        .arg(url)
        .arg(dest)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git clone of {} ({}) failed: {}",
            redact_url(url),
            branch,
            redact_secret(stderr.trim(), token)
        );
    }

    Ok(())
}

fn git_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to get HEAD SHA")?;

    if !output.status.success() {
        bail!("git rev-parse HEAD failed");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Treats the repository reference as a directory on this machine.
///
/// `file://` prefixes are accepted. The directory is used in place and
/// never removed.
#[derive(Debug, Clone, Default)]
pub struct LocalDirSource;

#[async_trait]
impl RepositorySource for LocalDirSource {
    async fn acquire(
        &self,
        url: &str,
        _branch: &str,
        _token: Option<&str>,
    ) -> Result<RepositorySnapshot> {
        let root = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        if !root.is_dir() {
            bail!("repository directory does not exist: {}", root.display());
        }
        Ok(RepositorySnapshot {
            root,
            head: None,
            _workdir: None,
        })
    }
}

// ============ URLs and credentials ============

/// Whether cloning `url` needs an access token: remote http(s) URLs that
/// carry no credentials of their own.
pub fn requires_token(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, rest)) if scheme == "http" || scheme == "https" => {
            let authority = rest.split('/').next().unwrap_or("");
            !authority.contains('@')
        }
        _ => false,
    }
}

/// Embed `token` as `scheme://token@host/...`. URLs without a scheme, or
/// that already carry credentials, are returned unchanged.
pub fn authenticated_url(url: &str, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return url.to_string();
    };
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let authority = rest.split('/').next().unwrap_or("");
            if authority.contains('@') {
                url.to_string()
            } else {
                format!("{}://{}@{}", scheme, token, rest)
            }
        }
        None => url.to_string(),
    }
}

/// Replace the user-info part of every `scheme://user@host` in `text` with `***`.
pub fn redact_url(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("://") {
        let (head, tail) = rest.split_at(pos + 3);
        out.push_str(head);
        let authority_end = tail
            .find(|c: char| c == '/' || c.is_whitespace())
            .unwrap_or(tail.len());
        match tail[..authority_end].rfind('@') {
            Some(at) => {
                out.push_str("***");
                rest = &tail[at..];
            }
            None => rest = tail,
        }
    }
    out.push_str(rest);
    out
}

fn redact_secret(text: &str, token: Option<&str>) -> String {
    let redacted = redact_url(text);
    match token.filter(|t| !t.is_empty()) {
        Some(t) => redacted.replace(t, "***"),
        None => redacted,
    }
}

// ============ Discovery ============

/// Files under `root` matching `include` and none of `exclude`, as paths
/// relative to `root`, sorted.
pub fn discover_files(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(include)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) {
            continue;
        }
        if !include_set.is_match(rel_str.as_ref()) {
            continue;
        }

        files.push(relative.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
