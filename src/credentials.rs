//! Credential file loader (spec §6): `username:password` lines, one bot
//! account per line. Grounded on `der_headend`'s `read_assets_file`
//! candidate-path-then-parse pattern (`der_headend/src/db.rs`), adapted from
//! YAML to the flat colon-delimited format this spec uses.

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Parse credential file contents: one `username:password` pair per line.
/// Blank lines and lines starting with `#` are skipped. Only the first
/// colon splits the line, so passwords may themselves contain `:`.
pub fn parse_credentials(contents: &str) -> Result<Vec<Credential>> {
    let mut out = Vec::new();
    for (lineno, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (username, password) = line
            .split_once(':')
            .with_context(|| format!("line {}: missing ':' separator", lineno + 1))?;
        if username.is_empty() {
            anyhow::bail!("line {}: empty username", lineno + 1);
        }
        out.push(Credential {
            username: username.to_string(),
            password: password.to_string(),
        });
    }
    Ok(out)
}

pub async fn load_credentials(path: &str) -> Result<Vec<Credential>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading credentials file at {path}"))?;
    parse_credentials(&contents)
}

/// One blacklisted username per line; blank lines and `#` comments are
/// skipped, same as `parse_credentials`. Missing file means an empty
/// blacklist rather than an error — most deployments never populate one.
pub async fn load_blacklist(path: &str) -> Result<std::collections::HashSet<String>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Default::default()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading blacklist file at {path}"));
        }
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
