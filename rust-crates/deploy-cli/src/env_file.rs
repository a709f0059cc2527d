//! `.env` handling for the deploy flow.
//!
//! Edition 2024 makes `std::env::set_var` unsafe, so the effective
//! environment lives in a [`DeployEnv`] map and is handed to child processes
//! explicitly.

use anyhow::{
    Context,
    Result,
};
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::Path,
};

pub const ENV_FILE: &str = ".env";
pub const ENV_LOCAL_FILE: &str = ".env.local";
pub const SEED_PHRASE: &str = "SEED_PHRASE";

/// Keys copied out of `.env.local` when the operator agrees to merge it.
pub const LOCAL_MERGE_KEYS: [&str; 9] = [
    SEED_PHRASE,
    "NEXT_PUBLIC_MINI_APP_NAME",
    "NEXT_PUBLIC_MINI_APP_DESCRIPTION",
    "NEXT_PUBLIC_MINI_APP_PRIMARY_CATEGORY",
    "NEXT_PUBLIC_MINI_APP_TAGS",
    "NEXT_PUBLIC_MINI_APP_BUTTON_TEXT",
    "NEXT_PUBLIC_ANALYTICS_ENABLED",
    "NEYNAR_API_KEY",
    "NEYNAR_CLIENT_ID",
];

#[derive(Clone, Debug, Default)]
pub struct DeployEnv {
    vars: BTreeMap<String, String>,
}

impl DeployEnv {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    #[cfg(test)]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Loads a dotenv file without overriding keys that are already set.
    /// A missing file is not an error.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let mut loaded = 0;
        for (key, value) in parse_file(path)? {
            if self.get(&key).is_none() {
                self.vars.insert(key, value);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn next_public(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .filter(|(k, v)| k.starts_with("NEXT_PUBLIC_") && !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub fn parse_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let mut vars = BTreeMap::new();
    for item in dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to open {}", path.display()))?
    {
        let (key, value) =
            item.with_context(|| format!("failed to parse {}", path.display()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// True when some line of `content` assigns `key`.
pub fn declares(content: &str, key: &str) -> bool {
    let prefix = format!("{key}=");
    content.lines().any(|line| {
        let line = line.trim_start();
        let line = line.strip_prefix("export ").unwrap_or(line);
        line.starts_with(&prefix)
    })
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Appends `KEY="value"` on its own line, creating the file if needed.
pub fn append_var(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = fs::read_to_string(path).unwrap_or_default();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let separator = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    writeln!(file, "{separator}{key}={}", quote(value))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Copies the allowed `.env.local` keys into `env`, overriding earlier
/// values, and appends the ones `.env` lacks to `.env`. `SEED_PHRASE` is
/// never written to `.env`. Returns the keys appended.
pub fn merge_local(env: &mut DeployEnv, local: &Path, dotenv: &Path) -> Result<Vec<String>> {
    let local_vars = parse_file(local)?;
    let mut dotenv_content = fs::read_to_string(dotenv).unwrap_or_default();
    let mut appended = Vec::new();
    for key in LOCAL_MERGE_KEYS {
        let Some(value) = local_vars.get(key) else {
            continue;
        };
        env.set(key, value.clone());
        if key == SEED_PHRASE || declares(&dotenv_content, key) {
            continue;
        }
        append_var(dotenv, key, value)?;
        dotenv_content.push_str(&format!("\n{key}="));
        appended.push(key.to_owned());
    }
    Ok(appended)
}
