//! Flat `KEY=value` file parsing and rendering

use std::collections::HashMap;

use crate::errors::OrchestratorError;
use crate::filesys::file::File;

/// Ordered key/value map backed by a `KEY=value` file.
///
/// Duplicate keys resolve last-value-wins; keys keep the position of their
/// first appearance when rendered back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    keys: Vec<String>,
    values: HashMap<String, String>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse file contents
    pub fn parse(contents: &str) -> Self {
        let mut env = EnvFile::new();
        for raw in contents.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            env.set(key, unquote(value.trim()));
        }
        env
    }

    /// Load from a file. A missing file yields an empty map.
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        if !file.exists().await {
            return Ok(EnvFile::new());
        }
        Ok(Self::parse(&file.read_string().await?))
    }

    /// Persist atomically
    pub async fn save(&self, file: &File) -> Result<(), OrchestratorError> {
        file.write_atomic(self.render().as_bytes()).await
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// Value for `key`, treating an empty value as absent
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.keys.push(key.clone());
        }
        self.values.insert(key, value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.keys.retain(|k| k != key);
        }
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate entries in first-appearance order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v.as_str())))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Render as file contents
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.iter() {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(value));
            out.push('\n');
        }
        out
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || c == '#' || c == '"' || c == '\'');
    if needs_quotes && !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}
