//! Configuration for processes spawned on a PTY

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pty::PtyResult;

/// What to run on the secondary side of a PTY
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Program to execute, looked up on `PATH` if it has no slash
    pub program: String,
    /// Arguments, not including the program name
    pub args: Vec<String>,
    /// Extra environment variables; these win over inherited ones
    pub env: BTreeMap<String, String>,
    /// Whether the child starts from a copy of this process's environment
    pub inherit_env: bool,
    /// Value for `TERM`, if it should be set
    pub term: Option<String>,
    /// Working directory for the child
    pub cwd: Option<PathBuf>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            program: default_shell(),
            args: Vec::new(),
            env: BTreeMap::new(),
            inherit_env: true,
            term: Some("xterm-256color".to_string()),
            cwd: None,
        }
    }
}

impl SpawnConfig {
    /// Run `program` with otherwise default settings
    pub fn new(program: impl Into<String>) -> Self {
        Self::default().with_program(program)
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> PtyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> PtyResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), program = %config.program, "loaded spawn config");
        Ok(config)
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// The full environment the child should see, as `KEY=VALUE` pairs
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut vars: BTreeMap<String, String> = if self.inherit_env {
            std::env::vars().collect()
        } else {
            BTreeMap::new()
        };
        if let Some(term) = &self.term {
            vars.insert("TERM".to_string(), term.clone());
        }
        vars.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars.into_iter().collect()
    }
}

/// The user's shell, falling back to `/bin/sh`
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
