//! Remote command construction and execution results.
//!
//! Commands are built as structured argument lists, never by string
//! concatenation. Rendering to shell text, including quoting and the merge
//! of the fixed base environment, happens in exactly one place so every
//! phase gets the same treatment.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A command destined for the remote sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommand {
    /// Program and arguments, quoted individually at render time
    argv: Vec<String>,

    /// Remote working directory (entered before the command runs)
    cwd: Option<String>,

    /// Environment overrides, merged over the bridge's base environment
    env: BTreeMap<String, String>,
}

impl RemoteCommand {
    /// Start a command from a program name
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Build a command from a full argument vector
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Append multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the remote working directory
    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set one environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment overrides
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// The argument vector as declared
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Environment overrides as declared
    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Render the command to POSIX shell text.
    ///
    /// The base environment is merged under this command's overrides:
    /// on a key collision, the override wins.
    pub fn render(&self, base_env: &BTreeMap<String, String>) -> String {
        let mut merged = base_env.clone();
        merged.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut script = String::new();
        for (key, value) in &merged {
            script.push_str("export ");
            script.push_str(key);
            script.push('=');
            script.push_str(&shell_quote(value));
            script.push_str("; ");
        }

        if let Some(ref dir) = self.cwd {
            script.push_str("cd ");
            script.push_str(&shell_quote(dir));
            script.push_str(" && ");
        }

        let words: Vec<String> = self.argv.iter().map(|w| shell_quote(w)).collect();
        script.push_str(&words.join(" "));
        script
    }
}

/// Quote a single word for a POSIX shell.
///
/// Plain words pass through untouched; everything else is single-quoted,
/// with embedded single quotes escaped the `'\''` way.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));

    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// The captured result of one remote invocation.
///
/// Immutable once produced; nothing in the crate mutates a result after
/// the bridge hands it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code reported by the remote shell
    pub exit_code: i32,

    /// Captured standard output (exit marker stripped)
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Wall-clock duration of the round trip
    pub duration: Duration,
}

impl ExecutionResult {
    /// Whether the remote command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
