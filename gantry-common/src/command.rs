//! Command lines and shell scripts.
//!
//! [`Command`] is an argv-style token list, rendered either as a single
//! shell-quoted line or as an argv vector for direct spawning.
//! [`ShellScript`] is opaque shell text that composes with `;`, `&&` and
//! `||`. An empty script is absorbed by every composition operator.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;

/// Environment variables passed to a guest. Ordered so rendered exports are
/// deterministic.
pub type EnvMap = BTreeMap<String, String>;

/// Quote a single token for POSIX shells.
///
/// NUL bytes cannot be represented in a shell word; they are dropped.
pub fn quote(token: &str) -> String {
    match shlex::try_quote(token) {
        Ok(quoted) => quoted.into_owned(),
        Err(_) => {
            let cleaned = token.replace('\0', "");
            shlex::try_quote(&cleaned)
                .map(|quoted| quoted.into_owned())
                .unwrap_or(cleaned)
        }
    }
}

/// An argv-style command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Command(Vec<String>);

impl Command {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }

    pub fn push(&mut self, arg: impl Into<String>) {
        self.0.push(arg.into());
    }

    /// Append a token, returning the extended command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.push(arg);
        self
    }

    /// Append several tokens, returning the extended command.
    pub fn args_from<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render as one shell line, every token quoted individually.
    pub fn to_script(&self) -> String {
        self.0
            .iter()
            .map(|token| quote(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render as an argv vector for direct process spawning.
    pub fn to_popen(&self) -> Vec<String> {
        self.0.clone()
    }

    pub fn to_shell_script(&self) -> ShellScript {
        ShellScript::new(self.to_script())
    }
}

impl Add for Command {
    type Output = Command;

    fn add(mut self, rhs: Command) -> Command {
        self.0.extend(rhs.0);
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_script())
    }
}

/// Free-form shell text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShellScript(String);

impl ShellScript {
    pub fn new(script: impl Into<String>) -> Self {
        Self(script.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Join scripts with `; `, skipping empty ones.
    pub fn from_scripts<I>(scripts: I) -> Self
    where
        I: IntoIterator<Item = ShellScript>,
    {
        Self::join(scripts, "; ")
    }

    /// Join scripts one per line, skipping empty ones.
    pub fn from_lines<I>(scripts: I) -> Self
    where
        I: IntoIterator<Item = ShellScript>,
    {
        Self::join(scripts, "\n")
    }

    fn join<I>(scripts: I, separator: &str) -> Self
    where
        I: IntoIterator<Item = ShellScript>,
    {
        let parts: Vec<String> = scripts
            .into_iter()
            .filter(|script| !script.is_empty())
            .map(ShellScript::into_string)
            .collect();
        Self(parts.join(separator))
    }

    /// `self; other`
    pub fn then(self, other: ShellScript) -> Self {
        self.compose(other, "; ")
    }

    /// `self && other`
    pub fn and(self, other: ShellScript) -> Self {
        self.compose(other, " && ")
    }

    /// `self || other`
    pub fn or(self, other: ShellScript) -> Self {
        self.compose(other, " || ")
    }

    fn compose(self, other: ShellScript, operator: &str) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        Self(format!("{}{}{}", self.0, operator, other.0))
    }

    /// Wrap the script for `<shell> -c <script>` style invocation.
    pub fn to_command(&self, shell: &str) -> Command {
        Command::new([shell, "-c", self.0.as_str()])
    }
}

impl From<&str> for ShellScript {
    fn from(script: &str) -> Self {
        Self::new(script)
    }
}

impl From<String> for ShellScript {
    fn from(script: String) -> Self {
        Self(script)
    }
}

impl From<Command> for ShellScript {
    fn from(command: Command) -> Self {
        command.to_shell_script()
    }
}

impl fmt::Display for ShellScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_to_script_quotes_each_token() {
        let command = Command::new(["echo", "hello world", "it's", "$HOME"]);
        let script = command.to_script();
        assert!(script.starts_with("echo "));
        assert_eq!(
            shlex::split(&script).unwrap(),
            vec!["echo", "hello world", "it's", "$HOME"]
        );
    }

    #[test]
    fn test_command_to_popen_keeps_raw_tokens() {
        let command = Command::new(["ls", "-l", "/tmp dir"]);
        assert_eq!(command.to_popen(), vec!["ls", "-l", "/tmp dir"]);
    }

    #[test]
    fn test_command_add_concatenates() {
        let command = Command::new(["sudo"]) + Command::new(["dnf", "install"]);
        assert_eq!(command.args(), ["sudo", "dnf", "install"]);
    }

    #[test]
    fn test_empty_script_is_absorbed() {
        let script = ShellScript::new("true");
        assert_eq!(script.clone().and(ShellScript::default()), script);
        assert_eq!(ShellScript::default().or(script.clone()), script);
        assert_eq!(ShellScript::default().then(script.clone()), script);
    }

    #[test]
    fn test_script_composition_operators() {
        let a = ShellScript::new("a");
        let b = ShellScript::new("b");
        assert_eq!(a.clone().and(b.clone()).as_str(), "a && b");
        assert_eq!(a.clone().or(b.clone()).as_str(), "a || b");
        assert_eq!(a.then(b).as_str(), "a; b");
    }

    #[test]
    fn test_from_scripts_skips_empty() {
        let script = ShellScript::from_scripts([
            ShellScript::default(),
            ShellScript::new("cd /tmp"),
            ShellScript::new("pwd"),
        ]);
        assert_eq!(script.as_str(), "cd /tmp; pwd");
    }

    #[test]
    fn test_quote_drops_nul_bytes() {
        assert_eq!(quote("a\0b"), "ab");
        assert_eq!(quote(""), "''");
    }
}
