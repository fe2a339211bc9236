//! ssh command line construction.

use std::fmt;

use fleetroll_core::SshConfig;

/// A fully rendered remote invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Host the command runs on.
    pub host: String,
    /// Command executed by the remote shell.
    pub command: String,
    line: String,
}

impl RemoteCommand {
    /// The local shell line, e.g. `ssh -i key -l deploy 10.0.0.1 'sudo shutdown -h now'`.
    pub fn line(&self) -> &str {
        &self.line
    }
}

#[cfg(test)]
impl RemoteCommand {
    /// A command whose local line is run as-is.
    pub(crate) fn raw(line: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            command: line.to_string(),
            line: line.to_string(),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Renders `ssh [-i identity] [options] -l <user> <host> <command>`.
///
/// `-l` is left out when no user is configured, in which case ssh uses the
/// local login name.
#[derive(Debug, Clone)]
pub struct SshCommandBuilder<'a> {
    config: &'a SshConfig,
}

impl<'a> SshCommandBuilder<'a> {
    pub fn new(config: &'a SshConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, host: &str, command: &str) -> RemoteCommand {
        let mut parts = vec!["ssh".to_string()];
        if let Some(identity) = &self.config.identity_file {
            parts.push("-i".to_string());
            parts.push(shell_quote(&identity.to_string_lossy()));
        }
        if let Some(options) = self.config.options.as_deref().map(str::trim) {
            if !options.is_empty() {
                parts.push(options.to_string());
            }
        }
        if let Some(user) = &self.config.user {
            parts.push("-l".to_string());
            parts.push(shell_quote(user));
        }
        parts.push(shell_quote(host));
        parts.push(shell_quote(command));

        RemoteCommand {
            host: host.to_string(),
            command: command.to_string(),
            line: parts.join(" "),
        }
    }
}

/// Single-quote `s` for a POSIX shell unless it is made of safe characters.
fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn full_command_shape() {
        let config = SshConfig {
            identity_file: Some(PathBuf::from("/home/ops/.ssh/fleet.pem")),
            user: Some("deploy".to_string()),
            options: Some("-o StrictHostKeyChecking=no -p 2222".to_string()),
            ..Default::default()
        };
        let cmd = SshCommandBuilder::new(&config).build("10.0.0.11", "sudo shutdown -h now");
        assert_eq!(
            cmd.line(),
            "ssh -i /home/ops/.ssh/fleet.pem -o StrictHostKeyChecking=no -p 2222 -l deploy 10.0.0.11 'sudo shutdown -h now'"
        );
        assert_eq!(cmd.host, "10.0.0.11");
        assert_eq!(cmd.command, "sudo shutdown -h now");
    }

    #[test]
    fn minimal_command_omits_unset_parts() {
        let config = SshConfig::default();
        let cmd = SshCommandBuilder::new(&config).build("i-0a1", "/bin/true");
        assert_eq!(cmd.line(), "ssh i-0a1 /bin/true");
    }

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("echo 'hi'"), r"'echo '\''hi'\'''");
        assert_eq!(shell_quote(""), "''");
    }
}
