//! Execution of external programs, locally or on a remote host over ssh

use crate::controller::error::{AdapterError, AdapterResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Remote host reached through the system `ssh` client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub hostname: String,
    pub port: u16,
    pub ssh_key: Option<PathBuf>,
}

/// Runs external programs with an explicit per-call deadline
#[derive(Debug, Clone)]
pub struct CommandRunner {
    use_sudo: bool,
    remote: Option<RemoteHost>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn local(use_sudo: bool, timeout: Duration) -> Self {
        Self {
            use_sudo,
            remote: None,
            timeout,
        }
    }

    pub fn remote(host: RemoteHost, use_sudo: bool, timeout: Duration) -> Self {
        Self {
            use_sudo,
            remote: Some(host),
            timeout,
        }
    }

    /// Full argument vector for running `program args` with sudo/ssh applied
    fn argv(&self, program: &str, args: &[&str]) -> Vec<String> {
        let mut command = Vec::with_capacity(args.len() + 2);
        if self.use_sudo {
            command.push("sudo".to_string());
        }
        command.push(program.to_string());
        command.extend(args.iter().map(|a| a.to_string()));

        let Some(remote) = &self.remote else {
            return command;
        };

        let mut argv = vec![
            "ssh".to_string(),
            "-p".to_string(),
            remote.port.to_string(),
        ];
        if let Some(key) = &remote.ssh_key {
            argv.push("-i".to_string());
            argv.push(key.display().to_string());
        }
        argv.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            remote.hostname.clone(),
            "--".to_string(),
        ]);
        argv.push(
            command
                .iter()
                .map(|a| shell_quote(a))
                .collect::<Vec<_>>()
                .join(" "),
        );
        argv
    }

    /// Run a program and return its stdout; a non-zero exit is an error.
    pub async fn run(&self, program: &str, args: &[&str]) -> AdapterResult<String> {
        self.run_inner(program, args, false).await
    }

    /// Like [`run`](Self::run), but arguments (which carry secrets) never reach
    /// the log or the returned error.
    pub async fn run_sensitive(&self, program: &str, args: &[&str]) -> AdapterResult<String> {
        self.run_inner(program, args, true).await
    }

    async fn run_inner(&self, program: &str, args: &[&str], sensitive: bool) -> AdapterResult<String> {
        let argv = self.argv(program, args);
        let shown = if sensitive {
            format!("{} <redacted>", program)
        } else {
            argv.join(" ")
        };
        tracing::debug!(command = %shown, "Running command");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(AdapterError::Timeout {
                    command: shown,
                    seconds: self.timeout.as_secs(),
                })
            }
            Ok(Err(source)) => {
                return Err(AdapterError::Spawn {
                    command: shown,
                    source,
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AdapterError::Failed {
                command: shown,
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Quote one argument for a POSIX shell
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_./:=@%+,-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_argv() {
        let runner = CommandRunner::local(false, Duration::from_secs(1));
        assert_eq!(
            runner.argv("ip", &["link", "set", "eth0", "up"]),
            vec!["ip", "link", "set", "eth0", "up"]
        );

        let runner = CommandRunner::local(true, Duration::from_secs(1));
        assert_eq!(runner.argv("nmcli", &["device"]), vec!["sudo", "nmcli", "device"]);
    }

    #[test]
    fn test_remote_argv_quotes_command() {
        let host = RemoteHost {
            hostname: "gateway.local".to_string(),
            port: 2222,
            ssh_key: Some(PathBuf::from("/etc/keys/id_ed25519")),
        };
        let runner = CommandRunner::remote(host, false, Duration::from_secs(1));
        let argv = runner.argv("nmcli", &["connection", "modify", "My Net", "wifi-sec.psk", "it's"]);

        assert_eq!(&argv[..4], &["ssh", "-p", "2222", "-i"]);
        assert_eq!(argv[argv.len() - 2], "--");
        assert_eq!(
            argv.last().unwrap(),
            r#"nmcli connection modify 'My Net' wifi-sec.psk 'it'\''s'"#
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("eth0"), "eth0");
        assert_eq!(shell_quote("10.0.0.1/24"), "10.0.0.1/24");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let runner = CommandRunner::local(false, Duration::from_secs(5));
        let err = runner.run("false", &[]).await.unwrap_err();
        assert!(matches!(err, AdapterError::Failed { .. }));

        let out = runner.run("echo", &["hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failure_names_command_and_hides_secrets() {
        let runner = CommandRunner::local(false, Duration::from_secs(5));

        let err = runner.run("false", &["wlan0"]).await.unwrap_err();
        match err {
            AdapterError::Failed { command, status, .. } => {
                assert_eq!(command, "false wlan0");
                assert_eq!(status, 1);
            }
            other => panic!("unexpected error: {}", other),
        }

        let err = runner.run_sensitive("false", &["s3cret"]).await.unwrap_err();
        assert!(!err.to_string().contains("s3cret"));
        assert!(err.to_string().contains("false <redacted>"));
    }
}
