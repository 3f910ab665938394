//! Command execution on the bot.
//!
//! A request is one of three forms:
//!
//! | `run`  | command          | action                                    |
//! |--------|------------------|-------------------------------------------|
//! | true   | anything         | Lua chunk, captured `print`/`io.write`    |
//! | false  | `cd` / `cd <dir>`| change this process's working directory   |
//! | false  | anything else    | shell command in a child, with a timeout  |
//!
//! Every failure comes back as [`NetError::Execution`]; none of them touch
//! the connection.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mlua::{Function, Lua, MultiValue, Table};
use tokio::process::Command;

use crate::constants::SHELL_TIMEOUT;
use crate::error::{NetError, NetResult};
use crate::message::Request;

/// Runs requests received from the host.
#[derive(Debug, Clone)]
pub struct Executor {
    shell_timeout: Duration,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(SHELL_TIMEOUT)
    }
}

impl Executor {
    /// Executor whose shell commands are killed after `shell_timeout`.
    pub fn new(shell_timeout: Duration) -> Self {
        Self { shell_timeout }
    }

    /// Shell command time limit.
    pub fn shell_timeout(&self) -> Duration {
        self.shell_timeout
    }

    /// Execute one request and return the text to send back.
    pub async fn execute(&self, request: &Request) -> NetResult<String> {
        if request.run {
            let code = request.request.clone();
            tokio::task::spawn_blocking(move || run_lua(&code))
                .await
                .map_err(|e| NetError::Execution(format!("script task failed: {e}")))?
        } else if let Some(target) = directory_target(&request.request) {
            change_directory(target)
        } else {
            run_shell(&request.request, self.shell_timeout).await
        }
    }
}

/// Run a Lua chunk and return everything it printed.
///
/// Each call gets a fresh interpreter. `print` joins its arguments with
/// tabs and ends the line; `io.write` appends its arguments verbatim.
pub fn run_lua(code: &str) -> NetResult<String> {
    let lua = Lua::new();
    let output = Arc::new(Mutex::new(String::new()));
    capture_output(&lua, &output).map_err(lua_error)?;

    lua.load(code)
        .set_name("request")
        .exec()
        .map_err(lua_error)?;

    let text = output.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(text.clone())
}

fn capture_output(lua: &Lua, output: &Arc<Mutex<String>>) -> mlua::Result<()> {
    let globals = lua.globals();
    let tostring: Function = globals.get("tostring")?;

    let sink = Arc::clone(output);
    let to_text = tostring.clone();
    let print = lua.create_function(move |_, args: MultiValue| {
        let mut line = String::new();
        for (i, value) in args.into_iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            let text: mlua::String = to_text.call(value)?;
            line.push_str(&text.to_string_lossy());
        }
        line.push('\n');
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(&line);
        Ok(())
    })?;
    globals.set("print", print)?;

    let sink = Arc::clone(output);
    let write = lua.create_function(move |_, args: MultiValue| {
        let mut chunk = String::new();
        for value in args {
            let text: mlua::String = tostring.call(value)?;
            chunk.push_str(&text.to_string_lossy());
        }
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(&chunk);
        Ok(())
    })?;
    let io: Table = globals.get("io")?;
    io.set("write", write)?;

    Ok(())
}

fn lua_error(err: mlua::Error) -> NetError {
    NetError::Execution(err.to_string())
}

/// Target of a directory-change command, or `None` for other commands.
///
/// Bare `cd` targets the home directory.
pub fn directory_target(command: &str) -> Option<PathBuf> {
    let command = command.trim();
    let rest = if command == "cd" {
        ""
    } else {
        command.strip_prefix("cd ")?.trim()
    };

    if rest.is_empty() {
        Some(dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")))
    } else {
        Some(PathBuf::from(rest))
    }
}

/// Change the working directory and return the new absolute path.
pub fn change_directory(target: PathBuf) -> NetResult<String> {
    std::env::set_current_dir(&target)
        .map_err(|e| NetError::Execution(format!("cd {}: {e}", target.display())))?;
    let cwd = std::env::current_dir()
        .map_err(|e| NetError::Execution(format!("cannot read working directory: {e}")))?;
    Ok(cwd.display().to_string())
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run `command` through the platform shell.
///
/// Returns stdout followed by stderr with trailing whitespace removed.
/// Lines are chained with `&&`. On timeout the child is killed and an
/// [`NetError::Execution`] describing the timeout is returned.
pub async fn run_shell(command: &str, timeout: Duration) -> NetResult<String> {
    let command = command.trim().replace('\n', " && ");

    let child = shell_command(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| NetError::Execution(format!("failed to start shell: {e}")))?;

    // Dropping the future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(text.trim_end().to_string())
        }
        Ok(Err(e)) => Err(NetError::Execution(format!("shell failed: {e}"))),
        Err(_) => {
            log::warn!("[Bot] Killed shell command after {:?}: {command}", timeout);
            Err(NetError::Execution(format!(
                "Command '{command}' timed out after {} seconds",
                timeout.as_secs_f64()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lua_print_is_captured() {
        assert_eq!(run_lua("print('hello')").unwrap(), "hello\n");
    }

    #[test]
    fn test_lua_print_joins_with_tabs() {
        assert_eq!(run_lua("print('a', 1, true)").unwrap(), "a\t1\ttrue\n");
        assert_eq!(run_lua("print()").unwrap(), "\n");
    }

    #[test]
    fn test_lua_io_write_is_captured() {
        assert_eq!(run_lua("io.write('x', 2) io.write('y')").unwrap(), "x2y");
    }

    #[test]
    fn test_lua_without_output() {
        assert_eq!(run_lua("local x = 1 + 1").unwrap(), "");
    }

    #[test]
    fn test_lua_errors_are_execution_errors() {
        assert!(matches!(run_lua("this is not lua"), Err(NetError::Execution(_))));
        let err = run_lua("error('boom')").unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_directory_target_forms() {
        assert_eq!(directory_target("cd .."), Some(PathBuf::from("..")));
        assert_eq!(directory_target("  cd   /tmp  "), Some(PathBuf::from("/tmp")));
        assert!(directory_target("cd").is_some());
        assert_eq!(directory_target("cdx"), None);
        assert_eq!(directory_target("echo cd"), None);
    }

    #[test]
    fn test_change_directory_to_missing_path_fails() {
        let err = change_directory(PathBuf::from("/definitely/not/a/real/dir")).unwrap_err();
        assert!(matches!(err, NetError::Execution(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_captures_stdout_and_stderr() {
        let out = run_shell("echo out; echo err 1>&2", SHELL_TIMEOUT).await.unwrap();
        assert_eq!(out, "out\nerr");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_joins_lines() {
        let out = run_shell("echo one\necho two\n", SHELL_TIMEOUT).await.unwrap();
        assert_eq!(out, "one\ntwo");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_timeout_is_reported() {
        let err = run_shell("sleep 5", Duration::from_millis(200))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("sleep 5"), "{text}");
        assert!(text.contains("timed out"), "{text}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_output_is_returned() {
        let out = run_shell("ls /definitely/not/here", SHELL_TIMEOUT).await.unwrap();
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn test_execute_routes_run_to_lua() {
        let out = Executor::default()
            .execute(&Request::new("print(1 + 1)", true))
            .await
            .unwrap();
        assert_eq!(out, "2\n");
    }
}
