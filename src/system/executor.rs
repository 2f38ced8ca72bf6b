// src/system/executor.rs

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("The expected executable {program} was not found")]
    ExecutableNotFound { program: String },
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' exited with code {}", .code.map_or_else(|| "<signal>".to_string(), |c| c.to_string()))]
    NonZeroExitStatus {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("Command '{command}' was interrupted.")]
    Interrupted { command: String },
}

impl ExecutionError {
    /// Captured standard output, when the command got to run.
    pub fn stdout(&self) -> Option<&str> {
        match self {
            Self::NonZeroExitStatus { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    /// Captured standard error, when the command got to run.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::NonZeroExitStatus { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// A fully described process invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Environment overrides applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Directories prepended to `PATH`.
    pub extra_path: Vec<PathBuf>,
    /// Exit codes accepted besides 0.
    pub accept_codes: Vec<i32>,
    /// Append stderr to stdout instead of keeping it separate. The two are
    /// captured on separate pipes, so stderr follows all of stdout rather
    /// than being interleaved with it.
    pub combine_stderr: bool,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Splits a shell-like command line into a spec.
    pub fn parse(command_line: &str) -> Result<Self, ExecutionError> {
        let trimmed = command_line.trim();
        let argv = shlex::split(trimmed)
            .ok_or_else(|| ExecutionError::CommandParse(trimmed.to_string()))?;
        if argv.is_empty() {
            return Err(ExecutionError::EmptyCommand);
        }
        Ok(Self {
            argv,
            ..Self::default()
        })
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn accept(mut self, code: i32) -> Self {
        self.accept_codes.push(code);
        self
    }

    /// The command as it could be pasted into a shell.
    pub fn display(&self) -> String {
        format_command(&self.argv)
    }
}

/// Quotes and joins arguments for display.
pub fn format_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            shlex::try_quote(arg)
                .map(|quoted| quoted.into_owned())
                .unwrap_or_else(|_| arg.clone())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

fn search_path(extra_path: &[PathBuf], env: &BTreeMap<String, String>) -> Option<OsString> {
    let inherited = env
        .get("PATH")
        .map(OsString::from)
        .or_else(|| std::env::var_os("PATH"))
        .unwrap_or_default();
    let dirs: Vec<PathBuf> = extra_path
        .iter()
        .cloned()
        .chain(std::env::split_paths(&inherited))
        .collect();
    std::env::join_paths(dirs).ok()
}

#[cfg(unix)]
fn was_interrupted(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(2)
}

#[cfg(not(unix))]
fn was_interrupted(_status: &ExitStatus) -> bool {
    false
}

/// Runs a command to completion, capturing its output.
///
/// Blocks until the process exits. A missing executable is reported as
/// [`ExecutionError::ExecutableNotFound`]; an exit code that is neither 0 nor
/// accepted yields [`ExecutionError::NonZeroExitStatus`] with both captures.
pub fn run(spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
    let (program, args) = spec.argv.split_first().ok_or(ExecutionError::EmptyCommand)?;
    let command_line = spec.display();

    let path_var = search_path(&spec.extra_path, &spec.env);
    let cwd = spec
        .cwd
        .as_deref()
        .map(dunce::simplified)
        .map(Path::to_path_buf);
    let lookup_dir = cwd
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();

    // Resolve through the same PATH the child will see.
    let resolved = which::which_in(program, path_var.clone(), &lookup_dir).map_err(|_| {
        ExecutionError::ExecutableNotFound {
            program: program.clone(),
        }
    })?;

    let mut command = StdCommand::new(&resolved);
    command
        .args(args)
        .envs(&spec.env)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(path_var) = path_var {
        command.env("PATH", path_var);
    }
    if let Some(cwd) = &cwd {
        command.current_dir(cwd);
    }

    log::trace!("Spawning {} as {}", command_line, resolved.display());
    let mut child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExecutionError::ExecutableNotFound {
            program: program.clone(),
        },
        _ => ExecutionError::CommandFailed(command_line.clone(), e),
    })?;

    // Stdin is fed from its own thread while the output pipes are drained,
    // so a child that writes a lot before reading everything cannot stall.
    let stdin_pipe = child.stdin.take();
    let (output, fed) = std::thread::scope(|scope| {
        let feeder = stdin_pipe.zip(spec.stdin.as_deref()).map(|(mut pipe, input)| {
            scope.spawn(move || match pipe.write_all(input.as_bytes()) {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            })
        });
        let output = child.wait_with_output();
        let fed = match feeder.map(|handle| handle.join()) {
            None => Ok(()),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(std::io::Error::other("the stdin writer panicked")),
        };
        (output, fed)
    });
    let output = output.map_err(|e| ExecutionError::CommandFailed(command_line.clone(), e))?;
    fed.map_err(|e| ExecutionError::CommandFailed(command_line.clone(), e))?;

    let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if spec.combine_stderr {
        stdout.push_str(&stderr);
        stderr.clear();
    }

    if was_interrupted(&output.status) {
        return Err(ExecutionError::Interrupted {
            command: command_line,
        });
    }

    let code = output.status.code();
    let accepted = code.is_some_and(|c| c == 0 || spec.accept_codes.contains(&c));
    if !accepted {
        return Err(ExecutionError::NonZeroExitStatus {
            command: command_line,
            code,
            stdout,
            stderr,
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        code: code.unwrap_or_default(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_captures_stdout_and_honors_cwd() {
        let dir = tempdir().unwrap();
        let out = run(&CommandSpec::new(["pwd"]).cwd(dir.path())).unwrap();
        let reported = PathBuf::from(out.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_env_overrides_reach_the_child() {
        let spec = CommandSpec::new(["sh", "-c", "printf %s \"$GREETING\""]).env("GREETING", "hi");
        assert_eq!(run(&spec).unwrap().stdout, "hi");
    }

    #[test]
    fn test_non_zero_exit_carries_captures() {
        let spec = CommandSpec::new(["sh", "-c", "echo out; echo err >&2; exit 3"]);
        let err = run(&spec).unwrap_err();
        match err {
            ExecutionError::NonZeroExitStatus {
                code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(code, Some(3));
                assert_eq!(stdout, "out\n");
                assert_eq!(stderr, "err\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_accepted_exit_codes_are_not_errors() {
        let spec = CommandSpec::new(["sh", "-c", "exit 1"]).accept(1);
        assert_eq!(run(&spec).unwrap().code, 1);
    }

    #[test]
    fn test_missing_executable_is_named() {
        let err = run(&CommandSpec::new(["definitely-not-a-real-tool-xyz"])).unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-tool-xyz"));
        assert!(matches!(err, ExecutionError::ExecutableNotFound { .. }));
    }

    #[test]
    fn test_stdin_and_combined_output() {
        let mut spec = CommandSpec::new(["sh", "-c", "cat; echo warn >&2"]);
        spec.stdin = Some("fed\n".to_string());
        spec.combine_stderr = true;
        let out = run(&spec).unwrap();
        assert_eq!(out.stdout, "fed\nwarn\n");
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn test_large_stdin_while_child_floods_stdout() {
        let mut spec = CommandSpec::new([
            "sh",
            "-c",
            "head -c 200000 /dev/zero; wc -c",
        ]);
        spec.stdin = Some("x".repeat(200_000));
        let out = run(&spec).unwrap();
        assert!(out.stdout.len() > 200_000);
        assert!(out.stdout.trim_end().ends_with("200000"));
    }

    #[test]
    fn test_child_ignoring_stdin_is_not_an_error() {
        let mut spec = CommandSpec::new(["true"]);
        spec.stdin = Some("y".repeat(500_000));
        run(&spec).unwrap();
    }

    #[test]
    fn test_parse_splits_like_a_shell() {
        let spec = CommandSpec::parse("echo 'two words' three").unwrap();
        assert_eq!(spec.argv, vec!["echo", "two words", "three"]);
        assert!(matches!(CommandSpec::parse("   "), Err(ExecutionError::EmptyCommand)));
        assert_eq!(format_command(&spec.argv), "echo 'two words' three");
    }
}
