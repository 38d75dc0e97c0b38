//! Command builder and output helpers.
//!
//! A [`Command`] is a template plus execution flags. It is rendered into an
//! [`Invocation`] and handed to a [`CommandRunner`], which returns the exit
//! status together with everything the process wrote. The helpers on
//! [`Command`] turn that raw output into the shapes drivers branch on.

use async_trait::async_trait;

use crate::error::{CommandError, Result};

use super::template::{RenderContext, render};

/// Number of trailing output lines kept in a failure message.
const FAILURE_TAIL_LINES: usize = 20;

/// A fully rendered command, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Rendered shell command line.
    pub line: String,
    /// Template the line was rendered from.
    pub template: String,
    /// Forward output lines to the log while the command runs.
    pub stream: bool,
    /// The rendered line carries secrets and must not be logged.
    pub sensitive: bool,
    /// Data written to the process's standard input.
    pub stdin: Option<String>,
}

impl Invocation {
    /// Returns the text safe to show in logs and errors.
    #[must_use]
    pub fn display(&self) -> &str {
        if self.sensitive { &self.template } else { &self.line }
    }
}

/// Exit status and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given standard output.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and standard error.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the process exited with status 0.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Standard output followed by standard error.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }

    /// Returns true if stdout or stderr contains any of `needles`.
    #[must_use]
    pub fn contains_any(&self, needles: &[&str]) -> bool {
        needles
            .iter()
            .any(|n| self.stdout.contains(n) || self.stderr.contains(n))
    }
}

/// Runs rendered commands.
///
/// Implementations return `Err` only when the process could not be run at
/// all; a non-zero exit is reported through [`CommandOutput::code`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `invocation` to completion.
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// A command template plus execution flags.
#[derive(Debug, Clone)]
pub struct Command {
    template: String,
    context: Option<RenderContext>,
    stream: bool,
    stdout_only: bool,
    sensitive: bool,
    stdin: Option<String>,
}

impl Command {
    /// Creates a streaming command. Without [`Command::as_template`] the text
    /// is run verbatim.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            context: None,
            stream: true,
            stdout_only: false,
            sensitive: false,
            stdin: None,
        }
    }

    /// Renders the command against `ctx` before running it.
    #[must_use]
    pub fn as_template(mut self, ctx: &RenderContext) -> Self {
        self.context = Some(ctx.clone());
        self
    }

    /// Captures output silently instead of forwarding it to the log.
    #[must_use]
    pub const fn without_streaming(mut self) -> Self {
        self.stream = false;
        self
    }

    /// Only standard output counts as the command's output.
    #[must_use]
    pub const fn stdout_only(mut self) -> Self {
        self.stdout_only = true;
        self
    }

    /// Marks the rendered line as secret; only the template is ever logged.
    #[must_use]
    pub const fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Feeds `input` to the process's standard input.
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Renders the command.
    ///
    /// # Errors
    ///
    /// Returns a template error if rendering fails.
    pub fn invocation(&self) -> Result<Invocation> {
        let line = match &self.context {
            Some(ctx) => render(&self.template, ctx)?,
            None => self.template.clone(),
        };

        Ok(Invocation {
            line,
            template: self.template.clone(),
            stream: self.stream,
            sensitive: self.sensitive,
            stdin: self.stdin.clone(),
        })
    }

    /// Runs the command and returns its raw output, whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be rendered or started.
    pub async fn execute(&self, runner: &dyn CommandRunner) -> Result<CommandOutput> {
        let invocation = self.invocation()?;
        runner.execute(&invocation).await
    }

    /// Runs the command, failing on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be run or exits non-zero.
    pub async fn run(&self, runner: &dyn CommandRunner) -> Result<()> {
        self.checked(runner).await.map(|_| ())
    }

    /// Runs the command and returns its trimmed output.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be run or exits non-zero.
    pub async fn output(&self, runner: &dyn CommandRunner) -> Result<String> {
        let output = self.checked(runner).await?;
        Ok(self.captured(&output).trim().to_string())
    }

    /// Runs the command and returns its non-empty output lines, trimmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be run or exits non-zero.
    pub async fn output_lines(&self, runner: &dyn CommandRunner) -> Result<Vec<String>> {
        let output = self.checked(runner).await?;
        Ok(self
            .captured(&output)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Runs the command and returns the first non-empty output line.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or prints nothing.
    pub async fn first_line(&self, runner: &dyn CommandRunner) -> Result<String> {
        self.output_lines(runner)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CommandError::EmptyOutput {
                    command: self.template.clone(),
                }
                .into()
            })
    }

    /// Runs the command and reports whether its output contains any of `needles`.
    ///
    /// A match wins over the exit status; without a match a non-zero exit is
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be run, or exits non-zero
    /// without any needle in its output.
    pub async fn output_contains_any(
        &self,
        runner: &dyn CommandRunner,
        needles: &[&str],
    ) -> Result<bool> {
        let output = self.execute(runner).await?;
        let captured = self.captured(&output);
        if needles.iter().any(|n| captured.contains(n)) {
            return Ok(true);
        }
        if output.is_success() {
            Ok(false)
        } else {
            Err(self.failure(&output).into())
        }
    }

    /// Builds the error describing a non-zero exit of this command.
    #[must_use]
    pub fn failure(&self, output: &CommandOutput) -> CommandError {
        let command = match (&self.context, self.sensitive) {
            (Some(ctx), false) => {
                render(&self.template, ctx).unwrap_or_else(|_| self.template.clone())
            }
            _ => self.template.clone(),
        };

        CommandError::Failed {
            command,
            code: output.code,
            output: tail(&output.combined(), FAILURE_TAIL_LINES),
        }
    }

    async fn checked(&self, runner: &dyn CommandRunner) -> Result<CommandOutput> {
        let output = self.execute(runner).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(self.failure(&output).into())
        }
    }

    fn captured(&self, output: &CommandOutput) -> String {
        if self.stdout_only {
            output.stdout.clone()
        } else {
            output.combined()
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployerError;
    use crate::exec::fake::ScriptedRunner;

    #[tokio::test]
    async fn test_render_and_flags() {
        let runner = ScriptedRunner::new();
        let ctx = RenderContext::new().with("Name", "disk-1");

        Command::new("gcloud compute disks delete {{ Name }}")
            .as_template(&ctx)
            .without_streaming()
            .run(&runner)
            .await
            .unwrap();
        Command::new("literal {{ NotRendered }}").run(&runner).await.unwrap();

        let calls = runner.invocations();
        assert_eq!(calls[0].line, "gcloud compute disks delete disk-1");
        assert!(!calls[0].stream);
        assert_eq!(calls[1].line, "literal {{ NotRendered }}");
        assert!(calls[1].stream);
    }

    #[tokio::test]
    async fn test_output_lines_stdout_only() {
        let runner = ScriptedRunner::new().on(
            "disks list",
            CommandOutput {
                code: Some(0),
                stdout: String::from("d1,z1\n\n  d2,z2 \n"),
                stderr: String::from("WARNING: noise\n"),
            },
        );

        let lines = Command::new("gcloud compute disks list")
            .stdout_only()
            .output_lines(&runner)
            .await
            .unwrap();
        assert_eq!(lines, vec!["d1,z1", "d2,z2"]);

        let all = Command::new("gcloud compute disks list")
            .output_lines(&runner)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_contains_any_wins_over_exit_status() {
        let runner = ScriptedRunner::new()
            .on("show missing", CommandOutput::failure(3, "ERROR: the cluster could not be found"))
            .on("show broken", CommandOutput::failure(1, "ERROR: quota exceeded"));

        let missing = Command::new("az aks show missing")
            .output_contains_any(&runner, &["not be found"])
            .await
            .unwrap();
        assert!(missing);

        let present = Command::new("az aks show present")
            .output_contains_any(&runner, &["not be found"])
            .await
            .unwrap();
        assert!(!present);

        let err = Command::new("az aks show broken")
            .output_contains_any(&runner, &["not be found"])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployerError::Command(CommandError::Failed { code: Some(1), .. })
        ));
    }

    #[tokio::test]
    async fn test_sensitive_failure_hides_rendered_line() {
        let runner = ScriptedRunner::new().on("az login", CommandOutput::failure(1, "bad credentials"));
        let ctx = RenderContext::new().with("Secret", "hunter2");

        let err = Command::new("az login -p {{ Secret }}")
            .as_template(&ctx)
            .sensitive()
            .run(&runner)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("{{ Secret }}"));
        assert!(!message.contains("hunter2"));
        assert_eq!(runner.invocations()[0].display(), "az login -p {{ Secret }}");
    }

    #[tokio::test]
    async fn test_first_line_requires_output() {
        let runner = ScriptedRunner::new();
        let err = Command::new("az acr show --query id")
            .first_line(&runner)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployerError::Command(CommandError::EmptyOutput { .. })));
    }

    #[test]
    fn test_failure_keeps_output_tail() {
        let output = CommandOutput::failure(2, (1..=30).map(|i| format!("line {i}\n")).collect::<String>());
        let CommandError::Failed { output, .. } = Command::new("x").failure(&output) else {
            panic!("expected a failure");
        };
        assert!(output.starts_with("line 11"));
        assert!(output.ends_with("line 30"));
    }
}
