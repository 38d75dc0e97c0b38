//! Scripted runner for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

use super::command::{CommandOutput, CommandRunner, Invocation};

/// Replies to invocations from a script and records every call.
///
/// The first rule whose needle is contained in the rendered line wins.
/// Unmatched invocations succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, CommandOutput)>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies with `output` to lines containing `needle`.
    pub fn on(mut self, needle: impl Into<String>, output: CommandOutput) -> Self {
        self.rules.push((needle.into(), output));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered lines, in call order.
    pub fn lines(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.line).collect()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }

    /// Index of the first call containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lines().iter().position(|l| l.contains(needle))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| invocation.line.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::success("")))
    }
}
