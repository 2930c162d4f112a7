// SPDX-License-Identifier: GPL-3.0-only

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lun_contracts::traits::command::render;
use lun_contracts::{CommandOutput, CommandRunner, ConnectorError, Result};

#[derive(Default)]
struct State {
    sequences: HashMap<String, VecDeque<CommandOutput>>,
    timelines: HashMap<String, Vec<(Duration, CommandOutput)>>,
    calls: Vec<String>,
}

/// `CommandRunner` that replays scripted outputs keyed by the rendered command line.
///
/// Replies queued with [`ScriptedRunner::on`] are consumed in order and the last
/// one repeats. Replies registered with [`ScriptedRunner::on_after`] become active
/// once that much time has passed since construction. Unscripted commands fail
/// as if the tool were not installed.
pub struct ScriptedRunner {
    started: Instant,
    state: Mutex<State>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on(&self, command: &str, output: CommandOutput) -> &Self {
        self.state()
            .sequences
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    pub fn on_after(&self, command: &str, after: Duration, output: CommandOutput) -> &Self {
        let mut state = self.state();
        let timeline = state.timelines.entry(command.to_string()).or_default();
        timeline.push((after, output));
        timeline.sort_by_key(|(after, _)| *after);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.as_str() == command)
            .count()
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let command = render(program, args);
        let elapsed = self.started.elapsed();
        let mut state = self.state();
        state.calls.push(command.clone());

        if let Some(timeline) = state.timelines.get(&command) {
            return timeline
                .iter()
                .rev()
                .find(|(after, _)| *after <= elapsed)
                .map(|(_, output)| output.clone())
                .ok_or_else(|| ConnectorError::ToolMissing(program.to_string()));
        }

        match state.sequences.get_mut(&command) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap_or_default()),
            Some(queue) => queue
                .front()
                .cloned()
                .ok_or_else(|| ConnectorError::ToolMissing(program.to_string())),
            None => Err(ConnectorError::ToolMissing(program.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_sequence_and_repeats_last() {
        let runner = ScriptedRunner::new();
        runner
            .on("multipathd show maps", CommandOutput::ok(""))
            .on("multipathd show maps", CommandOutput::ok("mpatha dm-2 3600"));

        let first = runner.run("multipathd", &["show", "maps"]).await.expect("first");
        let second = runner.run("multipathd", &["show", "maps"]).await.expect("second");
        let third = runner.run("multipathd", &["show", "maps"]).await.expect("third");

        assert_eq!(first.stdout, "");
        assert_eq!(second.stdout, "mpatha dm-2 3600");
        assert_eq!(third.stdout, "mpatha dm-2 3600");
        assert_eq!(runner.count("multipathd show maps"), 3);
    }

    #[tokio::test]
    async fn unscripted_commands_look_uninstalled() {
        let runner = ScriptedRunner::new();
        let error = runner.run("upadmin", &["show", "vlun"]).await.expect_err("unscripted");
        assert!(matches!(error, ConnectorError::ToolMissing(tool) if tool == "upadmin"));
    }
}
