use std::process::Command;
use std::time::Instant;

use anyhow::{bail, Context};
use tracing::{error, info, warn};
use treadmill_machine::{hooks::MachineHooks, Machine, RunRecord, StatusNotice};

use crate::notice;

/// Runs one shell command per run. A non-zero exit fails the run.
pub struct CommandTask {
    program: String,
    args: Vec<String>,
}

impl CommandTask {
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("no command given");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl MachineHooks for CommandTask {
    fn execute(&mut self, _machine: &Machine, run: &mut RunRecord) -> anyhow::Result<()> {
        let started = Instant::now();
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        run.set("duration_ms", started.elapsed().as_millis() as u64);
        if let Some(code) = status.code() {
            run.set("exit_code", code);
        }
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }

    fn on_run_complete(&mut self, machine: &Machine, run: &mut RunRecord) -> anyhow::Result<()> {
        info!(
            machine = %machine.name(),
            run_id = run.id,
            failed = run.failed,
            exit_code = ?run.get("exit_code"),
            next = ?run.time_next,
            "run complete"
        );
        Ok(())
    }

    fn notify_status(&mut self, machine: &Machine, notice: &StatusNotice) -> anyhow::Result<()> {
        let text = notice::describe(&machine.status(), notice, machine.now());
        match notice {
            StatusNotice::Failed { .. } => error!(machine = %machine.name(), "{text}"),
            StatusNotice::PausedOnError { .. } | StatusNotice::PauseReminder { .. } => {
                warn!(machine = %machine.name(), "{text}")
            }
            StatusNotice::PausedByTask | StatusNotice::Resumed { .. } => {
                info!(machine = %machine.name(), "{text}")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandTask::new(&[]).is_err());
    }

    #[test]
    fn command_line_joins_arguments() {
        let task = CommandTask::new(&args(&["echo", "hello", "world"])).unwrap();
        assert_eq!(task.command_line(), "echo hello world");
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_is_recorded_and_non_zero_fails() {
        let machine = Machine::new("cmd", |_: &Machine, _: &mut RunRecord| -> anyhow::Result<()> {
            Ok(())
        });

        let mut ok = CommandTask::new(&args(&["true"])).unwrap();
        let mut run = RunRecord::new(0, Utc::now());
        ok.execute(&machine, &mut run).unwrap();
        assert_eq!(run.get("exit_code"), Some(&serde_json::Value::from(0)));
        assert!(run.get("duration_ms").is_some());

        let mut failing = CommandTask::new(&args(&["false"])).unwrap();
        let mut run = RunRecord::new(1, Utc::now());
        let err = failing.execute(&machine, &mut run).unwrap_err();
        assert!(err.to_string().starts_with("false exited with"));
        assert_eq!(run.get("exit_code"), Some(&serde_json::Value::from(1)));
    }

    #[test]
    fn missing_program_is_a_task_error() {
        let machine = Machine::new("cmd", |_: &Machine, _: &mut RunRecord| -> anyhow::Result<()> {
            Ok(())
        });
        let mut task = CommandTask::new(&args(&["treadmill-no-such-program"])).unwrap();
        let mut run = RunRecord::new(0, Utc::now());
        let err = task.execute(&machine, &mut run).unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
        assert!(run.get("exit_code").is_none());
    }
}
