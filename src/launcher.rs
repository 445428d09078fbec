//! Solver process launch.
//!
//! Builds the exact command for a descriptor and spawns it with piped
//! standard streams. On Unix the child leads a fresh process group so the
//! supervisor can signal the whole tree.
use crate::resolver::ExecutableDescriptor;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Instant;

/// Fully rendered command, ready to spawn or log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub command_line: String,
}

impl LaunchPlan {
    pub fn build(descriptor: &ExecutableDescriptor, deck_argument: &str, working_dir: &Path) -> Self {
        let args = descriptor.render_args(deck_argument);
        let program = descriptor.program.clone();
        let command_line = format_command_line(&program, &args);
        Self {
            program,
            args,
            working_dir: working_dir.to_path_buf(),
            command_line,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }
        cmd
    }
}

/// A running solver plus the details needed to supervise and log it.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,
    pub plan: LaunchPlan,
    pub started_at: DateTime<Local>,
    pub started: Instant,
}

/// Spawn the solver; failures here are terminal for the job.
pub fn launch(plan: &LaunchPlan) -> Result<LaunchedProcess> {
    let started_at = Local::now();
    let started = Instant::now();
    let child = plan
        .command()
        .spawn()
        .with_context(|| format!("spawn solver {}", plan.program.display()))?;
    tracing::info!(
        pid = child.id(),
        cwd = %plan.working_dir.display(),
        command = %plan.command_line,
        "solver launched"
    );
    Ok(LaunchedProcess {
        child,
        plan: plan.clone(),
        started_at,
        started,
    })
}

fn format_command_line(program: &Path, args: &[String]) -> String {
    let program = program.display().to_string();
    shell_words::join(std::iter::once(program.as_str()).chain(args.iter().map(String::as_str)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_renders_deck_argument_and_quotes_command_line() {
        let descriptor = ExecutableDescriptor::script_via_compat(
            PathBuf::from("/opt/ATP/run ATP.bat"),
            PathBuf::from("/usr/bin/wine"),
        );
        let plan = LaunchPlan::build(&descriptor, "case_1.atp", Path::new("/opt/ATP"));
        assert_eq!(plan.program, PathBuf::from("/usr/bin/wine"));
        assert_eq!(
            plan.args,
            vec!["cmd", "/c", "/opt/ATP/run ATP.bat", "case_1.atp"]
        );
        assert_eq!(
            plan.command_line,
            "/usr/bin/wine cmd /c '/opt/ATP/run ATP.bat' case_1.atp"
        );
        assert_eq!(plan.working_dir, PathBuf::from("/opt/ATP"));
    }

    #[test]
    fn spawn_of_missing_program_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let descriptor = ExecutableDescriptor::native(dir.path().join("no-such-solver"));
        let plan = LaunchPlan::build(&descriptor, "deck.atp", dir.path());
        let err = launch(&plan).expect_err("spawn should fail");
        assert!(format!("{err:#}").contains("spawn solver"));
    }
}
