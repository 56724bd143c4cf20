use serde::Deserialize;

use crate::constants::{EXIT_SAT, EXIT_UNSAT};
use crate::core::domain::{Outcome, Status};

/// Maps a finished process to a semantic status. One variant per solver
/// family; selected per executable in the configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classifier {
    /// SAT competition exit codes: 10 is SAT, 20 is UNSAT.
    #[default]
    ExitCode,
    /// Exit codes first, then the `s <STATUS>` line of stdout.
    StatusLine,
}

impl Classifier {
    pub fn classify(&self, outcome: &Outcome) -> Status {
        if outcome.timed_out() {
            return Status::Timeout;
        }

        match (self, by_exit_code(outcome.exit_code)) {
            (_, Some(status)) => status,
            (Classifier::ExitCode, None) => Status::Unknown,
            (Classifier::StatusLine, None) => {
                by_status_line(&outcome.stdout).unwrap_or(Status::Unknown)
            }
        }
    }
}

fn by_exit_code(code: i32) -> Option<Status> {
    match code {
        EXIT_SAT => Some(Status::Sat),
        EXIT_UNSAT => Some(Status::Unsat),
        _ => None,
    }
}

fn by_status_line(stdout: &str) -> Option<Status> {
    stdout.lines().find_map(|line| {
        let token = line.strip_prefix("s ")?.trim();
        match token {
            "SATISFIABLE" | "SAT" => Some(Status::Sat),
            "UNSATISFIABLE" | "UNSAT" => Some(Status::Unsat),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Termination;

    fn exited(exit_code: i32, stdout: &str) -> Outcome {
        Outcome {
            exit_code,
            stdout: stdout.to_string(),
            ..Outcome::default()
        }
    }

    #[test]
    fn test_exit_codes_ignore_stdout() {
        let classifier = Classifier::ExitCode;

        assert_eq!(classifier.classify(&exited(10, "s UNSATISFIABLE")), Status::Sat);
        assert_eq!(classifier.classify(&exited(20, "s SATISFIABLE")), Status::Unsat);
        assert_eq!(classifier.classify(&exited(0, "s SATISFIABLE")), Status::Unknown);
        assert_eq!(classifier.classify(&exited(1, "")), Status::Unknown);
    }

    #[test]
    fn test_timeout_is_never_overwritten() {
        let outcome = Outcome {
            exit_code: 10,
            termination: Termination::TimedOut,
            ..Outcome::default()
        };

        assert_eq!(Classifier::ExitCode.classify(&outcome), Status::Timeout);
        assert_eq!(Classifier::StatusLine.classify(&outcome), Status::Timeout);
    }

    #[test]
    fn test_status_line_fallback() {
        let classifier = Classifier::StatusLine;
        let stdout = "c parsing\nc solving\ns UNSATISFIABLE\n";

        assert_eq!(classifier.classify(&exited(0, stdout)), Status::Unsat);
        assert_eq!(classifier.classify(&exited(0, "s SATISFIABLE\nv 1 -2 0")), Status::Sat);
        assert_eq!(classifier.classify(&exited(0, "s UNKNOWN")), Status::Unknown);
        assert_eq!(classifier.classify(&exited(10, "s UNSATISFIABLE")), Status::Sat);
    }
}
