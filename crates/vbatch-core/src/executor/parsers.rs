//! Built-in adapters for the four job kinds.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::adapter::{KindAdapter, LogSummary, ToolCommand};
use crate::domain::{JobKind, JobStatus};

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("built-in log pattern must compile"))
}

fn count_matches(re: &Regex, log: &str) -> u64 {
    re.find_iter(log).count() as u64
}

fn parse_u64(raw: &str) -> u64 {
    raw.replace(',', "").parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Syntax check
// ---------------------------------------------------------------------------

/// Parser / semantic checker. One obligation per target.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxCheckAdapter;

impl SyntaxCheckAdapter {
    fn parsed_modules() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"(?m)^Parsing file ")
    }

    fn error_marker() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"(?im)(\*\*\*\s*Parse Error\s*\*\*\*|^\*\*\* Errors:|Fatal errors while parsing|Semantic errors:)")
    }
}

impl KindAdapter for SyntaxCheckAdapter {
    fn kind(&self) -> JobKind {
        JobKind::SyntaxCheck
    }

    fn default_command(&self) -> ToolCommand {
        ToolCommand::new("java", &["-cp", "tla2tools.jar", "tla2sany.SANY", "{target}"])
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn parse(&self, log: &str) -> LogSummary {
        let proved = u64::from(!Self::error_marker().is_match(log));
        LogSummary::new(1, proved)
            .with_counter("modules_parsed", count_matches(Self::parsed_modules(), log))
    }

    fn classify(&self, exit_code: Option<i32>, summary: &LogSummary, _log: &str) -> JobStatus {
        if exit_code == Some(0) && summary.obligations_proved == 1 {
            JobStatus::Success
        } else {
            JobStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Proof check
// ---------------------------------------------------------------------------

/// Theorem prover. The only kind that can report PARTIAL.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProofCheckAdapter;

impl ProofCheckAdapter {
    fn all_proved() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"All (\d+) obligations? (?:were )?proved")
    }

    fn some_failed() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"(\d+)/(\d+) obligations? failed")
    }

    fn obligation_marker() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"(?im)^\s*(?:\[\w+\]:\s*)?obligation\s+\d+\s*(?::|is)?\s*(proved|failed)")
    }
}

impl KindAdapter for ProofCheckAdapter {
    fn kind(&self) -> JobKind {
        JobKind::ProofCheck
    }

    fn default_command(&self) -> ToolCommand {
        ToolCommand::new("tlapm", &["--cleanfp", "{target}"])
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(1800)
    }

    fn parse(&self, log: &str) -> LogSummary {
        // Summary lines win; the last one printed is the final tally.
        if let Some(caps) = Self::some_failed().captures_iter(log).last() {
            let failed = parse_u64(&caps[1]);
            let total = parse_u64(&caps[2]);
            return LogSummary::new(total, total.saturating_sub(failed));
        }
        if let Some(caps) = Self::all_proved().captures_iter(log).last() {
            let total = parse_u64(&caps[1]);
            return LogSummary::new(total, total);
        }

        let mut total = 0;
        let mut proved = 0;
        for caps in Self::obligation_marker().captures_iter(log) {
            total += 1;
            if caps[1].eq_ignore_ascii_case("proved") {
                proved += 1;
            }
        }
        LogSummary::new(total, proved)
    }

    fn classify(&self, exit_code: Option<i32>, summary: &LogSummary, _log: &str) -> JobStatus {
        let total = summary.obligations_total;
        let proved = summary.obligations_proved;
        if proved > 0 && proved < total {
            return JobStatus::Partial;
        }
        match (exit_code, total) {
            (Some(0), 0) => JobStatus::Success,
            (Some(0), _) if proved == total => JobStatus::Success,
            _ => JobStatus::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Model check
// ---------------------------------------------------------------------------

/// Explicit-state model checker. One obligation per model.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelCheckAdapter;

impl ModelCheckAdapter {
    fn state_counts() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"([\d,]+) states generated, ([\d,]+) distinct states found")
    }

    fn violation() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"(?m)^Error: (?:Invariant .+ is violated|Temporal properties were violated|Deadlock reached|Action property .+ is violated|Assumption .+ is false)")
    }
}

impl KindAdapter for ModelCheckAdapter {
    fn kind(&self) -> JobKind {
        JobKind::ModelCheck
    }

    fn default_command(&self) -> ToolCommand {
        ToolCommand::new(
            "java",
            &["-XX:+UseParallelGC", "-cp", "tla2tools.jar", "tlc2.TLC", "-workers", "auto", "{target}"],
        )
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn parse(&self, log: &str) -> LogSummary {
        let violations = count_matches(Self::violation(), log);
        let mut summary = LogSummary::new(1, u64::from(violations == 0))
            .with_counter("violations", violations);
        // TLC prints progress lines; the last one is the final count.
        if let Some(caps) = Self::state_counts().captures_iter(log).last() {
            summary = summary
                .with_counter("states_generated", parse_u64(&caps[1]))
                .with_counter("distinct_states", parse_u64(&caps[2]));
        }
        summary
    }

    fn classify(&self, exit_code: Option<i32>, summary: &LogSummary, _log: &str) -> JobStatus {
        if exit_code == Some(0) && summary.obligations_proved == 1 {
            JobStatus::Success
        } else {
            JobStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Native test
// ---------------------------------------------------------------------------

/// Native test harness. Sums every `test result:` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeTestAdapter;

impl NativeTestAdapter {
    fn result_line() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        compiled(&RE, r"test result: \w+\. (\d+) passed; (\d+) failed")
    }
}

impl KindAdapter for NativeTestAdapter {
    fn kind(&self) -> JobKind {
        JobKind::NativeTest
    }

    fn default_command(&self) -> ToolCommand {
        ToolCommand::new("cargo", &["test", "--manifest-path", "{target}"])
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(600)
    }

    fn parse(&self, log: &str) -> LogSummary {
        let (passed, failed) = Self::result_line()
            .captures_iter(log)
            .fold((0u64, 0u64), |(p, f), caps| {
                (p + parse_u64(&caps[1]), f + parse_u64(&caps[2]))
            });
        LogSummary::new(passed + failed, passed).with_counter("tests_failed", failed)
    }

    fn classify(&self, exit_code: Option<i32>, summary: &LogSummary, _log: &str) -> JobStatus {
        let failed = summary.obligations_total - summary.obligations_proved;
        if exit_code == Some(0) && failed == 0 {
            JobStatus::Success
        } else {
            JobStatus::Failed
        }
    }
}
