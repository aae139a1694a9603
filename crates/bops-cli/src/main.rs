use std::io::{self, Write};
use std::process::ExitCode;

use bops_cpu::{CpuRefBackend, default_registry};
use bops_harness::{Mode, RunConfig, catalog, run};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "bops")]
#[command(about = "Differential correctness tests for tensor backends")]
struct Args {
    /// What to run.
    #[arg(value_enum, default_value_t = ModeArg::Test)]
    mode: ModeArg,

    /// Only run cases whose op descriptor matches, e.g. MUL_MAT.
    #[arg(short = 'o', value_name = "op")]
    op: Option<String>,

    /// Only test the registered backend with this name.
    #[arg(short = 'b', value_name = "backend")]
    backend: Option<String>,

    /// Seed the input generator for reproducible runs.
    #[arg(long, env = "BOPS_SEED")]
    seed: Option<u64>,

    /// Print the case catalog as JSON lines and exit.
    #[arg(long)]
    list: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModeArg {
    /// Compare with the CPU reference backend for correctness.
    Test,
    /// Performance evaluation (not implemented).
    Perf,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Test => Mode::Test,
            ModeArg::Perf => Mode::Perf,
        }
    }
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [mode] [-o op] [-b backend]\n  \
         valid modes are: test (compare with CPU backend for correctness) or perf (performance evaluation) [not implemented]\n  \
         op names are output op descriptors such as MUL_MAT\n"
    )
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn list(out: &mut dyn Write) -> bops_harness::Result<()> {
    for case in catalog() {
        let line = serde_json::to_string(&case)
            .map_err(|e| bops_harness::HarnessError::Malformed(e.to_string()))?;
        writeln!(out, "{line}")?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let program = std::env::args().next().unwrap_or_else(|| "bops".to_string());
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(_) => {
            print!("{}", usage(&program));
            return ExitCode::from(1);
        }
    };
    setup_logging();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.list {
        return match list(&mut out) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::from(1)
            }
        };
    }

    let config = RunConfig {
        mode: args.mode.into(),
        op: args.op,
        backend: args.backend,
        seed: args.seed,
    };
    let registry = default_registry();
    match run(&registry, &CpuRefBackend, &config, &mut out) {
        Ok(summary) => ExitCode::from(summary.exit_code()),
        Err(e) => {
            let _ = out.flush();
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("bops").chain(argv.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.mode, ModeArg::Test);
        assert!(args.op.is_none() && args.backend.is_none() && !args.list);
    }

    #[test]
    fn test_mode_and_filters() {
        let args = parse(&["perf", "-o", "MUL_MAT", "-b", "CPU-tiled"]).unwrap();
        assert_eq!(Mode::from(args.mode), Mode::Perf);
        assert_eq!(args.op.as_deref(), Some("MUL_MAT"));
        assert_eq!(args.backend.as_deref(), Some("CPU-tiled"));
    }

    #[test]
    fn test_malformed_arguments_rejected() {
        assert!(parse(&["bench"]).is_err());
        assert!(parse(&["-o"]).is_err());
        assert!(parse(&["-b"]).is_err());
        assert!(parse(&["--seed", "x"]).is_err());
    }

    #[test]
    fn test_help_is_not_a_usage_error() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_usage_text() {
        let text = usage("bops");
        assert!(text.starts_with("Usage: bops [mode] [-o op] [-b backend]\n"));
        assert!(text.contains("  op names are output op descriptors such as MUL_MAT\n"));
    }

    #[test]
    fn test_list_is_one_json_object_per_case() {
        let mut buf = Vec::new();
        list(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), catalog().len());
        for line in text.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.get("family").is_some());
        }
    }
}
