//! entsync: move entities from the legacy store into the normalized store,
//! check that both agree, and switch which one is authoritative.
//!
//! Logs go to stderr; the command result (one line, or a JSON report with
//! `--json`) goes to stdout.
//!
//! Exit codes: 0 success, 3 warning (nothing to do / already done),
//! 1 failure, 2 usage error.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;

use entsync_core::{
    CutoverGate, EnableOptions, EntsyncConfig, RunReport, SqliteStore, StaticExtensionRegistry,
    TracingProgress, VerifyRequest, count_pending, run_sync, run_verification,
};
use entsync_error::SyncError;
use entsync_types::{EntityId, Outcome, Summary};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_WARNING: i32 = 3;

fn main() {
    let exit_code = run_cli(std::env::args_os());
    if exit_code != EXIT_SUCCESS {
        std::process::exit(exit_code);
    }
}

// ── Arguments ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    CountPending,
    Sync,
    Migrate,
    Verify,
    Enable,
    Disable,
    Status,
}

impl Command {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "count-pending" => Some(Self::CountPending),
            "sync" => Some(Self::Sync),
            "migrate" => Some(Self::Migrate),
            "verify" => Some(Self::Verify),
            "enable" => Some(Self::Enable),
            "disable" => Some(Self::Disable),
            "status" => Some(Self::Status),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::CountPending => "count-pending",
            Self::Sync => "sync",
            Self::Migrate => "migrate",
            Self::Verify => "verify",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Status => "status",
        }
    }

    /// Command-specific flags this command accepts.
    fn accepts(self, flag: &str) -> bool {
        match self {
            Self::Sync | Self::Migrate => flag == "--batch-size",
            Self::Verify => matches!(
                flag,
                "--batch-size" | "--start" | "--end" | "--entity-types" | "--verbose" | "--remigrate"
            ),
            Self::Enable => matches!(flag, "--for-new-install" | "--with-sync"),
            Self::Disable => flag == "--with-sync",
            Self::CountPending | Self::Status => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    command: Command,
    config: Option<PathBuf>,
    database: Option<PathBuf>,
    json: bool,
    debug: bool,
    log_format: LogFormat,
    batch_size: Option<usize>,
    start: Option<EntityId>,
    end: Option<EntityId>,
    entity_types: Option<Vec<String>>,
    verbose: bool,
    remigrate: bool,
    for_new_install: bool,
    with_sync: bool,
}

impl CliArgs {
    fn new(command: Command) -> Self {
        Self {
            command,
            config: None,
            database: None,
            json: false,
            debug: false,
            log_format: LogFormat::Text,
            batch_size: None,
            start: None,
            end: None,
            entity_types: None,
            verbose: false,
            remigrate: false,
            for_new_install: false,
            with_sync: false,
        }
    }
}

fn take_value<'a>(tail: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    tail.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got `{raw}`"))
}

fn parse_args(tail: &[String]) -> Result<CliArgs, String> {
    // Global flags that take a value may precede the command; skip their values.
    let command_index = tail
        .iter()
        .enumerate()
        .scan(false, |skip_next, (index, arg)| {
            let is_value = *skip_next;
            *skip_next = matches!(arg.as_str(), "--config" | "--database" | "--log-format");
            Some((index, arg, is_value))
        })
        .find(|(_, arg, is_value)| !*is_value && !arg.starts_with('-'))
        .map(|(index, _, _)| index)
        .ok_or_else(|| "no command given".to_owned())?;

    let command = Command::parse(&tail[command_index])
        .ok_or_else(|| format!("unknown command `{}`", tail[command_index]))?;
    let mut args = CliArgs::new(command);

    let mut i = 0;
    while i < tail.len() {
        if i == command_index {
            i += 1;
            continue;
        }
        let flag = tail[i].as_str();
        let global = matches!(
            flag,
            "--config" | "--database" | "--json" | "--debug" | "--log-format"
        );
        if !global && !command.accepts(flag) {
            return Err(if flag.starts_with('-') {
                format!("`{flag}` is not accepted by `{}`", command.name())
            } else {
                format!("unexpected argument `{flag}`")
            });
        }
        match flag {
            "--config" => args.config = Some(PathBuf::from(take_value(tail, &mut i, flag)?)),
            "--database" => args.database = Some(PathBuf::from(take_value(tail, &mut i, flag)?)),
            "--json" => args.json = true,
            "--debug" => args.debug = true,
            "--log-format" => {
                args.log_format = match take_value(tail, &mut i, flag)? {
                    "text" => LogFormat::Text,
                    "json" => LogFormat::Json,
                    other => return Err(format!("--log-format must be text or json, got `{other}`")),
                };
            }
            "--batch-size" => {
                args.batch_size = Some(parse_number(take_value(tail, &mut i, flag)?, flag)?);
            }
            "--start" => args.start = Some(parse_number(take_value(tail, &mut i, flag)?, flag)?),
            "--end" => args.end = Some(parse_number(take_value(tail, &mut i, flag)?, flag)?),
            "--entity-types" => {
                let types: Vec<String> = take_value(tail, &mut i, flag)?
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
                    .collect();
                if types.is_empty() {
                    return Err("--entity-types requires at least one type".to_owned());
                }
                args.entity_types = Some(types);
            }
            "--verbose" => args.verbose = true,
            "--remigrate" => args.remigrate = true,
            "--for-new-install" => args.for_new_install = true,
            "--with-sync" => args.with_sync = true,
            _ => unreachable!("flag acceptance checked above"),
        }
        i += 1;
    }

    if let Some((start, end)) = args.start.zip(args.end).filter(|(s, e)| s > e) {
        return Err(format!("--start ({start}) is greater than --end ({end})"));
    }
    if args.start.is_some_and(|s| s < 0) || args.end.is_some_and(|e| e < 0) {
        return Err("--start and --end must not be negative".to_owned());
    }
    Ok(args)
}

// ── Entry point ──────────────────────────────────────────────────────────

fn run_cli<I>(os_args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let raw: Vec<String> = os_args
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    let tail: &[String] = raw.get(1..).unwrap_or_default();

    if tail.is_empty() || tail.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return if tail.is_empty() { EXIT_USAGE } else { EXIT_SUCCESS };
    }

    let args = match parse_args(tail) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("run `entsync --help` for usage");
            return EXIT_USAGE;
        }
    };

    init_logging(args.debug, args.log_format);
    debug!(command = args.command.name(), "parsed arguments");

    let report = execute(&args);
    let rendered = if args.json {
        report.to_json_pretty().unwrap_or_else(|err| {
            format!("{{\"outcome\":\"failure\",\"reason\":\"{err}\"}}")
        })
    } else {
        render_human(&report)
    };
    finish(&mut io::stdout().lock(), &rendered, &report.outcome)
}

/// Print the rendered result and map the outcome label to an exit code.
fn finish(out: &mut impl Write, rendered: &str, outcome: &str) -> i32 {
    if let Err(err) = writeln!(out, "{rendered}") {
        eprintln!("error: cannot write result: {err}");
        return EXIT_FAILURE;
    }
    match outcome {
        "success" => EXIT_SUCCESS,
        "warning" => EXIT_WARNING,
        _ => EXIT_FAILURE,
    }
}

fn init_logging(debug: bool, format: LogFormat) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn failed(command: Command, err: &SyncError) -> RunReport {
    RunReport::from_outcome(
        command.name(),
        &Outcome::from_error(err, Summary::new(0, std::time::Duration::ZERO, "not started")),
    )
}

fn execute(args: &CliArgs) -> RunReport {
    let command = args.command;

    let mut config = match EntsyncConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return failed(command, &err),
    };
    if let Some(database) = &args.database {
        config.database.clone_from(database);
    }
    if let Some(batch_size) = args.batch_size {
        config.sync.batch_size = batch_size;
    }

    if command == Command::Migrate {
        return RunReport::from_outcome(
            command.name(),
            &Outcome::warning(
                "`migrate` is deprecated; use `entsync sync` instead",
                Summary::new(0, std::time::Duration::ZERO, "nothing done"),
            ),
        );
    }

    let store = match SqliteStore::open(&config.database, config.promoted_fields.clone()) {
        Ok(store) => store,
        Err(err) => return failed(command, &err),
    };
    info!(
        command = command.name(),
        database = %config.database.display(),
        "store opened"
    );

    let registry = StaticExtensionRegistry::new(config.extensions.clone());
    let gate = CutoverGate::new(
        &store,
        &registry,
        config.sync.entity_types.clone(),
        config.cutover.block_on_uncertain,
    );

    match command {
        Command::CountPending => RunReport::from_outcome(
            command.name(),
            &count_pending(&store, &config.sync.entity_types),
        ),
        Command::Sync => RunReport::from_outcome(
            command.name(),
            &run_sync(
                &store,
                &config,
                config.sync.batch_size,
                &mut TracingProgress,
            ),
        ),
        Command::Verify => {
            let request = VerifyRequest {
                batch_size: config.sync.batch_size,
                start: args.start.unwrap_or(0),
                end: args.end,
                entity_types: args.entity_types.clone(),
                verbose: args.verbose,
                remigrate: args.remigrate,
            };
            let run = run_verification(&store, &config, &request, &mut TracingProgress);
            RunReport::from_outcome(command.name(), &run.outcome).with_divergences(&run.divergences)
        }
        Command::Enable => RunReport::from_outcome(
            command.name(),
            &gate.enable(EnableOptions {
                for_new_install: args.for_new_install,
                with_sync: args.with_sync,
            }),
        ),
        Command::Disable => RunReport::from_outcome(command.name(), &gate.disable(args.with_sync)),
        Command::Status => match gate.status() {
            Ok(status) => {
                let message = format!(
                    "{} is authoritative, sync {}, schema {}, {} pending",
                    status.authoritative,
                    if status.background_sync { "on" } else { "off" },
                    if status.schema_exists { "present" } else { "missing" },
                    status.pending
                );
                RunReport::from_outcome(
                    command.name(),
                    &Outcome::Success(Summary::new(
                        status.pending,
                        std::time::Duration::ZERO,
                        message,
                    )),
                )
                .with_status(status)
            }
            Err(err) => failed(command, &err),
        },
        Command::Migrate => unreachable!("handled before the store is opened"),
    }
}

fn render_human(report: &RunReport) -> String {
    let mut out = report.human_line();
    for record in &report.divergences {
        out.push_str(&format!(
            "\n  entity {} {:?} `{}`: legacy {:?} / normalized {:?}",
            record.entity_id,
            record.kind,
            record.key,
            record.legacy_values,
            record.normalized_values
        ));
    }
    out
}

fn print_help() {
    let text = "\
entsync: migrate and reconcile entities between the legacy and normalized stores

USAGE:
    entsync [GLOBAL OPTIONS] <COMMAND> [OPTIONS]

COMMANDS:
    count-pending         Number of entities whose normalized copy is stale or missing
    sync                  Migrate every pending entity, batch by batch
    migrate               Deprecated; use `sync`
    verify                Compare both stores over an ID range
    enable                Make the normalized store authoritative
    disable               Make the legacy store authoritative again
    status                Show flags, schema state and backlog size

GLOBAL OPTIONS:
    --config <PATH>       Configuration file (default: entsync.toml if present)
    --database <PATH>     SQLite database holding both stores
    --json                Print the result as a JSON report
    --debug               Debug-level logging
    --log-format <FMT>    text (default) or json
    -h, --help            Show this help message

SYNC OPTIONS:
    --batch-size <N>      Entities per batch (default 500; 0 means 500)

VERIFY OPTIONS:
    --batch-size <N>      Entities per batch (default 500; 0 means 500)
    --start <ID>          First entity ID to verify (default 0)
    --end <ID>            Last entity ID to verify (default: no limit)
    --entity-types <T,..> Restrict to these configured entity types
    --verbose             Log every divergence as it is found
    --remigrate           Re-migrate divergent entities and verify them again

ENABLE OPTIONS:
    --for-new-install     Refuse unless the installation has no entities
    --with-sync           Also turn on background sync

DISABLE OPTIONS:
    --with-sync           Also turn off background sync

EXIT CODES:
    0 success, 3 warning, 1 failure, 2 usage error

EXAMPLES:
    entsync count-pending
    entsync sync --batch-size 1000
    entsync verify --start 1 --end 50000 --verbose --remigrate
    entsync enable --with-sync --json
";
    let _ = io::stdout().write_all(text.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_owned()).collect()
    }

    fn os_args(raw: &[&str]) -> Vec<OsString> {
        std::iter::once("entsync")
            .chain(raw.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn parses_verify_flags() {
        let parsed = parse_args(&args(&[
            "verify",
            "--start",
            "10",
            "--end",
            "20",
            "--entity-types",
            "order, refund",
            "--verbose",
            "--remigrate",
            "--batch-size",
            "0",
        ]))
        .unwrap();
        assert_eq!(parsed.command, Command::Verify);
        assert_eq!((parsed.start, parsed.end), (Some(10), Some(20)));
        assert_eq!(
            parsed.entity_types,
            Some(vec!["order".to_owned(), "refund".to_owned()])
        );
        assert!(parsed.verbose && parsed.remigrate);
        assert_eq!(parsed.batch_size, Some(0));
    }

    #[test]
    fn global_flags_may_precede_the_command() {
        let parsed = parse_args(&args(&[
            "--database",
            "shop.db",
            "--json",
            "enable",
            "--with-sync",
        ]))
        .unwrap();
        assert_eq!(parsed.command, Command::Enable);
        assert_eq!(parsed.database, Some(PathBuf::from("shop.db")));
        assert!(parsed.json && parsed.with_sync && !parsed.for_new_install);
    }

    #[test]
    fn rejects_flags_of_other_commands() {
        let err = parse_args(&args(&["disable", "--for-new-install"])).unwrap_err();
        assert!(err.contains("not accepted by `disable`"), "{err}");
        assert!(parse_args(&args(&["sync", "--remigrate"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["--json"])).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_args(&args(&["sync", "--batch-size", "-3"])).is_err());
        assert!(parse_args(&args(&["sync", "--batch-size"])).is_err());
        assert!(parse_args(&args(&["verify", "--start", "9", "--end", "3"])).is_err());
        assert!(parse_args(&args(&["count-pending", "--log-format", "xml"])).is_err());
    }

    #[test]
    fn exit_codes_follow_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("shop.db");
        let db = db.to_str().unwrap();

        assert_eq!(run_cli(os_args(&["--database", db, "count-pending"])), EXIT_SUCCESS);
        // Empty backlog.
        assert_eq!(run_cli(os_args(&["--database", db, "sync"])), EXIT_WARNING);
        assert_eq!(run_cli(os_args(&["--database", db, "migrate"])), EXIT_WARNING);
        assert_eq!(
            run_cli(os_args(&["--database", db, "enable", "--for-new-install"])),
            EXIT_SUCCESS
        );
        assert_eq!(run_cli(os_args(&["--database", db, "enable"])), EXIT_WARNING);
        assert_eq!(run_cli(os_args(&["--database", db, "disable", "--with-sync"])), EXIT_WARNING);
        // Schema exists but there is nothing to verify.
        assert_eq!(run_cli(os_args(&["--database", db, "verify"])), EXIT_WARNING);
        assert_eq!(run_cli(os_args(&["--database", db, "bogus"])), EXIT_USAGE);
        assert_eq!(run_cli(os_args(&["--help"])), EXIT_SUCCESS);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unwritable_stdout_is_a_failure() {
        assert_eq!(finish(&mut ClosedPipe, "[success] status", "success"), EXIT_FAILURE);
        let mut sink = Vec::new();
        assert_eq!(finish(&mut sink, "[warning] sync", "warning"), EXIT_WARNING);
        assert_eq!(sink, b"[warning] sync\n");
    }

    #[test]
    fn unopenable_database_fails() {
        assert_eq!(
            run_cli(os_args(&[
                "--database",
                "/nonexistent-entsync-dir/sub/shop.db",
                "status"
            ])),
            EXIT_FAILURE
        );
    }

    #[test]
    fn status_report_serializes_flags() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = parse_args(&args(&[
            "--database",
            dir.path().join("s.db").to_str().unwrap(),
            "status",
        ]))
        .unwrap();
        let report = execute(&parsed);
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["status"]["authoritative"], "LEGACY_AUTHORITATIVE");
        assert_eq!(json["status"]["schema_exists"], false);
    }
}
