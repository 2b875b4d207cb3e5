use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use dialoguer::{Confirm, Input};
use indoc::indoc;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use diagpack::raw_file::display_relative;
use diagpack::{
    ExternalCommand, Outcome, Pipeline, PipelineSettings, RetryPolicy, RunReport, output_path_for,
};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;

/// Exit code used when the user backs out before anything was produced.
const EXIT_CANCELLED: i32 = 2;

enum Flow {
    Done(RunReport),
    Cancelled(&'static str),
}

fn cli() -> Command {
    Command::new("diagpack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Converts a Windows diagnostic bundle into an indexed archive of CSVs and originals")
        .long_about(indoc!(r#"
            Converts a Windows diagnostic bundle (zip) into an indexed archive.

            Registry exports, SetupDiag results, event logs and trace logs are converted to
            CSV; every other file is kept at its original path. Empty files and files that
            only say "No Results - Error" are dropped. A README.TXT describing the archive is
            added at its root.

            The result is written to `<input>-processed.zip` next to the input unless
            `--output` is given, and its path is printed on stdout.
        "#))
        .arg(
            Arg::new("INPUT")
                .value_parser(value_parser!(PathBuf))
                .help("Diagnostic zip to process. Prompts for a path when missing."),
        )
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Writes the archive to the path specified instead of next to the input. \
                       Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`."),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("num-threads")
                .long("threads")
                .short('t')
                .default_value("0")
                .value_parser(value_parser!(usize))
                .help("Sets the number of conversion workers, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("work-dir")
                .long("work-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory to create the working directory in, defaults to the system temp directory."),
        )
        .arg(
            Arg::new("keep-work-dir")
                .long("keep-work-dir")
                .action(ArgAction::SetTrue)
                .help("When set, the working directory is kept after a successful run."),
        )
        .arg(
            Arg::new("event-decoder")
                .long("event-decoder")
                .value_name("CMD")
                .help("Command line decoding one .evtx file, with `{input}`/`{output}` placeholders.")
                .long_help(indoc!(r#"
                    Command line decoding one .evtx file. `{input}` is replaced with the event log
                    path and `{output}` with a scratch file the command may write to; when no
                    `{output}` is present stdout is read instead. Commands named `evtx_dump` are
                    expected to print jsonl, anything else a CSV with a header row.
                "#)),
        )
        .arg(
            Arg::new("trace-decoder")
                .long("trace-decoder")
                .value_name("CMD")
                .help("Command line decoding one .etl file into CSV, with `{input}`/`{output}` placeholders."),
        )
        .arg(
            Arg::new("cab-expander")
                .long("cab-expander")
                .value_name("CMD")
                .help("Command line expanding one .cab file, `{output}` is the destination directory."),
        )
        .arg(
            Arg::new("cleanup-retries")
                .long("cleanup-retries")
                .default_value("5")
                .value_parser(value_parser!(u32))
                .help("How many times to try removing the working directory."),
        )
        .arg(
            Arg::new("cleanup-delay-ms")
                .long("cleanup-delay-ms")
                .default_value("2000")
                .value_parser(value_parser!(u64))
                .help("Delay between attempts to remove the working directory."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("-v - info, -vv - debug, -vvv - trace."),
        )
}

fn external_command(matches: &ArgMatches, id: &str) -> Result<Option<ExternalCommand>> {
    match matches.get_one::<String>(id) {
        Some(line) => match ExternalCommand::parse(line) {
            Some(command) => Ok(Some(command)),
            None => bail!("`--{}` requires a non-empty command line", id),
        },
        None => Ok(None),
    }
}

fn settings_from_matches(matches: &ArgMatches) -> Result<PipelineSettings> {
    let retries = *matches.get_one::<u32>("cleanup-retries").unwrap_or(&5);
    let delay_ms = *matches.get_one::<u64>("cleanup-delay-ms").unwrap_or(&2000);

    let mut settings = PipelineSettings::new()
        .num_threads(*matches.get_one::<usize>("num-threads").unwrap_or(&0))
        .keep_work_dir(matches.get_flag("keep-work-dir"))
        .retry(RetryPolicy::new(retries, Duration::from_millis(delay_ms)));

    if let Some(dir) = matches.get_one::<PathBuf>("work-dir") {
        settings = settings.work_dir_base(dir);
    }
    if let Some(command) = external_command(matches, "event-decoder")? {
        settings = settings.event_decoder(command);
    }
    if let Some(command) = external_command(matches, "trace-decoder")? {
        settings = settings.trace_decoder(command);
    }
    if let Some(command) = external_command(matches, "cab-expander")? {
        settings = settings.cab_expander(command);
    }

    Ok(settings)
}

/// Keeps asking until an existing file is given. An empty answer means the user gave up.
fn prompt_for_input() -> Result<Option<PathBuf>> {
    loop {
        let answer: String = Input::new()
            .with_prompt("Path to the diagnostic zip (empty to quit)")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read the input path from the terminal")?;

        let answer = answer.trim().trim_matches('"');
        if answer.is_empty() {
            return Ok(None);
        }

        let path = PathBuf::from(answer);
        if path.is_file() {
            return Ok(Some(path));
        }
        eprintln!("`{}` is not a file", path.display());
    }
}

fn confirm_overwrite(path: &Path) -> Result<bool> {
    Confirm::new()
        .with_prompt(format!(
            "Are you sure you want to override output file at {}",
            path.display()
        ))
        .default(false)
        .interact()
        .context("Failed to write confirmation prompt to term")
}

fn run(matches: &ArgMatches) -> Result<Flow> {
    let input = match matches.get_one::<PathBuf>("INPUT") {
        Some(path) if path.is_file() => path.clone(),
        given => {
            if let Some(path) = given {
                eprintln!("`{}` is not a file", path.display());
            }
            match prompt_for_input()? {
                Some(path) => path,
                None => return Ok(Flow::Cancelled("No input selected")),
            }
        }
    };

    let output = matches
        .get_one::<PathBuf>("output-target")
        .cloned()
        .unwrap_or_else(|| output_path_for(&input));

    if output.is_dir() {
        bail!(
            "There is a directory at {}, refusing to overwrite",
            output.display()
        );
    }

    let overwrite = if output.exists() {
        if !matches.get_flag("no-confirm-overwrite") && !confirm_overwrite(&output)? {
            return Ok(Flow::Cancelled("Cancelled"));
        }
        true
    } else {
        false
    };

    let settings = settings_from_matches(matches)?.overwrite(overwrite);
    let pipeline = Pipeline::new(settings);

    let report = pipeline
        .run(&input, &output, |stage| eprintln!("{}...", stage))
        .with_context(|| format!("Failed to process `{}`", input.display()))?;

    Ok(Flow::Done(report))
}

fn print_summary(report: &RunReport) {
    eprintln!(
        "Converted {} file(s) ({} failed, {} unsupported, {} empty), {} file(s) in the archive",
        report.count_outcome(Outcome::Converted),
        report.count_outcome(Outcome::Failed),
        report.count_outcome(Outcome::Unsupported),
        report.count_outcome(Outcome::Empty),
        report.plan.entries.len() + 1,
    );

    for result in report.results.iter().filter(|r| r.outcome == Outcome::Failed) {
        eprintln!(
            "warning: `{}` could not be converted and was kept as is",
            display_relative(&result.source)
        );
    }
    for container in &report.extract.failed {
        eprintln!(
            "warning: `{}` could not be expanded and was kept as is",
            display_relative(container)
        );
    }
    for name in &report.extract.unsafe_entries {
        eprintln!("warning: skipped unsafe archive entry `{}`", name);
    }
    if let Some(warning) = &report.cleanup_warning {
        eprintln!("warning: {}", warning);
    }
}

fn init_logging(occurrences: u8) {
    let level = match occurrences {
        0 => return,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if let Err(e) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_count("verbose"));

    match run(&matches) {
        Ok(Flow::Done(report)) => {
            print_summary(&report);
            println!("{}", report.archive.display());
        }
        Ok(Flow::Cancelled(reason)) => {
            eprintln!("{}", reason);
            exit(EXIT_CANCELLED);
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit(1);
        }
    }
}
