//! This crate defines the command line interface for the analyzer.
//! General documentation is contained in the [`kint_lib`] crate.

use anyhow::{Context as _, Error};
use clap::Parser;
use kint_lib::checkers::Config;
use kint_lib::pipeline;
use kint_lib::utils::log::{print_all_messages, LogLevel, LogThread};
use kint_lib::utils::read_config_file;

#[derive(Debug, Parser)]
#[command(version, about)]
/// Find integer overflows on untrusted paths in typed-SSA IR modules
struct CmdlineArgs {
    /// The paths to the IR module files.
    #[arg(required = true, value_parser = check_file_existence)]
    modules: Vec<String>,

    /// Path to a custom configuration file to use instead of the standard one.
    #[arg(long, short, value_parser = check_file_existence)]
    config: Option<String>,

    /// Write the results to a file instead of stdout.
    /// This only affects bug reports. Log messages are still printed to stdout.
    #[arg(long, short)]
    out: Option<String>,

    /// Generate JSON output.
    #[arg(long, short)]
    json: bool,

    /// Do not print log messages. This prevents polluting stdout for json output.
    #[arg(long, short)]
    quiet: bool,

    /// Print additional debug log messages.
    #[arg(long, short, conflicts_with("quiet"))]
    verbose: bool,

    /// Dump the global taint map after the analysis.
    #[arg(long)]
    dump_taint: bool,

    /// Dump the flow-insensitive range summaries after the analysis.
    #[arg(long)]
    dump_range: bool,
}

fn main() -> Result<(), Error> {
    let args = CmdlineArgs::parse();

    let config: Config = if let Some(ref config_path) = args.config {
        let file = std::io::BufReader::new(
            std::fs::File::open(config_path).context("Could not open configuration file")?,
        );
        serde_json::from_reader(file).context("Parsing of the configuration file failed")?
    } else if let Ok(value) = read_config_file("config.json") {
        serde_json::from_value(value).context("Parsing of the configuration file failed")?
    } else {
        Config::default()
    };

    let mut project = pipeline::load_project(&args.modules)?;

    let log_thread = LogThread::spawn(LogThread::collect_and_deduplicate);
    let (ctx, _reports) = pipeline::run_analysis(&mut project, &config, &log_thread.get_msg_sender());

    if args.dump_taint {
        for (id, (descriptors, is_source)) in ctx.taints.iter() {
            let descriptors: Vec<&str> = descriptors.iter().map(|d| d.as_str()).collect();
            println!(
                "{} {}\t{}",
                if *is_source { "S" } else { " " },
                id,
                descriptors.join(" ")
            );
        }
    }
    if args.dump_range {
        for (id, range) in &ctx.int_ranges {
            println!("{id}\t{range}");
        }
    }

    let (mut logs, bugs) = log_thread.collect();
    if args.quiet {
        logs = Vec::new();
    } else if !args.verbose {
        logs.retain(|log| log.level != LogLevel::Debug);
    }
    print_all_messages(logs, bugs, args.out.as_deref(), args.json);
    Ok(())
}

/// Return `Ok(file_path)` only if `file_path` points to an existing file.
fn check_file_existence(file_path: &str) -> Result<String, String> {
    if std::fs::metadata(file_path)
        .map_err(|err| format!("{err}"))?
        .is_file()
    {
        Ok(file_path.to_string())
    } else {
        Err(format!("{file_path} is not a file."))
    }
}
