use clap::{Parser, Subcommand};
use navira_cardex::{IndexConfig, IndexFormat};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

mod commands;

use commands::CliError;

/// `cardex` builds CARv2 indexes for CAR files, and inspects or queries them
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = None,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the CAR file (v1 or v2) to index
    #[arg(required = true)]
    car: Option<PathBuf>,

    /// Index format: IndexSorted or MultihashIndexSorted
    #[arg(short, long, default_value_t = IndexFormat::MultihashIndexSorted)]
    format: IndexFormat,

    /// Path of the index file to write
    /// Default: the CAR path with `.idx` appended
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every entry of an index file
    Inspect {
        /// Path to the index file
        index: PathBuf,

        /// Print some more info (entry count)
        #[arg(long)]
        verbose: bool,
    },
    /// Print the section offset of a block
    Lookup {
        /// Path to the index file
        index: PathBuf,

        /// Multihash (or CID) of the block, in hexadecimal
        multihash: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging();

    let stdout = std::io::stdout();
    match run(args, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args, out: &mut impl Write) -> Result<(), CliError> {
    match args.command {
        Some(Command::Inspect { index, verbose }) => commands::inspect(&index, verbose, out),
        Some(Command::Lookup { index, multihash }) => {
            let offset = commands::lookup(&index, &multihash)?;
            writeln!(out, "{}", offset).map_err(CliError::Output)
        }
        None => {
            let Some(car) = args.car else {
                unreachable!("clap requires the CAR argument when no subcommand is given");
            };
            let output = args.output.unwrap_or_else(|| commands::default_output(&car));
            commands::build(&car, &output, IndexConfig::new(args.format))?;
            Ok(())
        }
    }
}

fn setup_logging() {
    use tracing_subscriber::FmtSubscriber;

    const DEFAULT_LOGGING: &str = "cardex=info,navira_cardex=info,warn";

    let rust_log = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| if s.is_empty() { None } else { Some(s) })
        .unwrap_or_else(|| DEFAULT_LOGGING.to_owned());

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_env_filter(rust_log)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .expect("tracing setup failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    const CAR_V1: &[u8] = include_bytes!("../../../libs/navira-cardex/src/res/carv1-basic.car");

    #[test]
    fn test_args_build() {
        let args = Args::try_parse_from(["cardex", "my.car"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.car, Some(PathBuf::from("my.car")));
        assert_eq!(args.format, IndexFormat::MultihashIndexSorted);
        assert_eq!(args.output, None);

        let args = Args::try_parse_from(["cardex", "my.car", "-f", "IndexSorted", "-o", "out.idx"])
            .unwrap();
        assert_eq!(args.format, IndexFormat::IndexSorted);
        assert_eq!(args.output, Some(PathBuf::from("out.idx")));
    }

    #[test]
    fn test_args_missing_car() {
        assert!(Args::try_parse_from(["cardex"]).is_err());
        assert!(Args::try_parse_from(["cardex", "-f", "IndexSorted"]).is_err());
    }

    #[test]
    fn test_args_invalid_format() {
        assert!(Args::try_parse_from(["cardex", "my.car", "--format", "CarIndex"]).is_err());
    }

    #[test]
    fn test_args_subcommands() {
        let args = Args::try_parse_from(["cardex", "inspect", "my.car.idx", "--verbose"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Inspect { verbose: true, .. })
        ));
        let args = Args::try_parse_from(["cardex", "lookup", "my.car.idx", "1220ab"]).unwrap();
        assert!(matches!(args.command, Some(Command::Lookup { .. })));
    }

    #[test]
    fn test_run_build_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let car = dir.path().join("basic.car");
        std::fs::write(&car, CAR_V1).unwrap();

        let args = Args::try_parse_from([
            OsStr::new("cardex"),
            car.as_os_str(),
            OsStr::new("-f"),
            OsStr::new("IndexSorted"),
        ])
        .unwrap();
        let mut out = Vec::new();
        run(args, &mut out).unwrap();
        assert!(out.is_empty());

        let index = dir.path().join("basic.car.idx");
        let args = Args::try_parse_from([
            OsStr::new("cardex"),
            OsStr::new("lookup"),
            index.as_os_str(),
            OsStr::new("122081cc5b17018674b401b42f35ba07bb79e211239c23bffe658da1577e3e646877"),
        ])
        .unwrap();
        run(args, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "496\n");
    }
}
