//! xtmask command-line frontend

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::{env, panic, path::PathBuf, process};
use xtmask::api::{self, ParseOptions};
use xtmask::exit_codes::{EXIT_PANIC, EXIT_SUCCESS};
use xtmask::logger::is_json_logging;
use xtmask::utils::is_env_true;
use xtmask::xt::{
    self, AccountFiles, CredentialLookup, DeviceGroups, ExtensionContext, NumericCredentials,
    lmap::DEFAULT_DEVGROUPS_PATH,
};
use xtmask::{Result, XtError};

const VERSION: &str = xtmask::version::VERSION;

#[derive(Parser, Debug)]
#[command(
    version = VERSION,
    about = "Encode and decode packet-filter extension records",
    disable_help_subcommand = true
)]
struct Args {
    /// Log level (trace, debug, info, warn, error, json:<level>)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Device group map used for rpfilter --devgroup names
    #[arg(long, global = true, default_value = DEFAULT_DEVGROUPS_PATH)]
    devgroups: PathBuf,

    /// Resolve socket --user/--group names from /etc/passwd and /etc/group
    #[arg(long, global = true)]
    resolve_names: bool,

    /// Print numbers instead of names
    #[arg(short, long, global = true)]
    numeric: bool,

    /// Emit JSON instead of text (also XTMASK_JSON=1)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse extension options into a kernel record
    Parse {
        /// Extension name, e.g. MARK or socket
        extension: String,

        /// Record revision (defaults to the latest)
        #[arg(short, long)]
        revision: Option<u8>,

        /// Extension options, e.g. --set-xmark 0x10/0x1f
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },

    /// Decode a hex kernel record into rule text
    Show {
        extension: String,
        record: String,
        #[arg(short, long)]
        revision: Option<u8>,
    },

    /// Translate a hex kernel record to nftables syntax
    Xlate {
        extension: String,
        record: String,
        #[arg(short, long)]
        revision: Option<u8>,
    },

    /// Show the options of one extension
    Help {
        extension: String,
        #[arg(short, long)]
        revision: Option<u8>,
    },

    /// List every registered extension revision
    List,
}

fn main() {
    // Set up panic handler to return specific exit code
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {}", panic_info);
        process::exit(EXIT_PANIC);
    }));

    let result = panic::catch_unwind(run);

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(_) => {
            eprintln!("Fatal: Unhandled panic in xtmask");
            process::exit(EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    // Handle --version before clap
    if env::args().nth(1).as_deref() == Some("--version") {
        println!("xtmask {}", xtmask::version::full_version());
        return EXIT_SUCCESS;
    }

    let mut args = Args::parse();
    args.json |= is_env_true("XTMASK_JSON");

    if let Some(ref level) = args.log_level {
        xtmask::logger::JsonLogger::init_with_level(level, "CLI --log-level");
    } else {
        xtmask::logger::JsonLogger::init();
    }

    match execute(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            log::debug!("❌ Command failed: {e:?}");
            if is_json_logging() {
                log::error!("❌ {}", e);
            } else {
                eprintln!("xtmask: {}", e);
            }
            e.exit_code()
        }
    }
}

fn context(args: &Args) -> Result<ExtensionContext> {
    let devgroups = DeviceGroups::load_optional(&args.devgroups).map(Arc::new);
    let credentials: Arc<dyn CredentialLookup> = if args.resolve_names {
        Arc::new(AccountFiles::load_system().map_err(XtError::resource)?)
    } else {
        Arc::new(NumericCredentials)
    };
    Ok(ExtensionContext {
        devgroups,
        credentials,
    })
}

fn resolve_revision(extension: &str, revision: Option<u8>) -> Result<u8> {
    Ok(xt::lookup(extension, revision)?.revision)
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn execute(args: &Args) -> Result<()> {
    match &args.command {
        Command::Parse {
            extension,
            revision,
            options,
        } => {
            let parse_options = ParseOptions {
                context: context(args)?,
                numeric: args.numeric,
            };
            let rule = api::parse_rule(extension, *revision, options, &parse_options)?;
            emit(args.json, &rule, || {
                format!("{}\nrecord {}.{}: {}", rule.rule, rule.extension, rule.revision, rule.hex)
            })
        }
        Command::Show {
            extension,
            record,
            revision,
        } => {
            let revision = resolve_revision(extension, *revision)?;
            let bytes = hex::decode(record.trim())?;
            let view =
                api::describe_record_with(extension, revision, &bytes, args.numeric, &context(args)?)?;
            emit(args.json, &view, || view.print.trim_start().to_string())
        }
        Command::Xlate {
            extension,
            record,
            revision,
        } => {
            let revision = resolve_revision(extension, *revision)?;
            let bytes = hex::decode(record.trim())?;
            let xlate = api::translate_record(extension, revision, &bytes)?;
            match xlate {
                Some(expr) => emit(args.json, &expr, || expr.clone()),
                None => Err(XtError::Generic(format!(
                    "{extension} revision {revision} has no nftables equivalent"
                ))),
            }
        }
        Command::Help {
            extension,
            revision,
        } => {
            print!("{}", api::extension_help(extension, *revision)?);
            Ok(())
        }
        Command::List => {
            let listed = api::list_extensions();
            emit(args.json, &listed, || {
                listed
                    .iter()
                    .map(|info| {
                        let alias = if info.name == info.real_name {
                            String::new()
                        } else {
                            format!(" (alias of {})", info.real_name)
                        };
                        format!(
                            "{} {}.{}  {} bytes{}",
                            info.kind.flag(),
                            info.name,
                            info.revision,
                            info.size,
                            alias
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}
