use clap::{Parser, Subcommand};
use dap_bridge::config::load_settings;
use dap_bridge::console::{Console, RunOptions, parse_location, run_program};
use dap_bridge::ops::LaunchConfig;
use dap_bridge::registry::SessionRegistry;
use dap_bridge::session::DelveConnector;
use std::path::PathBuf;
use tokio::io::{BufReader, stdin, stdout};

/// Drive Go debugging sessions through a DAP backend (dlv dap)
#[derive(Parser)]
#[command(name = "dap-bridge")]
#[command(version)]
#[command(about = "Drive Go debugging sessions through a DAP backend (dlv dap)")]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/dap-bridge/dap-bridge.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter, overriding RUST_LOG (e.g. debug, dap_bridge::session=trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive command loop over stdin/stdout (default)
    Console,
    /// Launch a program, set breakpoints, finish configuration and print threads
    Run {
        /// Package directory, .go file, test file or pre-built binary
        program: String,

        /// Line breakpoint as file:line (repeatable)
        #[arg(long = "break", value_name = "FILE:LINE")]
        breakpoints: Vec<String>,

        /// Function breakpoint (repeatable)
        #[arg(long = "func", value_name = "NAME")]
        functions: Vec<String>,

        /// Stop as soon as the program starts
        #[arg(long)]
        stop_on_entry: bool,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn init_logging(level: Option<&str>) {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.format_timestamp_millis().init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let settings = load_settings(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    });

    let connector = DelveConnector::new(settings.backend.clone());
    let registry = SessionRegistry::new(connector, settings.session.clone());

    let result = match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => {
            let mut output = stdout();
            Console::new(&registry)
                .run(BufReader::new(stdin()), &mut output)
                .await
        }
        Commands::Run {
            program,
            breakpoints,
            functions,
            stop_on_entry,
            args,
        } => {
            let breakpoints = breakpoints
                .iter()
                .map(|location| parse_location(location))
                .collect::<Result<Vec<_>, _>>()
                .unwrap_or_else(|e| {
                    eprintln!("Error: {}", e);
                    std::process::exit(2);
                });
            let options = RunOptions {
                launch: LaunchConfig {
                    args,
                    stop_on_entry,
                    ..LaunchConfig::new(program)
                },
                breakpoints,
                functions,
                client_id: None,
            };
            let mut output = stdout();
            run_program(&registry, options, &mut output).await
        }
    };

    registry.shutdown().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
