use clap::{Args, Parser, Subcommand};
use smu_sweep::config::{AppConfig, SweepSettings};
use smu_sweep::logging::init_logger;
use smu_sweep::transport::list_ports;
use smu_sweep::{plot, Connector, Session, SessionError, SimulatorConnector};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

// Real instruments need a moment after the port opens before they listen.
const STABILIZE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "sweep_cli", version, about = "Source-measure unit sweep utility")]
struct Cli {
    /// TOML file with session and sweep defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, e.g. /dev/ttyUSB0 or COM4
    #[arg(long, global = true)]
    port: Option<String>,

    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Per-line read timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Give up on a response after this many lines
    #[arg(long, global = true)]
    max_response_lines: Option<usize>,

    /// Log every command and response
    #[arg(long, global = true)]
    echo: bool,

    /// Talk to a simulated instrument instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Send one command
    Send {
        command: String,
        /// Read and print the response afterwards
        #[arg(long)]
        read: bool,
    },
    /// Run a voltage sweep and save the result
    Sweep(SweepArgs),
    /// Type commands by hand
    Interactive,
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[arg(long, allow_negative_numbers = true)]
    start: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    stop: Option<f64>,
    #[arg(long)]
    steps: Option<usize>,
    /// Result file name prefix
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    settle_ms: Option<u64>,
    /// Show an I-V chart when the sweep is done
    #[arg(long)]
    plot: bool,
    /// Chart title
    #[arg(long, default_value = "I-V sweep")]
    title: String,
    /// Also save the I-V chart as a PNG image
    #[arg(long)]
    png: Option<PathBuf>,
}

impl SweepArgs {
    fn apply(&self, settings: &mut SweepSettings) {
        if let Some(v) = self.start {
            settings.start_voltage = v;
        }
        if let Some(v) = self.stop {
            settings.stop_voltage = v;
        }
        if let Some(n) = self.steps {
            settings.steps = n;
        }
        if let Some(p) = &self.prefix {
            settings.filename_prefix = p.clone();
        }
        if let Some(d) = &self.output_dir {
            settings.output_dir = d.clone();
        }
        if let Some(ms) = self.settle_ms {
            settings.settle_ms = ms;
        }
    }
}

// The main entry point for the sweep front end.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    apply_session_flags(&cli, &mut config);

    if let Some(Commands::Ports) = cli.command {
        print_ports()?;
        return Ok(());
    }

    if cli.simulate {
        let port = config.session.port.clone().unwrap_or_else(|| String::from("SIM"));
        let session = Session::with_connector(
            config.session.to_session_config(&port),
            SimulatorConnector::default(),
        );
        return dispatch(session, cli.command, config.sweep, Duration::ZERO);
    }

    let port = match config.session.port.clone() {
        Some(port) => port,
        None => match select_port()? {
            Some(port) => port,
            None => return Ok(()),
        },
    };
    let session = Session::new(config.session.to_session_config(&port));
    dispatch(session, cli.command, config.sweep, STABILIZE)
}

fn apply_session_flags(cli: &Cli, config: &mut AppConfig) {
    let session = &mut config.session;
    if let Some(port) = &cli.port {
        session.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        session.baud_rate = baud;
    }
    if let Some(ms) = cli.timeout_ms {
        session.timeout_ms = ms;
    }
    if let Some(n) = cli.max_response_lines {
        session.max_response_lines = Some(n);
    }
    if cli.echo {
        session.echo = true;
    }
}

fn dispatch<C: Connector>(
    mut session: Session<C>,
    command: Option<Commands>,
    mut sweep: SweepSettings,
    stabilize: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Some(Commands::Ports) => print_ports()?,
        Some(Commands::Send { command, read }) => {
            session.scoped(|s| {
                thread::sleep(stabilize);
                s.send(&command)?;
                if read {
                    let response = s.read_response()?;
                    println!("Response: {}", String::from_utf8_lossy(&response).trim_end());
                }
                Ok(())
            })?;
        }
        Some(Commands::Sweep(args)) => {
            args.apply(&mut sweep);
            let charts = Charts {
                title: args.plot.then_some(args.title.as_str()),
                png: args.png.as_deref(),
            };
            run_sweep(&mut session, &sweep, stabilize, &charts)?;
        }
        Some(Commands::Interactive) => {
            session.scoped(|s| {
                thread::sleep(stabilize);
                run_manual_mode(s)
            })?;
        }
        None => run_menu(&mut session, &sweep, stabilize)?,
    }
    Ok(())
}

// What to draw once a sweep is done.
struct Charts<'a> {
    /// Terminal chart title; `None` skips the viewer.
    title: Option<&'a str>,
    png: Option<&'a Path>,
}

fn run_sweep<C: Connector>(
    session: &mut Session<C>,
    settings: &SweepSettings,
    stabilize: Duration,
    charts: &Charts,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = settings.to_plan();
    println!(
        "Sweeping {} V to {} V in {} steps on {}",
        plan.start_voltage,
        plan.stop_voltage,
        plan.steps,
        session.config().port
    );

    let result = session.scoped(|s| {
        thread::sleep(stabilize);
        s.sweep(&plan)
    })?;

    println!("{:>14} {:>14}", "Voltage (V)", "Current (A)");
    for row in result.as_array() {
        println!("{:>14.6e} {:>14.6e}", row[0], row[1]);
    }
    println!("Saved to {}", result.file.display());

    if let Some(path) = charts.png {
        plot::save_png(path, &result.samples)?;
        println!("Chart saved to {}", path.display());
    }
    if let Some(title) = charts.title {
        plot::show_sweep(title, &result.samples)?;
    }
    Ok(())
}

// Main menu loop, used when no subcommand is given.
fn run_menu<C: Connector>(
    session: &mut Session<C>,
    sweep: &SweepSettings,
    stabilize: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=========================");
    println!("     SMU Sweep Utility   ");
    println!("=========================");
    println!("Instrument port: {}", session.config().port);

    loop {
        println!("\nSelect mode:");
        println!("  1. Manual Command Input");
        println!("  2. Run Voltage Sweep");
        println!("  3. Exit");

        let choice = prompt("> ")?;
        let outcome: Result<(), Box<dyn std::error::Error>> = match choice.trim() {
            "1" => session
                .scoped(|s| {
                    thread::sleep(stabilize);
                    run_manual_mode(s)
                })
                .map_err(Into::into),
            "2" => run_sweep(
                session,
                sweep,
                stabilize,
                &Charts { title: Some("I-V sweep"), png: None },
            ),
            // A bare Enter or end of input leaves the menu.
            "3" | "" => break,
            _ => {
                eprintln!("[ERROR] Invalid choice. Please enter 1, 2, or 3.");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            eprintln!("[ERROR] {}", e);
        }
    }
    Ok(())
}

// Handles the manual command input mode.
fn run_manual_mode<C: Connector>(session: &mut Session<C>) -> Result<(), SessionError> {
    println!("\n--- Manual Mode ---");
    println!("Enter commands, or type 'back' to return.");
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line?;
        let command = input.trim();

        if command == "back" || command == "exit" {
            break;
        }

        if !command.is_empty() {
            session.send(command)?;
            if command.ends_with('?') {
                let response = session.read_response()?;
                println!("< {}", String::from_utf8_lossy(&response).trim_end());
            }
        }

        print!("> ");
        io::stdout().flush()?;
    }
    Ok(())
}

fn print_ports() -> Result<(), serialport::Error> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

// Lists ports and asks which one to use. `None` means there was nothing to pick.
fn select_port() -> Result<Option<String>, Box<dyn std::error::Error>> {
    let ports = list_ports()?;
    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return Ok(None);
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }

    let choice = prompt("Select a port (number): ")?;
    match choice.trim().parse::<usize>() {
        Ok(i) if i < ports.len() => Ok(Some(ports[i].port_name.clone())),
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            Ok(None)
        }
    }
}

fn prompt(message: &str) -> io::Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input)
}
