//! pw-allaudio binary
//!
//! One discovery/wiring pass: connect, resolve the default devices, create
//! the virtual capture device, link it to both defaults, then hand off to
//! the recorder and exit with its status. Status lines go to stdout;
//! diagnostics go to stderr via tracing (`RUST_LOG` to adjust).

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use pw_allaudio::{
    collect_ports, create_links, plan_links, port_ids, provision, resolve_nodes, run_command,
    wait_for_ports, DefaultNames, Launch, Session, VirtualDeviceSpec,
};
use tracing_subscriber::EnvFilter;

/// Bound on every wait for the server to announce something. Each pump is a
/// full core roundtrip, so exhausting this means the server dropped the
/// request rather than being slow.
const PUMP_BUDGET: u32 = 64;

#[derive(Parser)]
#[command(name = "pw-allaudio", version, about = "Record everything: wires the default sink and source into one virtual capture device, then launches a recorder")]
struct Cli {
    /// Recorder executable to launch once wiring is complete
    command: PathBuf,

    /// Arguments forwarded verbatim to the recorder
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    // Usage errors must exit 1 with the usage line on stderr; help and
    // version keep clap's exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => process::exit(0),
                _ => process::exit(1),
            }
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let session = Session::connect()?;
    // The first pump dispatches everything already announced; binding the
    // metadata stores happens during that dispatch, so their property events
    // arrive one roundtrip later. The second pump collects them. Not a wait
    // on content: zero metadata stores is a defined degraded state.
    session.pump()?;
    session.pump()?;

    let names = DefaultNames::from_metadata(&session.metadata());
    println!("Default Sink\t\t: {}", names.sink);
    println!("Default Source\t\t: {}", names.source);

    let nodes = resolve_nodes(&session.mirror(), &names)?;
    println!("Sink Node\t\t: {}", nodes.sink);
    println!("Source Node\t\t: {}", nodes.source);

    let device = provision(&session, &VirtualDeviceSpec::default(), PUMP_BUDGET)?;
    println!("Virtual Device Node\t: {}", device.id());

    wait_for_ports(&session, device.id(), PUMP_BUDGET)?;

    let buckets = collect_ports(&session.mirror(), nodes.source, nodes.sink, device.id());
    println!("Sink Ports\t\t: {:?}", port_ids(&buckets.sink));
    println!("Source Ports\t\t: {:?}", port_ids(&buckets.source));
    println!("Virtual Device Ports\t: {:?}", port_ids(&buckets.virtual_device));

    let requests = plan_links(&buckets);
    let links = create_links(&session, &requests)?;
    // One more pump so the diagnostic listing shows bound ids.
    session.pump()?;
    let link_ids: Vec<u32> = links.iter().map(|l| l.id().unwrap_or(0)).collect();
    println!("Link-Factories\t\t: {:?}", link_ids);

    let launch = Launch {
        command: cli.command,
        args: cli.args,
    };
    println!("Arguments\t\t: {:?}", launch.argv());

    // The session, virtual device and link proxies stay alive across the
    // child's lifetime so the wiring persists while it records.
    let code = run_command(&launch)?;
    Ok(code)
}
