use cipdip_capture::{list_capture_interfaces, EgressResolver, SubnetEgressResolver};
use cipdip_cli::{exit_code, log_level, write_report, Cli, RunArtifacts, EXIT_FAILURE, EXIT_SUCCESS};
use cipdip_core::{Error, Interface, Result};
use cipdip_replay::{
    render_text, DatalinkSink, PcapResponseTap, PnetArpProbe, ReplayComponents, ReplayConfig, ReplayEngine,
    ResponseTap,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    ExitCode::from(runtime.block_on(run(cli)))
}

async fn run(cli: Cli) -> u8 {
    if cli.list_interfaces {
        return match list_capture_interfaces() {
            Ok(interfaces) => {
                for iface in interfaces {
                    let addr = iface.ipv4().map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string());
                    println!("{:<16} {}  {}", iface.name, iface.mac_address, addr);
                }
                EXIT_SUCCESS
            }
            Err(e) => fail(&e),
        };
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };
    let engine = match ReplayEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => return fail(&e),
    };
    if let Err(e) = engine.config().resolve_input() {
        return fail(&e);
    }
    let components = match live_components(engine.config()) {
        Ok(components) => components,
        Err(e) => return fail(&e),
    };

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current frame");
            cancel.cancel();
        }
    });

    let report = engine.execute(components).await;
    let code = report.failure.as_ref().map_or(EXIT_SUCCESS, exit_code);
    print!("{}", render_text(&report.stats));

    if let Some(path) = &cli.report {
        if let Err(e) = write_report(path, &report.stats) {
            warn!(path = %path.display(), error = %e, "Could not write report");
        }
    }
    if let Some(root) = &cli.out_dir {
        let failure = report.failure.as_ref().map(|e| e.to_string());
        let written = RunArtifacts::create(root, &report.stats).and_then(|artifacts| {
            artifacts.write_summary(&report.stats, engine.config(), failure, code)?;
            artifacts.write_command(&std::env::args().collect::<Vec<_>>())?;
            Ok(artifacts)
        });
        match written {
            Ok(artifacts) => info!(dir = %artifacts.dir().display(), "Run artifacts written"),
            Err(e) => warn!(error = %e, "Could not write run artifacts"),
        }
    }
    code
}

/// Egress interface, ARP probe, datalink sender and response tap
fn live_components(config: &ReplayConfig) -> Result<ReplayComponents> {
    let interface = match (&config.interface, config.arp_target()) {
        (Some(name), _) => Interface::by_name(name)?,
        (None, Some(target)) => SubnetEgressResolver::from_system()?.resolve_egress(target)?,
        (None, None) => {
            return Err(Error::invalid_parameter(
                "iface",
                "no --iface given and no server or ARP target to pick one from",
            ))
        }
    };
    info!(interface = %interface.name, mac = %interface.mac_address, "Using egress interface");

    let mut probe = PnetArpProbe::new(interface.clone());
    if let Some(client_ip) = config.client_ip {
        probe = probe.with_sender_ip(client_ip);
    }
    let tap = config.include_responses.then(|| {
        Box::new(PcapResponseTap::for_config(&interface.name, config)) as Box<dyn ResponseTap>
    });

    Ok(ReplayComponents {
        probe: Some(Arc::new(probe)),
        sink: Box::new(DatalinkSink::open(&interface)?),
        tap,
    })
}

fn fail(e: &Error) -> u8 {
    error!(error = %e, "Replay not started");
    exit_code(e)
}
