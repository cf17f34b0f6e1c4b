use std::convert::TryFrom;
use std::process::exit;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{crate_version, App as ClapApp, Arg, ArgMatches};
use env_logger::Env;
use serde::Serialize;
use serde_json::json;
use tokio::runtime::Runtime;

use icapi::{Config, IcApiTransport};
use icapi_client::asynced::AsyncSession;
use icapi_client::data::get_trace_data_by_index;
use icapi_client::loopback::LoopbackServer;
use icapi_client::protocol::{MeasureState, ServerAction, TimingInfo};
use icapi_client::{Session, Transport};

const SIMULATED_CYCLE: Duration = Duration::from_millis(250);

fn app() -> ClapApp<'static> {
    ClapApp::new("icapi")
        .version(crate_version!())
        .about("Query and control the instrument server of a PTR mass spectrometer")
        .arg(
            Arg::new("address")
                .long("address")
                .short('a')
                .takes_value(true)
                .help("Address of the instrument server."),
        )
        .arg(
            Arg::new("library")
                .long("library")
                .takes_value(true)
                .help("Path to the IcAPI library."),
        )
        .arg(
            Arg::new("runtime")
                .long("runtime")
                .takes_value(true)
                .help("Path to the LabVIEW runtime, used to release string handles."),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .help("JSON config file."),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .short('t')
                .takes_value(true)
                .help("Timeout of polls in milliseconds."),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .help("Talk to a simulated server instead of loading the library."),
        )
        .arg(Arg::new("verbose").long("verbose").short('v').help("Log verbose output"))
        .subcommand(ClapApp::new("version").about("Version of the interface library"))
        .subcommand(ClapApp::new("state").about("Measure and server state"))
        .subcommand(
            ClapApp::new("action")
                .about("Send a server action, by name or number")
                .arg(Arg::new("action").required(true)),
        )
        .subcommand(ClapApp::new("peaks").about("Number of peaks and timebins"))
        .subcommand(
            ClapApp::new("masses").about("Masses of the peak table").arg(
                Arg::new("set")
                    .long("set")
                    .takes_value(true)
                    .multiple_values(true)
                    .help("Replace the peak table with the given masses."),
            ),
        )
        .subcommand(ClapApp::new("spectrum").about("The current spectrum"))
        .subcommand(ClapApp::new("traces").about("Raw, corrected and concentration traces"))
        .subcommand(
            ClapApp::new("trace").about("Traces of the next cycle").arg(
                Arg::new("type")
                    .long("type")
                    .takes_value(true)
                    .default_value("0")
                    .help("0 (raw), 1 (corrected) or 2 (concentration)"),
            ),
        )
        .subcommand(ClapApp::new("next").about("Wait for the next cycle"))
        .subcommand(
            ClapApp::new("poll").about("Poll spectra of consecutive cycles").arg(
                Arg::new("count")
                    .long("count")
                    .short('n')
                    .takes_value(true)
                    .default_value("10"),
            ),
        )
        .subcommand(ClapApp::new("full-cycle").about("Everything published for the next cycle"))
        .subcommand(ClapApp::new("primary-ion").about("The active primary ion"))
        .subcommand(ClapApp::new("transmission").about("The active transmission curve"))
        .subcommand(
            ClapApp::new("filename").about("The current data file").arg(
                Arg::new("set")
                    .long("set")
                    .takes_value(true)
                    .help("Set the name of the next automatically named file."),
            ),
        )
        .subcommand(ClapApp::new("add-data").about("Names and values of the add-data"))
        .subcommand(
            ClapApp::new("parameter")
                .about("Read an instrument parameter")
                .arg(Arg::new("name").required(true)),
        )
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn timing_json(timing: &TimingInfo) -> serde_json::Value {
    json!({
        "cycle": timing.cycle,
        "cycle_overall": timing.cycle_overall,
        "abs_time": timing.abs_time,
        "rel_time": timing.rel_time,
        "time": timing.datetime().map(|x| x.to_rfc3339()),
    })
}

fn parse_action(arg: &str) -> anyhow::Result<ServerAction> {
    if let Some(action) = ServerAction::from_name(arg) {
        return Ok(action);
    }
    let raw: u16 = arg
        .parse()
        .map_err(|_| anyhow!("Unknown server action `{}`", arg))?;
    Ok(ServerAction::try_from(raw)?)
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| anyhow!("Missing argument `{}`", name))
}

fn poll<T: Transport + 'static>(session: Session<T>, count: usize) -> anyhow::Result<()> {
    let timeout = session.options.timeout();
    let rt = Runtime::new()?;
    let session = AsyncSession::spawn(session);
    rt.block_on(async move {
        let mut received = 0;
        while received < count {
            match session.next_spectrum(timeout).await {
                Ok((timing, spectrum)) => {
                    received += 1;
                    print(&json!({
                        "timing": timing_json(&timing),
                        "timebins": spectrum.len(),
                        "total": spectrum.iter().map(|x| *x as f64).sum::<f64>(),
                    }))?;
                }
                Err(err) if err.is_timeout() => log::debug!("No new cycle within {:?}", timeout),
                Err(err) => return Err(err.into()),
            }
        }
        session.disconnect();
        Ok::<(), anyhow::Error>(())
    })
}

fn run<T: Transport + 'static>(mut s: Session<T>, matches: &ArgMatches) -> anyhow::Result<()> {
    let timeout = s.options.timeout();
    match matches.subcommand() {
        Some(("version", _)) => print(&s.version()?),
        Some(("state", _)) => print(&json!({
            "measure_state": s.measure_state()?,
            "server_state": s.server_state()?,
        })),
        Some(("action", m)) => {
            let action = parse_action(arg(m, "action")?)?;
            s.set_server_action(action)?;
            Ok(())
        }
        Some(("peaks", _)) => print(&json!({
            "peaks": s.number_of_peaks()?,
            "timebins": s.number_of_timebins()?,
        })),
        Some(("masses", m)) => {
            if let Some(values) = m.values_of("set") {
                let masses = values
                    .map(|x| x.parse::<f32>().with_context(|| format!("Invalid mass `{}`", x)))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                s.set_trace_masses(&masses)?;
            }
            print(&s.trace_masses()?)
        }
        Some(("spectrum", _)) => {
            let (timing, spectrum) = s.current_spectrum()?;
            print(&json!({"timing": timing_json(&timing), "spectrum": spectrum}))
        }
        Some(("traces", _)) => print(&s.traces(timeout)?),
        Some(("trace", m)) => {
            let index: i32 = arg(m, "type")?
                .parse()
                .context("Trace type must be an integer")?;
            let addr = s.address().to_string();
            let (timing, data) = get_trace_data_by_index(s.transport_mut(), &addr, timeout, index)?;
            print(&json!({"timing": timing_json(&timing), "data": data}))
        }
        Some(("next", _)) => print(&timing_json(&s.next_timecycle(timeout)?)),
        Some(("poll", m)) => {
            let count: usize = arg(m, "count")?.parse().context("Invalid count")?;
            poll(s, count)
        }
        Some(("full-cycle", _)) => print(&s.next_full_cycle(timeout)?),
        Some(("primary-ion", _)) => print(&s.current_primary_ion()?),
        Some(("transmission", _)) => print(&s.current_transmission()?),
        Some(("filename", m)) => {
            if let Some(name) = m.value_of("set") {
                s.set_auto_data_filename(name)?;
            }
            print(&s.current_data_filename()?)
        }
        Some(("add-data", _)) => {
            let names = s.add_data_names()?;
            let (abs_time, values) = s.add_data_values()?;
            print(&json!({"abs_time": abs_time, "names": names, "values": values}))
        }
        Some(("parameter", m)) => print(&s.parameter(arg(m, "name")?)?),
        _ => Err(anyhow!("No command given, see --help")),
    }
}

fn simulated_server() -> LoopbackServer {
    let server = LoopbackServer::new();
    server.set_measure_state(MeasureState::MeasurementActive);
    let pusher = server.clone();
    thread::spawn(move || loop {
        thread::sleep(SIMULATED_CYCLE);
        pusher.push_cycle();
    });
    server
}

fn run_main() -> anyhow::Result<()> {
    let matches = app().get_matches();

    let verbose = matches.is_present("verbose");
    if verbose {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("icapi=debug,icapi_client=debug"),
        )
        .init();
    } else {
        env_logger::init();
    }

    let mut config = match matches.value_of("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(address) = matches.value_of("address") {
        config.address = address.to_string();
    }
    if let Some(library) = matches.value_of("library") {
        config.library.path = library.into();
    }
    if let Some(runtime) = matches.value_of("runtime") {
        config.library.runtime = Some(runtime.into());
    }
    if let Some(timeout) = matches.value_of("timeout") {
        config.session.timeout_ms = timeout
            .parse()
            .with_context(|| format!("Cannot parse `{}` as a timeout.", timeout))?;
    }
    log::debug!("Using {:?}", config);

    if matches.is_present("simulate") {
        let server = simulated_server();
        let session = Session::with_options(server.transport(), config.address, config.session)?;
        run(session, &matches)
    } else {
        let transport = IcApiTransport::open(&config.library)?;
        let session = Session::with_options(transport, config.address, config.session)?;
        run(session, &matches)
    }
}

fn main() {
    if let Err(err) = run_main() {
        eprintln!("Error: {:#}", err);
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_by_name_or_number() {
        assert_eq!(parse_action("StartMeasQuick").unwrap(), ServerAction::StartMeasQuick);
        assert_eq!(parse_action("2").unwrap(), ServerAction::StopMeasurement);
        assert!(parse_action("99").is_err());
        assert!(parse_action("Launch").is_err());
    }

    #[test]
    fn command_line() {
        let matches = app()
            .try_get_matches_from(vec!["icapi", "--simulate", "masses", "--set", "21.0", "59.0"])
            .unwrap();
        assert!(matches.is_present("simulate"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "masses");
        assert_eq!(sub.values_of("set").unwrap().count(), 2);
    }

    #[test]
    fn simulated_commands() {
        let server = LoopbackServer::new();
        let session = Session::new(server.transport(), "localhost").unwrap();
        let matches = app()
            .try_get_matches_from(vec!["icapi", "masses", "--set", "21.0", "59.0"])
            .unwrap();
        run(session, &matches).unwrap();
        assert_eq!(server.calls(), 3);
    }
}
