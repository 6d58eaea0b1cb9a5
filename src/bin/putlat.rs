use clap::{crate_authors, crate_version, value_t, App, Arg, ArgMatches};
use console::style;
use putlat::connection::local::{LocalConfig, LocalTransport};
#[cfg(any(feature = "rdma", feature = "ucx"))]
use putlat::connection::side_channel::{Peer, Role, SideChannel};
use putlat::connection::RmaConnector;
use putlat::output::{file::JsonLines, report::Report};
use putlat::params::{SweepParams, MAX_MSG_SIZE};
use putlat::setup::establish;
use putlat::{CompletionPolicy, PingPong};
use std::fs::File;
use std::io::{self, BufWriter};
use std::net::IpAddr;
#[cfg(any(feature = "rdma", feature = "ucx"))]
use std::net::SocketAddr;
use std::process::exit;
use std::str::FromStr;

const DEFAULT_PORT: &str = "9003";
const DEFAULT_STEPS: &str = "0";

static CONN_TYPES: &[&str] = &["local", "rdma", "ucx"];

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let matches = app_cli_config().get_matches();
    let quiet = matches.is_present("quiet");

    if let Err(e) = run_session(&matches, quiet) {
        eprintln!("{}", style(e).red());
        exit(1)
    }
}

fn app_cli_config<'a, 'b>() -> App<'a, 'b> {
    App::new("putlat")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Measures latency of one-sided RMA puts, each followed by a flush, over message sizes from 8 B to 10 MiB")
        .arg(
            Arg::with_name("connection")
                .long("conn")
                .short("c")
                .default_value("local")
                .value_name("CONNECTION_TYPE")
                .possible_values(CONN_TYPES)
                .help("Sets the connection type"),
        )
        .arg(
            Arg::with_name("address")
                .help("Peer address for the side channel (the address to listen on with --listen). Without it the process writes into its own memory")
                .long("addr")
                .short("a")
                .takes_value(true)
                .value_name("IP_ADDR")
                .validator(|x| match IpAddr::from_str(x.as_str()) {
                    Ok(_) => Ok(()),
                    Err(_) => Err(String::from("Faulty IP adress")),
                }),
        )
        .arg(
            Arg::with_name("port")
                .help("Port of the side channel used for address and key exchange")
                .long("port")
                .short("p")
                .takes_value(true)
                .value_name("PORT")
                .default_value(DEFAULT_PORT)
                .validator(|x| match x.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err(String::from("Faulty port")),
                }),
        )
        .arg(
            Arg::with_name("steps")
                .help("Progress steps a loopback operation stays in flight")
                .long("steps")
                .short("s")
                .takes_value(true)
                .value_name("STEPS")
                .default_value(DEFAULT_STEPS)
                .validator(|x| match x.parse::<usize>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err(String::from("STEPS should be a number")),
                }),
        )
        .arg(
            Arg::from_usage("[listen] -l --listen 'Expose memory to a connecting peer instead of measuring'")
                .requires("address"),
        )
        .arg_from_usage("[strict] --strict 'Abort when a put or flush completes with an error'")
        .arg_from_usage("[quiet] -q --quiet 'Does not print the report, failures are still reported'")
        .arg_from_usage("[output] 'Output file to dump samples to, as JSON lines'")
}

fn run_session(args: &ArgMatches, quiet: bool) -> putlat::Result<()> {
    // Unwraping is ok as we have a default value
    match args.value_of("connection").unwrap() {
        "rdma" => rdma_session(args, quiet),
        "ucx" => ucx_session(args, quiet),
        _ => {
            // validated by clap
            let steps = value_t!(args.value_of("steps"), usize).unwrap();
            let mut conn = establish(LocalTransport::new(LocalConfig::new(steps)), MAX_MSG_SIZE)?;
            do_measurements(&mut conn, args, quiet)
        }
    }
}

#[cfg(any(feature = "rdma", feature = "ucx"))]
fn side_channel(args: &ArgMatches) -> putlat::Result<SideChannel> {
    let role = match args.value_of("address") {
        None => Role::Loopback,
        Some(ip) => {
            // validated by clap
            let ip = IpAddr::from_str(ip).unwrap();
            let port = value_t!(args.value_of("port"), u16).unwrap();
            let addr = SocketAddr::new(ip, port);
            if args.is_present("listen") {
                Role::Target(addr)
            } else {
                Role::Initiator(addr)
            }
        }
    };

    Ok(SideChannel::new(role)?)
}

/// A target only keeps its memory exposed, everyone else measures
#[cfg(any(feature = "rdma", feature = "ucx"))]
fn peer_session<C: RmaConnector + Peer>(mut conn: C, args: &ArgMatches, quiet: bool) -> putlat::Result<()> {
    match conn.side_channel().role() {
        Role::Target(_) => conn.side_channel().serve()?,
        _ => {
            do_measurements(&mut conn, args, quiet)?;
            conn.side_channel().finish()?;
        }
    }

    Ok(())
}

#[cfg(feature = "rdma")]
fn rdma_session(args: &ArgMatches, quiet: bool) -> putlat::Result<()> {
    use putlat::connection::rdma::RdmaTransport;

    let conn = establish(RdmaTransport::new(side_channel(args)?), MAX_MSG_SIZE)?;
    peer_session(conn, args, quiet)
}

#[cfg(not(feature = "rdma"))]
fn rdma_session(_args: &ArgMatches, _quiet: bool) -> putlat::Result<()> {
    Err(putlat::Error::Config(
        "RDMA support is not compiled in, rebuild with `--features rdma`".into(),
    ))
}

#[cfg(feature = "ucx")]
fn ucx_session(args: &ArgMatches, quiet: bool) -> putlat::Result<()> {
    use putlat::connection::ucx::UcxTransport;

    let conn = establish(UcxTransport::new(side_channel(args)?), MAX_MSG_SIZE)?;
    peer_session(conn, args, quiet)
}

#[cfg(not(feature = "ucx"))]
fn ucx_session(_args: &ArgMatches, _quiet: bool) -> putlat::Result<()> {
    Err(putlat::Error::Config(
        "UCX support is not compiled in, rebuild with `--features ucx`".into(),
    ))
}

fn do_measurements<C: RmaConnector>(
    conn: &mut C,
    args: &ArgMatches,
    quiet: bool,
) -> putlat::Result<()> {
    let policy = if args.is_present("strict") {
        CompletionPolicy::Fatal
    } else {
        CompletionPolicy::Log
    };

    let report = if quiet {
        None
    } else {
        Some(Report(io::stdout()))
    };
    let dump = match args.value_of("output") {
        Some(path) => Some(JsonLines(BufWriter::new(File::create(path)?))),
        None => None,
    };
    let mut sink = (report, dump);

    PingPong::new(conn, SweepParams::default())
        .policy(policy)
        .sweep(&mut sink)?;

    if let (_, Some(JsonLines(w))) = sink {
        w.into_inner().map_err(io::Error::from)?;
    }

    Ok(())
}
