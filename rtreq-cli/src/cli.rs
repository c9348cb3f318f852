//! Application definition.

extern crate simplelog;

use std::path::PathBuf;
use std::thread;

use anyhow::{Error, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use rtreq_net::{new_server, Benchmark, Client, ServerMode};

use crate::config::FileConfig;
use crate::util::parse_duration;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");

pub fn app<'a, 'b>() -> App<'a, 'b> {
    let app = App::new("rtreq")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .version(VERSION)
        .author(AUTHORS)
        .about("Run reliable request-reply servers and clients over ZeroMQ, \n\
                and benchmark their throughput.")
        .arg(Arg::with_name("verbosity")
            .long("verbosity")
            .short("v")
            .takes_value(true)
            .default_value("info")
            .value_name("verb")
            .global(true)
            .help("Set the verbosity of the log output (0-5 or level name)"))
        .arg(Arg::with_name("config")
            .long("config")
            .takes_value(true)
            .value_name("path")
            .global(true)
            .help("Path to a toml file with [server], [client] and [bench] tables"))

        // serve subcommand
        .subcommand(SubCommand::with_name("serve")
            .display_order(10)
            .about("Run the rtreq server")
            .long_about("Run the rtreq server\n\n\
            By default requests are handed to a pool of workers behind a \n\
            ROUTER-DEALER broker. With `--sync` a single REP socket answers \n\
            requests one at a time instead.")
            .arg(Arg::with_name("addr")
                .display_order(1)
                .long("addr")
                .short("a")
                .takes_value(true)
                .value_name("address")
                .help("Address to bind the server to [default: *:4157]"))
            .arg(Arg::with_name("name")
                .display_order(2)
                .long("name")
                .short("n")
                .takes_value(true)
                .value_name("string")
                .help("Name to identify the server (default is hostname)"))
            .arg(Arg::with_name("uptime")
                .display_order(3)
                .long("uptime")
                .short("u")
                .takes_value(true)
                .value_name("duration")
                .help("Shut the server down after the given duration (e.g. 30s, 5m)"))
            .arg(Arg::with_name("sync")
                .display_order(4)
                .long("sync")
                .short("s")
                .help("Respond synchronously to clients using a single socket"))
            .arg(Arg::with_name("workers")
                .display_order(5)
                .long("workers")
                .short("w")
                .takes_value(true)
                .value_name("count")
                .help("Number of workers to run in async mode [default: 16]"))
            .arg(Arg::with_name("restart-workers")
                .display_order(6)
                .long("restart-workers")
                .help("Replace workers that fail while the server is running"))
            .arg(Arg::with_name("outpath")
                .display_order(7)
                .long("outpath")
                .short("o")
                .takes_value(true)
                .value_name("path")
                .help("Path to write metrics out to, empty to skip [default: metrics.json]"))
        )

        // send subcommand
        .subcommand(SubCommand::with_name("send")
            .display_order(20)
            .about("Send messages to the server")
            .arg(Arg::with_name("messages")
                .required(true)
                .multiple(true)
                .value_name("message"))
            .arg(Arg::with_name("addr")
                .long("addr")
                .short("a")
                .takes_value(true)
                .value_name("address")
                .help("Address to connect to the server on [default: localhost:4157]"))
            .arg(Arg::with_name("name")
                .long("name")
                .short("n")
                .takes_value(true)
                .value_name("string")
                .help("Name to identify the client (default is hostname)"))
            .arg(Arg::with_name("timeout")
                .long("timeout")
                .short("t")
                .takes_value(true)
                .value_name("duration")
                .help("Receive timeout for each message [default: 5s]"))
            .arg(Arg::with_name("retries")
                .long("retries")
                .short("r")
                .takes_value(true)
                .value_name("count")
                .help("Number of attempts before a message is dropped [default: 3]"))
        )

        // bench subcommand
        .subcommand(SubCommand::with_name("bench")
            .display_order(21)
            .about("Run throughput benchmarks")
            .arg(Arg::with_name("addr")
                .long("addr")
                .short("a")
                .takes_value(true)
                .value_name("address")
                .help("Address to connect to the server on [default: localhost:4157]"))
            .arg(Arg::with_name("name")
                .long("name")
                .short("n")
                .takes_value(true)
                .value_name("string")
                .help("Name to identify the clients (default is hostname)"))
            .arg(Arg::with_name("duration")
                .long("duration")
                .short("d")
                .takes_value(true)
                .value_name("duration")
                .help("Duration of the benchmark [default: 30s]"))
            .arg(Arg::with_name("timeout")
                .long("timeout")
                .short("t")
                .takes_value(true)
                .value_name("duration")
                .help("Receive timeout for each message [default: 5s]"))
            .arg(Arg::with_name("retries")
                .long("retries")
                .short("r")
                .takes_value(true)
                .value_name("count")
                .help("Number of attempts before a message is dropped [default: 3]"))
            .arg(Arg::with_name("clients")
                .long("clients")
                .short("c")
                .takes_value(true)
                .value_name("count")
                .help("Number of concurrent clients [default: 1]"))
            .arg(Arg::with_name("results")
                .long("results")
                .short("o")
                .takes_value(true)
                .value_name("path")
                .help("Path to write the results to, empty to skip [default: results.json]"))
            .arg(Arg::with_name("seed")
                .long("seed")
                .short("s")
                .takes_value(true)
                .value_name("number")
                .help("Random seed used for client identities"))
        );

    app
}

pub fn init() -> ArgMatches<'static> {
    app().get_matches()
}

/// Runs based on specified subcommand.
pub fn start(matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        ("serve", Some(m)) => start_serve(m),
        ("send", Some(m)) => start_send(m),
        ("bench", Some(m)) => start_bench(m),
        _ => Ok(()),
    }
}

fn load_config(matches: &ArgMatches) -> Result<FileConfig> {
    match matches.value_of("config") {
        Some(path) => {
            let config = FileConfig::from_path(path)?;
            debug!("loaded config from {}", path);
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match matches.value_of(name) {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::msg(format!("failed parsing {} value \"{}\": {}", name, s, e))),
        None => Ok(None),
    }
}

fn output_path(s: &str) -> Option<PathBuf> {
    match s {
        "" => None,
        p => Some(PathBuf::from(p)),
    }
}

fn start_serve(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut config = load_config(matches)?.server;

    if let Some(addr) = matches.value_of("addr") {
        config.addr = addr.to_string();
    }
    if let Some(name) = matches.value_of("name") {
        config.name = name.to_string();
    }
    if let Some(uptime) = matches.value_of("uptime") {
        config.uptime = Some(parse_duration(uptime)?);
    }
    if matches.is_present("sync") {
        config.mode = ServerMode::Sync;
    }
    if let Some(workers) = parse_arg(matches, "workers")? {
        config.workers = workers;
    }
    if matches.is_present("restart-workers") {
        config.restart_workers = true;
    }
    if let Some(path) = matches.value_of("outpath") {
        config.metrics_path = output_path(path);
    }

    let metrics_path = config.metrics_path.clone();
    let uptime = config.uptime;
    let mut server = new_server(config, None)
        .map_err(|e| Error::new(e).context("could not initialize server"))?;
    server.bind()?;
    println!("listening for new clients on: {}", server.bound_addr()?);

    // run a loop allowing graceful shutdown
    let handle = server.handle();
    let h = handle.clone();
    ctrlc::set_handler(move || h.stop())?;

    if let Some(uptime) = uptime {
        let h = handle.clone();
        thread::spawn(move || {
            thread::sleep(uptime);
            info!("uptime of {:?} reached", uptime);
            h.stop();
        });
    }

    let result = server.run();
    println!("Initiating graceful shutdown...");
    // a failed shutdown must not hide why the server stopped
    match server.shutdown(metrics_path.as_deref()) {
        Ok(()) => {
            if let Some(path) = metrics_path.as_ref().filter(|p| p.is_file()) {
                println!("metrics written to {}", path.display());
            }
        }
        Err(e) => error!("failed shutting down server: {}", e),
    }

    result.map_err(|e| Error::new(e).context("could not run server"))
}

fn start_send(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut config = load_config(matches)?.client;

    if let Some(addr) = matches.value_of("addr") {
        config.addr = addr.to_string();
    }
    if let Some(name) = matches.value_of("name") {
        config.name = name.to_string();
    }
    if let Some(timeout) = matches.value_of("timeout") {
        config.timeout = parse_duration(timeout)?;
    }
    if let Some(retries) = parse_arg(matches, "retries")? {
        config.retries = retries;
    }

    let mut client = Client::new_with_config(&config, None)
        .map_err(|e| Error::new(e).context("could not create client"))?;
    client.connect()?;

    let mut result = Ok(());
    if let Some(messages) = matches.values_of("messages") {
        for msg in messages {
            match client.send(msg, config.retries, config.timeout) {
                Ok(Some(reply)) => println!("{}", reply.payload()),
                // already reported in the log
                Ok(None) => (),
                Err(e) => {
                    result = Err(Error::new(e).context("failed sending message"));
                    break;
                }
            }
        }
    }

    if let Err(e) = client.shutdown() {
        warn!("failed shutting down client: {}", e);
    }
    result
}

fn start_bench(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut config = load_config(matches)?.bench;

    if let Some(addr) = matches.value_of("addr") {
        config.client.addr = addr.to_string();
    }
    if let Some(name) = matches.value_of("name") {
        config.client.name = name.to_string();
    }
    if let Some(duration) = matches.value_of("duration") {
        config.duration = parse_duration(duration)?;
    }
    if let Some(timeout) = matches.value_of("timeout") {
        config.client.timeout = parse_duration(timeout)?;
    }
    if let Some(retries) = parse_arg(matches, "retries")? {
        config.client.retries = retries;
    }
    if let Some(clients) = parse_arg(matches, "clients")? {
        config.clients = clients;
    }
    if let Some(path) = matches.value_of("results") {
        config.results_path = output_path(path);
    }
    if let Some(seed) = parse_arg(matches, "seed")? {
        config.seed = Some(seed);
    }

    let results = Benchmark::run(&config, None)?;
    println!("{}", results);
    println!("mean latency: {:?}", results.mean_latency());
    if let Some(path) = &config.results_path {
        println!("results written to {}", path.display());
    }
    Ok(())
}

fn setup_log_verbosity(matches: &ArgMatches) {
    use self::simplelog::{LevelFilter, TermLogger};
    let level_filter = match matches.value_of("verbosity") {
        Some(s) => match s {
            "0" | "none" => LevelFilter::Off,
            "1" | "err" | "error" | "min" => LevelFilter::Error,
            "2" | "warn" | "warning" | "default" => LevelFilter::Warn,
            "3" | "info" => LevelFilter::Info,
            "4" | "debug" => LevelFilter::Debug,
            "5" | "trace" | "max" | "all" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        _ => LevelFilter::Warn,
    };
    let mut config_builder = simplelog::ConfigBuilder::new();
    let logger_conf = config_builder
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Debug)
        .set_location_level(LevelFilter::Trace)
        .set_time_format_str("%H:%M:%S%.6f")
        .build();
    if TermLogger::init(level_filter, logger_conf, simplelog::TerminalMode::Mixed).is_err() {
        eprintln!("failed initializing logger");
    }
}

#[test]
fn serve_args_parse() {
    let matches = app()
        .get_matches_from_safe(vec![
            "rtreq", "serve", "--sync", "-w", "4", "--uptime", "10s", "-v", "debug",
        ])
        .unwrap();
    let (name, m) = matches.subcommand();
    assert_eq!(name, "serve");
    let m = m.unwrap();
    assert!(m.is_present("sync"));
    assert_eq!(parse_arg::<usize>(m, "workers").unwrap(), Some(4));
    assert_eq!(m.value_of("verbosity"), Some("debug"));
    assert_eq!(parse_arg::<usize>(m, "addr").unwrap(), None);
}

#[test]
fn send_requires_messages() {
    assert!(app().get_matches_from_safe(vec!["rtreq", "send"]).is_err());
    let matches = app()
        .get_matches_from_safe(vec!["rtreq", "send", "-r", "2", "ping", "pong"])
        .unwrap();
    let m = matches.subcommand_matches("send").unwrap();
    let messages: Vec<&str> = m.values_of("messages").unwrap().collect();
    assert_eq!(messages, vec!["ping", "pong"]);
    assert_eq!(parse_arg::<u32>(m, "retries").unwrap(), Some(2));
}

#[test]
fn bad_numbers_are_reported() {
    let matches = app()
        .get_matches_from_safe(vec!["rtreq", "bench", "--clients", "many"])
        .unwrap();
    let m = matches.subcommand_matches("bench").unwrap();
    assert!(parse_arg::<usize>(m, "clients").is_err());
}

#[test]
fn empty_output_path_disables_writing() {
    assert_eq!(output_path(""), None);
    assert_eq!(output_path("m.json"), Some(PathBuf::from("m.json")));
}
