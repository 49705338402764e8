use clap::{Arg, ArgAction, Command};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::lookup_host;
use colored::*;
use deimos::{
    attack::{AttackContext, AttackJob, ConsoleProgress, JobReport, JobStatus, LogProgress, MultiAttack, ProgressSink, StageSet, WorkerState},
    config::DeimosConfig,
    network::Target,
    process::ProcessSupervisor,
    tools::Tools,
};

fn print_banner() {
    println!("{}", " ___  ___ ___ __  __  ___  ___ ".truecolor(192, 57, 43).bold());
    println!("{}", "|   \\| __|_ _|  \\/  |/ _ \\/ __|".truecolor(192, 57, 43).bold());
    println!("{}", "| |) | _| | || |\\/| | (_) \\__ \\".truecolor(192, 57, 43).bold());
    println!("{}", "|___/|___|___|_|  |_|\\___/|___/".truecolor(192, 57, 43).bold());
    println!();
    println!("{}", "Deimos - many targets, one pipeline".truecolor(255, 215, 0).bold());
    println!();
}

fn build_cli() -> Command {
    Command::new("deimos")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(concat!(
            env!("CARGO_PKG_VERSION"),
            " (",
            env!("DEIMOS_TARGET"),
            ", ",
            env!("DEIMOS_PROFILE"),
            " build on ",
            env!("DEIMOS_BUILD_CPU_CORES"),
            " cores)"
        ))
        .about("Deimos: run an ordered attack pipeline against many hosts at once")
        .arg(
            Arg::new("target")
                .value_name("TARGET")
                .help("Hosts to attack (IP, hostname, or CIDR network)")
                .required(true)
                .num_args(1..)
                .index(1),
        )
        .arg(
            Arg::new("stages")
                .short('s')
                .long("stages")
                .value_name("STAGES")
                .help("Comma separated stages: trace,scan,inspect,vuln,exploit,crack")
                .default_value("scan,inspect")
                .conflicts_with("flags"),
        )
        .arg(
            Arg::new("flags")
                .long("flags")
                .value_name("BITMASK")
                .help("Stages as an integer bitmask (trace=1 scan=2 inspect=4 vuln=8 exploit=16 crack=32)")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (default: ~/.deimos.toml)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("nmap")
                .long("nmap")
                .value_name("PATH")
                .help("Network mapper binary to use")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the final report as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .help("Log progress instead of drawing a progress bar")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-banner")
                .long("no-banner")
                .help("Hide the banner")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Debug logging")
                .action(ArgAction::SetTrue),
        )
}

/// `a.b.c.d`, `a.b.c.d/nn` or a hostname
async fn parse_target(input: &str) -> anyhow::Result<Target> {
    if let Some((address, prefix)) = input.split_once('/') {
        let address: IpAddr = address
            .parse()
            .with_context(|| format!("invalid network address '{}'", input))?;
        let prefix: u8 = prefix
            .parse()
            .with_context(|| format!("invalid prefix length in '{}'", input))?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            bail!("prefix length {} too large for '{}'", prefix, input);
        }
        return Ok(Target::network(address, prefix));
    }

    if let Ok(address) = input.parse::<IpAddr>() {
        return Ok(Target::new(address));
    }

    let address = lookup_host((input, 0))
        .await
        .with_context(|| format!("cannot resolve '{}'", input))?
        .next()
        .map(|addr| addr.ip())
        .with_context(|| format!("'{}' resolved to no address", input))?;
    Ok(Target::new(address))
}

fn print_report(report: &JobReport) {
    println!();
    for entry in &report.targets {
        let state = match &entry.state {
            WorkerState::Completed => "[✓]".bright_green(),
            WorkerState::Interrupted(_) => "[!]".bright_red(),
            _ => "[-]".bright_yellow(),
        };
        println!("{} {} {}", state, entry.target.to_string().bright_cyan().bold(), entry.state);

        if let Some(os) = entry.target.device_os() {
            println!("    os: {}", os);
        }
        if let Some(device) = entry.target.device_type() {
            println!("    device: {}", device);
        }
        for port in entry.target.ports() {
            println!("    {}", port);
        }
        for vulnerability in entry.target.vulnerabilities() {
            println!("    {} {}", vulnerability.identifier.bright_red(), vulnerability.summary);
        }
        for exploit in entry.target.exploits() {
            println!("    {} {:?}", exploit.name.bright_magenta(), exploit.rank);
        }
    }

    let summary = &report.summary;
    let status = match summary.status {
        JobStatus::Completed => "completed".bright_green().bold(),
        _ => "cancelled".bright_yellow().bold(),
    };
    println!();
    println!(
        "{} {} {}/{} targets processed in {}s",
        "[~]".bright_blue(),
        status,
        summary.processed(),
        summary.total,
        (report.finished_at - report.started_at).num_seconds()
    );
}

fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<DeimosConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => DeimosConfig::from_toml_file(path)?,
        None => DeimosConfig::load_default_config()?,
    };
    if let Some(nmap) = matches.get_one::<PathBuf>("nmap") {
        config = config.with_nmap(nmap);
    }
    config.validate()?;
    Ok(config)
}

async fn run(matches: clap::ArgMatches, config: DeimosConfig) -> anyhow::Result<JobStatus> {
    let stages = match matches.get_one::<u32>("flags") {
        Some(flags) => StageSet::from_flags(*flags)?,
        None => matches
            .get_one::<String>("stages")
            .map(String::as_str)
            .unwrap_or("scan,inspect")
            .parse()?,
    };
    if stages.is_empty() {
        bail!("no stages selected");
    }

    let mut targets = Vec::new();
    for input in matches.get_many::<String>("target").into_iter().flatten() {
        targets.push(parse_target(input).await?);
    }

    let supervisor = ProcessSupervisor::new(&config.supervisor);
    let tools = Tools::new(&config.tools, &supervisor);
    tools.nmap.tool().check()?;
    tools.report_unavailable();

    let progress: Arc<dyn ProgressSink> = if matches.get_flag("no-progress") || matches.get_flag("json") {
        Arc::new(LogProgress::default())
    } else {
        Arc::new(ConsoleProgress::new(targets.len()))
    };
    let attack = Arc::new(
        MultiAttack::new(AttackContext::from_tools(&tools, config.attack.clone())).with_progress(progress),
    );

    let interrupted = Arc::clone(&attack);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "\n[!] Interrupted, cancelling running workers...".bright_yellow());
            interrupted.cancel().await;
        }
    });

    let report = attack.run(AttackJob::new(targets, stages)).await;
    supervisor.shutdown_all().await;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.summary.status)
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "[!] ERROR:".bright_red(), e);
            process::exit(1);
        }
    };

    let level = if matches.get_flag("verbose") {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if !matches.get_flag("no-banner") && !matches.get_flag("json") {
        print_banner();
    }

    match run(matches, config).await {
        Ok(JobStatus::Cancelled) => process::exit(130),
        Ok(_) => {}
        Err(e) => {
            eprintln!("{} {:#}", "[!] ERROR:".bright_red(), e);
            process::exit(1);
        }
    }
}
