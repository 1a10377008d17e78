use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::process::ExitCode;

use pingr::cli::{Args, EXIT_USAGE, parse_exit_code};
use pingr::config::Options;
use pingr::engine::ProbeLoop;
use pingr::export::{ConsoleReporter, JsonReporter, Reporter};
use pingr::lookup::{DnsLookup, resolve_target};
use pingr::prefs::Prefs;
use pingr::probe::{RawIcmpSocket, check_permissions};

/// No reply received, or a fatal runtime error
const EXIT_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return exit_code(parse_exit_code(&e));
        }
    };

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("pingr: {}", e);
        return exit_code(EXIT_USAGE);
    }

    let options = match Options::resolve(&args, &Prefs::load()) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("pingr: {}", e);
            return exit_code(EXIT_USAGE);
        }
    };

    // Check permissions early
    if let Err(e) = check_permissions() {
        eprintln!("pingr: {}", e);
        return exit_code(EXIT_USAGE);
    }

    match run(&args.host, options).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILURE),
        Err(e) => {
            let _ = std::io::stdout().flush();
            eprintln!("pingr: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Resolve, probe and report; true when at least one reply came back
async fn run(host: &str, options: Options) -> Result<bool> {
    let mut target = resolve_target(host)?;

    if options.dns_enabled {
        let dns = DnsLookup::new()?;
        target.hostname = dns.reverse_lookup(target.resolved).await;
    }

    let socket = RawIcmpSocket::open(options.ttl)?;

    let reporter: Box<dyn Reporter + Send> = if options.json {
        Box::new(JsonReporter::new(std::io::stdout()))
    } else {
        Box::new(ConsoleReporter::new(std::io::stdout(), options.report_style()))
    };

    let probe = ProbeLoop::new(
        socket,
        reporter,
        target,
        &options,
        tokio::runtime::Handle::current(),
    );

    // Setup Ctrl+C handler
    let flags = probe.flags();
    let cancel = probe.cancel_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            res = tokio::signal::ctrl_c() => {
                if res.is_ok() {
                    flags.interrupt();
                }
            }
        }
    });

    let summary = tokio::task::spawn_blocking(move || probe.run())
        .await
        .context("Probe loop panicked")??;

    Ok(summary.received > 0)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FAILURE))
}
