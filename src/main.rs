use std::env;
use std::io::Write;
use std::process;

use log::{LevelFilter, Log, Metadata, Record};

use tabula::server::{Server, ServerConfig};

/// Writes records to stderr as `LEVEL target: message`.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{:<5} {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn init_logger() {
    let level = env::var("TABULA_LOG")
        .ok()
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

fn print_usage() {
    println!("tabula - heap-backed table server");
    println!();
    println!("USAGE:");
    println!("    tabula [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --listen <host:port>         Address to bind (TABULA_LISTEN)");
    println!("    --data <dir>                 Data root (TABULA_DATA)");
    println!("    --user <user:pass>           Accepted credential, repeatable (TABULA_USERS)");
    println!("    --auth-timeout-secs <n>      Seconds a client has to authenticate");
    println!("    -h, --help                   Print help information");
}

fn main() {
    init_logger();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let result = ServerConfig::from_args(args)
        .and_then(Server::bind)
        .and_then(Server::run);
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
