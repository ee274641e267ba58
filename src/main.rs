use clap::{crate_version, App, Arg};
use std::fs;
use std::io::{self, BufRead, Write};
use std::process;
use tracing::debug;
use treelox::interpreter::Interpreter;
use treelox::LoxError;

fn main() {
    init_tracing();
    let matches = App::new("treelox")
        .version(crate_version!())
        .about("Tree-walking interpreter for Lox")
        .arg(
            Arg::with_name("script")
                .help("Script to run. Starts a prompt when omitted.")
                .index(1),
        )
        .get_matches();

    match matches.value_of("script") {
        Some(file) => run_file(file),
        None => run_prompt(),
    }
}

/// Logs go to stderr, and only when `RUST_LOG` is set.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_file(file: &str) {
    let contents = match fs::read_to_string(file) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("Could not read {}: {}", file, e);
            process::exit(74);
        }
    };
    let mut interpreter = Interpreter::new();
    if let Err(e) = treelox::run(&contents, &mut interpreter) {
        eprintln!("{}", e);
        process::exit(match e {
            LoxError::Syntax(_) => 65,
            LoxError::Runtime(_) => 70,
        });
    }
}

fn run_prompt() {
    let mut interpreter = Interpreter::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => (),
        }
        if let Err(e) = treelox::run(&line, &mut interpreter) {
            debug!("prompt line failed");
            eprintln!("{}", e);
        }
    }
}
