#![forbid(unsafe_code)]

use std::env;

use vaultgate_tools::gate_cli::execute_command;
use vaultgate_tools::init_logging;

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let output = execute_command(&args)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
