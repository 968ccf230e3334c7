use std::process::ExitCode;

use clap::Parser;
use logship::commands::Logship;
use yansi::Paint;

fn main() -> ExitCode {
    let logship = Logship::parse();

    match logship.run() {
        Err(err) => {
            let root = err.root_cause();

            eprintln!("{}", format!("Error: {}", err).red());
            eprintln!();
            eprintln!("{}", "Caused by:".red());
            eprintln!("{}", format!("  {}", root).red());
            ExitCode::from(1)
        }
        Ok(_) => ExitCode::from(0),
    }
}
