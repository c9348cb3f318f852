//! Command line program for running `rtreq` servers, clients and
//! benchmarks.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

extern crate anyhow;
extern crate clap;
extern crate colored;

pub mod cli;
mod config;
mod util;

use colored::*;

fn main() {
    // Run the program based on user input
    match cli::start(cli::init()) {
        Ok(_) => (),
        Err(e) => {
            println!("{}{}", "error: ".red(), e);
            if e.root_cause().to_string() != e.to_string() {
                println!("Caused by:\n{}", e.root_cause())
            }
            std::process::exit(1);
        }
    }
}
