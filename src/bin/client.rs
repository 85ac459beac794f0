//! Interactive command-line client: prompts for a line, sends it, and
//! prints `OK` for an empty response or `RESPONSE IS: <value>` otherwise.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::Parser;
use ferrokv::client::Client;
use ferrokv::config::ClientArgs;

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    let timeout = Duration::from_secs(args.timeout_secs);

    let mut client = match Client::connect(&args.address, args.max_message_size, timeout).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("could not connect to {}: {e}", args.address);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("ENTER COMMAND: ");
        if io::stdout().flush().is_err() {
            break;
        }

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        match client.send(&line).await {
            Ok(response) if response.trim().is_empty() => println!("OK"),
            Ok(response) => println!("RESPONSE IS: {}", response.trim_end_matches(['\r', '\n'])),
            Err(e) => println!("ERROR: {e}"),
        }
    }
}
