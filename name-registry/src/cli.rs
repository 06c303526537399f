use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::server::DEFAULT_WORKERS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the registry server, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a registry and send commands typed on stdin.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:3068")]
    pub listen: SocketAddr,

    /// Append-only file holding every registered record.
    #[arg(long, default_value = "records.db")]
    pub data_file: PathBuf,

    /// Maximum number of clients served at the same time.
    #[arg(long, default_value_t = DEFAULT_WORKERS, value_parser = parse_workers)]
    pub workers: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the registry to connect to.
    #[arg(long, default_value = "127.0.0.1:3068")]
    pub server: SocketAddr,
}

fn parse_workers(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("at least one worker is required".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["name-registry", "serve"]).expect("parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen, "127.0.0.1:3068".parse().expect("addr"));
        assert_eq!(args.data_file, PathBuf::from("records.db"));
        assert_eq!(args.workers, 5);
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(Cli::try_parse_from(["name-registry", "serve", "--workers", "0"]).is_err());
    }
}
