use std::net::SocketAddr;

use clap::Args;
use eyre::Context;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{TcpListener, TcpStream},
};
use yansi::Paint;

#[derive(Args, Debug)]
pub struct Cmd {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:5000",
        help = "Address to accept newline-delimited records on."
    )]
    pub bind: SocketAddr,

    #[arg(long, help = "Pretty print records that parse as JSON.")]
    pub json: bool,
}

impl Cmd {
    pub async fn run(&self) -> eyre::Result<()> {
        let listener = TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("Failed binding collector to {}", self.bind))?;
        tracing::info!("collector listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.context("Failed accepting connection")?;
                    tracing::info!(%peer, "client connected");
                    tokio::spawn(Self::print_records(stream, peer, self.json));
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed listening for Ctrl-C")?;
                    return Ok(());
                }
            }
        }
    }

    async fn print_records(stream: TcpStream, peer: SocketAddr, pretty_json: bool) {
        let mut lines = BufReader::new(stream).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => println!("{} {}", peer.dim(), render(&line, pretty_json)),
                Ok(None) => {
                    tracing::info!(%peer, "client disconnected");
                    return;
                }
                Err(err) => {
                    tracing::warn!(%peer, "connection failed: {err}");
                    return;
                }
            }
        }
    }
}

fn render(line: &str, pretty_json: bool) -> String {
    if !pretty_json {
        return line.to_string();
    }

    match serde_json::from_str::<Value>(line) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| line.to_string()),
        Err(_) => line.to_string(),
    }
}
