use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{cli::ClientArgs, protocol::write_line};

type ServerLines = Lines<BufReader<OwnedReadHalf>>;

/// What the client does after handling one event.
enum Flow {
    Continue,
    /// `EXIT` was sent; print whatever the server still had queued.
    Drain,
    Stop,
}

/// Forwards stdin lines to the registry and prints every line it sends back.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut server_lines, mut writer) = establish_connection(&args).await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    if let Flow::Drain = run_client_loop(&mut server_lines, &mut writer, &mut stdin).await? {
        drain_server_lines(&mut server_lines).await?;
    }
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(ServerLines, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader).lines(), writer))
}

async fn run_client_loop(
    server_lines: &mut ServerLines,
    writer: &mut OwnedWriteHalf,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> Result<Flow> {
    // Both `next_line` calls are cancel safe, so losing a select race drops no input.
    loop {
        let flow = select! {
            server_line = server_lines.next_line() => handle_server_line(server_line).await?,
            stdin_line = stdin.next_line() => handle_stdin_line(stdin_line, writer).await?,
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                Flow::Stop
            }
        };

        match flow {
            Flow::Continue => {}
            other => return Ok(other),
        }
    }
}

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<Flow> {
    match line? {
        Some(line) => {
            write_stdout(&line).await?;
            Ok(Flow::Continue)
        }
        None => {
            write_stderr("*** server closed the connection").await?;
            Ok(Flow::Stop)
        }
    }
}

async fn handle_stdin_line(
    line: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<Flow> {
    let Some(line) = line? else {
        write_line(writer, "EXIT").await?;
        return Ok(Flow::Drain);
    };

    let text = line.trim();
    if text.is_empty() {
        return Ok(Flow::Continue);
    }

    write_line(writer, text)
        .await
        .context("failed to send command")?;

    if text == "EXIT" {
        Ok(Flow::Drain)
    } else {
        Ok(Flow::Continue)
    }
}

async fn drain_server_lines(server_lines: &mut ServerLines) -> Result<()> {
    while let Some(line) = server_lines.next_line().await? {
        write_stdout(&line).await?;
    }
    Ok(())
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
