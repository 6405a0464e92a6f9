use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::Cli;

/// Reads commands from stdin and prints results to stdout, one line at a
/// time, until EOF, `exit`/`quit`, or shutdown is requested (spec §4.H
/// "stdin-based interface"). The `shutdown_requested` check only runs
/// between reads, so `Cli::stop` joining this thread can block until the
/// current blocking read returns.
pub(crate) fn spawn_stdin_reader(cli: Arc<Cli>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("crux-cli-stdin".to_string())
        .spawn(move || {
            tracing::debug!("CLI stdin reader started");
            let stdin = std::io::stdin();
            let prompt = cli.config().prompt;
            loop {
                if !cli.is_running() || cli.shutdown_requested() {
                    break;
                }
                print!("{prompt}");
                let _ = std::io::stdout().flush();
                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "CLI stdin read error");
                        break;
                    }
                }
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                let result = cli.execute_command(line);
                if !result.output.is_empty() {
                    println!("{}", result.output);
                }
                if !result.error_message.is_empty() {
                    println!("Error: {}", result.error_message);
                }
                if line == "exit" || line == "quit" {
                    cli.request_shutdown();
                    break;
                }
            }
            tracing::debug!("CLI stdin reader stopped");
        })
        .expect("spawning the CLI stdin reader thread should not fail")
}

/// Starts a TCP acceptor loop; each connection is handled on its own
/// thread (spec §4.H "optional TCP acceptor"). Returns the handle plus
/// the address actually bound, useful when `port` was 0.
pub(crate) fn spawn_tcp_server(cli: Arc<Cli>) -> std::io::Result<(JoinHandle<()>, std::net::SocketAddr)> {
    let (bind_address, port) = {
        let config = cli.config();
        (config.bind_address.clone(), config.port)
    };
    let listener = TcpListener::bind((bind_address.as_str(), port))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "CLI TCP server listening");

    let handle = std::thread::Builder::new()
        .name("crux-cli-tcp".to_string())
        .spawn(move || {
            tracing::debug!("CLI TCP server thread started");
            for incoming in listener.incoming() {
                if !cli.is_running() {
                    break;
                }
                let Ok(stream) = incoming else {
                    continue;
                };
                if !cli.is_running() {
                    break;
                }
                let cli = cli.clone();
                std::thread::spawn(move || handle_tcp_client(cli, stream));
            }
            tracing::debug!("CLI TCP server thread stopped");
        })
        .expect("spawning the CLI TCP server thread should not fail");
    Ok((handle, local_addr))
}

fn handle_tcp_client(cli: Arc<Cli>, mut stream: TcpStream) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
    tracing::debug!(peer, "CLI TCP client connected");

    if stream.write_all(b"crux CLI - Type 'help' for commands\n").is_err() {
        return;
    }

    let prompt = cli.config().prompt;
    let mut reader = BufReader::new(stream.try_clone().expect("cloning a TCP stream should not fail"));

    loop {
        if !cli.is_running() {
            break;
        }
        if stream.write_all(prompt.as_bytes()).is_err() {
            break;
        }
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if line.is_empty() {
            continue;
        }

        let result = cli.execute_command(&line);
        let mut response = String::new();
        if !result.output.is_empty() {
            response.push_str(&result.output);
            response.push('\n');
        }
        if !result.error_message.is_empty() {
            response.push_str("Error: ");
            response.push_str(&result.error_message);
            response.push('\n');
        }
        if !response.is_empty() && stream.write_all(response.as_bytes()).is_err() {
            break;
        }

        if line == "exit" || line == "quit" {
            break;
        }
    }
    tracing::debug!(peer, "CLI TCP client disconnected");
}

/// Connects a throwaway client to unblock a listener thread parked in
/// `accept()`, so `Cli::stop` can join the TCP server thread promptly.
pub(crate) fn wake_acceptor(bind_address: &str, port: u16) {
    let _ = TcpStream::connect((bind_address, port));
}
