//! A minimal TLS client over a plain TCP socket.
//!
//! The transport is a real `TcpStream`, and the peer, port, SNI name, and
//! ALPN list are all read from the command line instead of being compiled
//! in.

use std::io::{Read as _, Write as _};
use std::net::TcpStream;
use std::process::ExitCode;
use std::sync::Arc;

use tls_core::{Config, Connection, Role};

struct Args {
    host: String,
    port: u16,
    alpn: Vec<Vec<u8>>,
    name: Option<String>,
    status: bool,
}

fn usage() -> ! {
    eprintln!(
        "usage: tlsc [--alpn list] [--name sni] [--status] host [port]\n\n\
         options:\n\
         \x20 --alpn list   comma-separated ALPN protocol list (e.g. h2,http/1.1)\n\
         \x20 --name sni    server_name to send; defaults to `host`\n\
         \x20 --status      request OCSP stapling\n\
         \x20 --help        print this message"
    );
    std::process::exit(1)
}

fn parse_args() -> Args {
    let mut argv = std::env::args().skip(1).peekable();
    let mut alpn = Vec::new();
    let mut name = None;
    let mut status = false;
    let mut positional = Vec::new();

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--help" => usage(),
            "--alpn" => {
                let list = argv.next().unwrap_or_else(|| usage());
                alpn = list.split(',').map(|p| p.as_bytes().to_vec()).collect();
            }
            "--name" => name = Some(argv.next().unwrap_or_else(|| usage())),
            "--status" => status = true,
            other if other.starts_with("--") => usage(),
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let host = positional.next().unwrap_or_else(|| usage());
    let port = positional
        .next()
        .map(|p| p.parse().unwrap_or_else(|_| usage()))
        .unwrap_or(443);

    Args { host, port, alpn, name, status }
}

fn main() -> ExitCode {
    stderrlog::new()
        .verbosity(3)
        .timestamp(stderrlog::Timestamp::Millisecond)
        .init()
        .unwrap();

    let args = parse_args();

    let stream = match TcpStream::connect((args.host.as_str(), args.port)) {
        Ok(s) => s,
        Err(e) => {
            log::error!("connect to {}:{} failed: {e}", args.host, args.port);
            return ExitCode::FAILURE;
        }
    };
    let read_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::error!("socket clone failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = Config::new();
    if args.status {
        config.set_status_request_type(tls_core::StatusRequestType::Ocsp);
    }
    if !args.alpn.is_empty() {
        config.set_protocol_preferences(args.alpn.clone());
    }
    let config: Arc<Config> = config.build();

    let mut conn: Connection<TcpStream, TcpStream> = Connection::new(Role::Client);
    conn.set_config(config);
    conn.set_io(read_half, stream);
    let sni = args.name.as_deref().unwrap_or(&args.host);
    if let Err(e) = conn.set_server_name(sni) {
        log::error!("invalid server name {sni:?}: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = conn.negotiate() {
        log::error!("handshake failed: {e}");
        return ExitCode::FAILURE;
    }
    log::info!(
        "handshake complete, alpn={:?}",
        conn.application_protocol().map(String::from_utf8_lossy)
    );

    let request = format!("HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", args.host);
    if let Err(e) = conn.send(request.as_bytes()) {
        log::error!("write failed: {e}");
        return ExitCode::FAILURE;
    }

    let mut buf = [0u8; 4096];
    loop {
        match conn.recv(&mut buf) {
            Ok(n) => {
                let _ = std::io::stdout().write_all(&buf[..n]);
            }
            Err(tls_core::Error::Closed) => break,
            Err(e) => {
                log::error!("read failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    match conn.shutdown() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("shutdown failed: {e}");
            ExitCode::FAILURE
        }
    }
}
