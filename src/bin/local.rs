//! SSR local gateway binary.
//!
//! Usage: ssr-local [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -v, --verbose        Enable debug logging
//!   -h, --help           Print help information

use std::env;

use ssr_local::server::{Config, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<&str> = None;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-c" | "--config" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --config requires a file path");
                    return Ok(());
                }
                i += 1;
                config_path = Some(&args[i]);
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                return Ok(());
            }
        }
        i += 1;
    }

    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    let Some(path) = config_path else {
        print_usage();
        return Ok(());
    };

    let config = load_config(path)?;
    let server = Server::new(config)?;
    let env = server.env();

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down {} tunnel(s)", env.tunnels().len());
            server.shutdown();
        }
    }

    print!("{}", env.metrics().format_report());
    Ok(())
}

fn print_usage() {
    println!(
        r#"ssr-local - SOCKS5 to ShadowsocksR gateway

USAGE:
    ssr-local [OPTIONS]

OPTIONS:
    -c, --config <FILE>  Path to configuration file
    -v, --verbose        Enable debug logging
    -h, --help           Print help information

CONFIGURATION FILE FORMAT (JSON):
    {{
        "listen_host": "127.0.0.1",
        "listen_port": 1080,
        "remote_host": "server.example.net",
        "remote_port": 8388,
        "password": "...",
        "method": "aes-256-cfb",
        "protocol": "auth_aes128_md5",
        "protocol_param": "",
        "obfs": "http_simple",
        "obfs_param": "",
        "idle_timeout_ms": 300000,
        "udp": false
    }}

EXAMPLE:
    ssr-local --config local.json
"#
    );
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    Ok(Config::from_json(&content)?)
}
