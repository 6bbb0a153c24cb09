use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use core_sim::network::serve_deltas;
use core_sim::{
    build_headless_app_with, save_now, Command, CommandClient, CommandClientHandle,
    CommandReply, DeltaStream, MemoryPersistence, SimulationConfig, TileKey,
};

const DELTA_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 41_000);
const COMMAND_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 41_001);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match SimulationConfig::from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(err) => {
                warn!("Config load failed ({err}), using defaults");
                SimulationConfig::default()
            }
        },
        None => SimulationConfig::default(),
    };

    let mut app = build_headless_app_with(config, Arc::new(MemoryPersistence::default()));

    let client = app.world.resource::<CommandClientHandle>().0.clone();
    if let Some(stream) = app.world.remove_resource::<DeltaStream>() {
        serve_deltas(DELTA_BIND, stream.0);
    }
    spawn_command_listener(COMMAND_BIND, client);

    info!(
        command_bind = %COMMAND_BIND,
        delta_bind = %DELTA_BIND,
        "Sphereworks headless server ready"
    );

    app.run();
    save_now(&mut app.world);
}

fn spawn_command_listener(bind_addr: SocketAddr, client: CommandClient) {
    let listener = TcpListener::bind(bind_addr).expect("command listener bind failed");
    listener
        .set_nonblocking(true)
        .expect("set_nonblocking failed");

    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Command client connected: {}", addr);
                let client = client.clone();
                thread::spawn(move || handle_client(stream, client));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(err) => {
                warn!("Error accepting command client: {}", err);
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }
    });
}

fn handle_client(stream: TcpStream, client: CommandClient) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!("Failed to clone command stream: {}", err);
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response = match parse_command(trimmed) {
                    Some(command) => match client.send_with_reply(command) {
                        Some(reply) => format_reply(&reply),
                        None => "err driver unavailable".to_string(),
                    },
                    None => format!("err invalid command: {trimmed}"),
                };
                if writeln!(writer, "{response}").is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!("Command read error: {}", err);
                break;
            }
        }
    }
}

/// Line protocol:
///   place <face> <row> <col> <type_code> <orientation> [owner]
///   remove <face> <row> <col> [player]
///   tick
///   reset <seed>
fn parse_command(line: &str) -> Option<Command> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["place", face, row, col, type_code, orientation, rest @ ..] => {
            Some(Command::PlaceBuilding {
                key: TileKey::new(face.parse().ok()?, row.parse().ok()?, col.parse().ok()?),
                type_code: type_code.parse().ok()?,
                orientation: orientation.parse().ok()?,
                owner: match rest {
                    [owner] => Some(owner.parse().ok()?),
                    _ => None,
                },
            })
        }
        ["remove", face, row, col, rest @ ..] => Some(Command::RemoveBuilding {
            key: TileKey::new(face.parse().ok()?, row.parse().ok()?, col.parse().ok()?),
            acting_player: match rest {
                [player] => Some(player.parse().ok()?),
                _ => None,
            },
        }),
        ["tick"] => Some(Command::ReadTickCount),
        ["reset", seed] => Some(Command::ResetWorld {
            new_seed: seed.parse().ok()?,
        }),
        _ => None,
    }
}

fn format_reply(reply: &CommandReply) -> String {
    match reply {
        CommandReply::Place(Ok(())) | CommandReply::Remove(Ok(())) => "ok".to_string(),
        CommandReply::Place(Err(err)) => format!("err {err}"),
        CommandReply::Remove(Err(err)) => format!("err {err}"),
        CommandReply::PlaceMany(results) => batch_line(results.iter().map(Result::is_ok)),
        CommandReply::RemoveMany(results) => batch_line(results.iter().map(Result::is_ok)),
        CommandReply::TickCount(tick) => format!("tick {tick}"),
        CommandReply::ResetDone => "reset ok".to_string(),
        CommandReply::Rejected => "err busy".to_string(),
    }
}

/// Batches report per-item outcomes in order.
fn batch_line(results: impl Iterator<Item = bool>) -> String {
    let mut out = String::from("batch");
    for ok in results {
        out.push(' ');
        out.push_str(if ok { "ok" } else { "err" });
    }
    out
}
