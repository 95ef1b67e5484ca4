use std::io::BufRead;

use tokio::sync::mpsc::unbounded_channel;

use gbxremote::Remote;

use adjutant::config::Config;
use adjutant::console::{Console, Outcome};
use adjutant::tracker::GameStateTracker;

/// The client's entry-point: pick a configured server, connect, and
/// hand the terminal over to the operator console.
#[tokio::main]
async fn main() {
    env_logger::init(); // Use log::* to write to stdout/err

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[-] {:#}", err);
            std::process::exit(2);
        }
    };

    let requested = std::env::args().nth(1);
    let server = match config.select(requested.as_deref()) {
        Some(server) => server,
        None => {
            eprintln!("[-] pass one of the configured servers as an argument:");
            for entry in &config.servers {
                eprintln!("[-]   {} ({}:{})", entry.name, entry.host, entry.port);
            }
            std::process::exit(2);
        }
    };

    println!("[+] connecting to '{}' ({}:{})", server.name, server.host, server.port);
    let remote = Remote::new(server.remote_config());
    let announce = |attempt: u32, max: i32| {
        println!("[+] connection attempt {} of {}", attempt, max);
    };
    if !remote.connect(server.conn_retries as i32, Some(&announce)).await {
        eprintln!("[-] could not connect to '{}'", server.name);
        std::process::exit(1);
    }
    println!("[+] connected; type /help for a list of commands");

    let tracker = GameStateTracker::new(remote.clone());
    tracker.subscribe();
    if let Err(err) = tracker.initialize().await {
        log::warn!("failed to fetch the player list: {}", err);
    }

    let console = Console::new(remote.clone(), tracker.state());

    // Input lines are pulled off stdin by a plain thread, so that the
    // runtime is never blocked waiting for the operator.
    let (line_out, mut line_in) = unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if line_out.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = line_in.recv().await {
        match console.handle_line(&line).await {
            Outcome::Continue => {}
            Outcome::Exit => break,
        }
    }

    println!("[+] closing the connection");
    remote.stop();
}
