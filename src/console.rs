//! The line-oriented operator console: internal `/` commands, and
//! everything else dispatched to the server as a method call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gbxremote::{CallError, Delivery, Remote, Value, ANY_CALLBACK};

use crate::syntax::{parse_call, render_value};
use crate::tracker::GameState;

/// Whether the console should keep reading input.
#[derive(Debug, Eq, PartialEq)]
pub enum Outcome {
    Continue,
    Exit,
}

pub struct Console {
    remote: Remote,
    state: Arc<GameState>,
    show_callbacks: AtomicBool,
    show_chat: AtomicBool,
}

impl Console {
    /// Builds the console and registers its event printers.
    pub fn new(remote: Remote, state: Arc<GameState>) -> Arc<Console> {
        let console = Arc::new(Console {
            remote,
            state,
            show_callbacks: AtomicBool::new(false),
            show_chat: AtomicBool::new(true),
        });
        Console::subscribe(&console);
        console
    }

    /// Print server events as they come in, according to the toggles.
    fn subscribe(console: &Arc<Console>) {
        let printer = Arc::clone(console);
        console
            .remote
            .register_callback(ANY_CALLBACK, Delivery::Inline, move |_method, args| {
                if !printer.show_callbacks.load(Ordering::Relaxed) {
                    return;
                }
                // wildcard subscribers see the method as the first argument
                let rendered: Vec<String> = args.iter().map(render_value).collect();
                println!("[cb] {}", rendered.join(" "));
            });

        let printer = Arc::clone(console);
        console.remote.register_callback(
            "ManiaPlanet.PlayerChat",
            Delivery::Inline,
            move |_method, args| {
                if !printer.show_chat.load(Ordering::Relaxed) {
                    return;
                }
                if let [Value::Int(_), Value::String(login), Value::String(message), Value::Bool(_)] =
                    args
                {
                    let name = printer
                        .state
                        .player_by_login(login)
                        .map(|info| info.nick_name)
                        .unwrap_or_else(|| login.clone());
                    println!("[chat] {}: {}", name, message);
                }
            },
        );
    }

    /// React to one input line, printing whatever it produced.
    pub async fn handle_line(&self, line: &str) -> Outcome {
        let line = line.trim();
        if line.is_empty() {
            return Outcome::Continue;
        }

        let (outcome, output) = match line.strip_prefix('/') {
            Some(command) => self.internal_command(command).await,
            None => (Outcome::Continue, self.method_call(line).await),
        };
        for printed in output {
            println!("{}", printed);
        }
        outcome
    }

    async fn internal_command(&self, command: &str) -> (Outcome, Vec<String>) {
        // The fixed-length slices below rely on the keyword starting
        // at offset zero, so drop any whitespace after the slash.
        let command = command.trim_start();
        let mut words = command.split_whitespace();
        let mut output = Vec::new();

        match words.next() {
            Some("help") => {
                output.push("[+] anything not starting with '/' is sent as a method call,".to_string());
                output.push("[+] e.g.: SetMatchSettings \"file\" [1,2,[3,true]] -4.5".to_string());
                output.push("[+] internal commands:".to_string());
                output.push("[+]   /help            - show this help message".to_string());
                output.push("[+]   /exit            - close the session and the application".to_string());
                output.push("[+]   /players         - list connected players".to_string());
                output.push("[+]   /chat <message>  - send a chat message".to_string());
                output.push("[+]   /togglecallbacks - toggle display of server callbacks".to_string());
                output.push("[+]   /togglechat      - toggle display of in-game chat".to_string());
            }
            Some("exit") => return (Outcome::Exit, output),
            Some("players") => {
                let players = self.state.players();
                output.push(format!("[+] {} connected:", players.len()));
                for info in players {
                    output.push(format!("[+]   {} ({})", info.nick_name, info.login));
                }
            }
            Some("chat") => {
                let message = command["chat".len()..].trim();
                if message.is_empty() {
                    output.push("[-] please provide an actual message".to_string());
                } else {
                    match self
                        .remote
                        .call("ChatSendServerMessage", vec![message.into()])
                        .await
                    {
                        Ok(_) => output.push("[+] sent".to_string()),
                        Err(err) => output.push(format!("[-] failed to chat: {}", err)),
                    }
                }
            }
            Some("togglecallbacks") => {
                let shown = !self.show_callbacks.load(Ordering::Relaxed);
                self.show_callbacks.store(shown, Ordering::Relaxed);
                if shown {
                    output.push("[+] will now show callbacks".to_string());
                } else {
                    output.push("[+] disabled displaying of callbacks".to_string());
                }
            }
            Some("togglechat") => {
                let shown = !self.show_chat.load(Ordering::Relaxed);
                self.show_chat.store(shown, Ordering::Relaxed);
                if shown {
                    output.push("[+] will now show the in-game chat".to_string());
                } else {
                    output.push("[+] disabled in-game chat display".to_string());
                }
            }
            Some(other) => output.push(format!("[-] unknown command '/{}'; try /help", other)),
            None => output.push("[-] empty command; try /help".to_string()),
        }
        (Outcome::Continue, output)
    }

    async fn method_call(&self, line: &str) -> Vec<String> {
        let (method, args) = match parse_call(line) {
            Ok(parsed) => parsed,
            Err(err) => return vec![format!("[-] {}", err)],
        };

        match self.remote.call(&method, args).await {
            Ok(result) => vec![format!("[+] {}", render_value(&result))],
            Err(CallError::Fault(fault)) => vec![format!("[-] {}", fault)],
            Err(err) => vec![format!("[-] {} failed: {}", method, err)],
        }
    }
}
