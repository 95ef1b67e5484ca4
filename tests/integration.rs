//! Drives the full stack against a scripted loopback server: connect,
//! fetch the roster page by page, then watch callbacks reshape the
//! projected state.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use gbxremote::frame::encode_frame;
use gbxremote::{read_method_call, Remote, RemoteConfig};

use adjutant::tracker::GameStateTracker;

fn player_struct(login: &str, nick_name: &str, uid: i32) -> String {
    format!(
        "<struct>\
         <member><name>Login</name><value><string>{}</string></value></member>\
         <member><name>NickName</name><value><string>{}</string></value></member>\
         <member><name>PlayerId</name><value><i4>{}</i4></value></member>\
         <member><name>TeamId</name><value><i4>0</i4></value></member>\
         <member><name>SpectatorStatus</name><value><i4>0</i4></value></member>\
         <member><name>LadderRanking</name><value><i4>0</i4></value></member>\
         <member><name>Flags</name><value><i4>101000000</i4></value></member>\
         </struct>",
        login, nick_name, uid
    )
}

fn respond(stream: &mut TcpStream, handle: u32, value_xml: &str) {
    let payload = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><methodResponse><params><param><value>{}</value></param></params></methodResponse>"#,
        value_xml
    );
    stream
        .write_all(&encode_frame(handle, payload.as_bytes()))
        .expect("server failed to respond");
}

fn push_callback(stream: &mut TcpStream, method: &str, param_xml: &[&str]) {
    let params: String = param_xml
        .iter()
        .map(|value| format!("<param><value>{}</value></param>", value))
        .collect();
    let payload = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><methodCall><methodName>{}</methodName><params>{}</params></methodCall>"#,
        method, params
    );
    stream
        .write_all(&encode_frame(0x0000_0001, payload.as_bytes()))
        .expect("server failed to push callback");
}

/// A server whose roster has three players (two on the first page), and
/// which acts out a connect, a chat line, and a disconnect when poked.
fn spawn_scripted_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("no connection");

        let header = b"GBXRemote 2";
        let mut length_bytes = [0; 4];
        LittleEndian::write_u32(&mut length_bytes, header.len() as u32);
        stream.write_all(&length_bytes).unwrap();
        stream.write_all(header).unwrap();

        loop {
            let mut head = [0; 8];
            if stream.read_exact(&mut head).is_err() {
                return;
            }
            let length = LittleEndian::read_u32(&head[..4]);
            let handle = LittleEndian::read_u32(&head[4..]);
            let mut payload = vec![0; length as usize];
            if stream.read_exact(&mut payload).is_err() {
                return;
            }
            let call = read_method_call(&String::from_utf8(payload).unwrap())
                .expect("server received malformed call");

            match call.name.as_str() {
                "Authenticate" | "SetApiVersion" | "EnableCallbacks" => {
                    respond(&mut stream, handle, "<boolean>1</boolean>");
                }
                "GetPlayerList" => {
                    assert_eq!(Some(50), call.args[0].as_i4());
                    assert_eq!(Some(0), call.args[2].as_i4());
                    let page = match call.args[1].as_i4() {
                        Some(0) => format!(
                            "<array><data><value>{}</value><value>{}</value></data></array>",
                            player_struct("alpha", "Alpha", 237),
                            player_struct("beta", "Beta", 238),
                        ),
                        Some(50) => format!(
                            "<array><data><value>{}</value></data></array>",
                            player_struct("gamma", "Gamma", 239),
                        ),
                        _ => "<array><data></data></array>".to_string(),
                    };
                    respond(&mut stream, handle, &page);
                }
                "Poke" => {
                    respond(&mut stream, handle, "<boolean>1</boolean>");
                    push_callback(
                        &mut stream,
                        "ManiaPlanet.PlayerConnect",
                        &["<string>delta</string>", "<boolean>0</boolean>"],
                    );
                    push_callback(
                        &mut stream,
                        "ManiaPlanet.PlayerChat",
                        &[
                            "<i4>237</i4>",
                            "<string>alpha</string>",
                            "<string>gg</string>",
                            "<boolean>0</boolean>",
                        ],
                    );
                    push_callback(
                        &mut stream,
                        "ManiaPlanet.PlayerDisconnect",
                        &["<string>beta</string>", "<string>quit</string>"],
                    );
                }
                other => panic!("server received unexpected call {}", other),
            }
        }
    });

    addr
}

async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::delay_for(Duration::from_millis(25)).await;
    }
}

#[tokio::test(threaded_scheduler)]
async fn tracker_projects_roster_and_chat() {
    let addr = spawn_scripted_server();

    let remote = Remote::new(RemoteConfig::new(
        "127.0.0.1",
        addr.port(),
        "SuperAdmin",
        "SuperAdmin",
    ));
    assert!(remote.connect(1, None).await);

    let tracker = GameStateTracker::new(remote.clone());
    tracker.subscribe();
    tracker.initialize().await.unwrap();

    let state = tracker.state();
    assert_eq!(3, state.player_count());
    assert_eq!("Alpha", state.player_by_login("alpha").unwrap().nick_name);
    assert_eq!(239, state.player_by_login("gamma").unwrap().uid);

    remote.call("Poke", vec![]).await.unwrap();
    wait_until("the projected roster change", || {
        state.player_by_login("beta").is_some()
            && state.players().iter().all(|info| info.login != "beta")
            && state.players().iter().any(|info| info.login == "delta")
    })
    .await;

    let logins: Vec<String> = state.players().into_iter().map(|info| info.login).collect();
    assert_eq!(vec!["alpha", "gamma", "delta"], logins);

    wait_until("the chat line", || !state.chat().is_empty()).await;
    let chat = state.chat();
    assert_eq!("alpha", chat[0].login);
    assert_eq!("Alpha", chat[0].nickname);
    assert_eq!("gg", chat[0].message);

    // the disconnect keeps the name cache warm
    assert_eq!("Beta", state.player_by_login("beta").unwrap().nick_name);

    remote.stop();
}
