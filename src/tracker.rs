//! A live projection of the server state, fed by callbacks.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Deserialize;

use gbxremote::{from_value, CallError, Delivery, Remote, Value};

/// How many chat lines are kept before the oldest are dropped.
pub const DEFAULT_MAX_CHAT_LINES: usize = 50;

/// Player information as delivered by `GetPlayerList` and the
/// `ManiaPlanet.PlayerInfoChanged` callback.
///
/// Reference: GetPlayerList
/// https://doc.maniaplanet.com/dedicated-server/references/xml-rpc-methods
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerInfo {
    /// Player-unique login.
    pub login: String,

    /// Formatted display name.
    #[serde(default)]
    pub nick_name: String,

    /// Player UID that is tied to this player while they are connected.
    #[serde(rename = "PlayerId", default)]
    pub uid: i32,

    #[serde(default)]
    pub team_id: i32,

    #[serde(default)]
    pub spectator_status: i32,

    #[serde(default)]
    pub ladder_ranking: i32,

    #[serde(default)]
    pub flags: i32,
}

impl PlayerInfo {
    /// Stand-in for logins we saw connect, but have no info for yet.
    fn unresolved(login: &str) -> PlayerInfo {
        PlayerInfo {
            login: login.to_string(),
            nick_name: login.to_string(),
            uid: 0,
            team_id: 0,
            spectator_status: 0,
            ladder_ranking: 0,
            flags: 0,
        }
    }
}

/// One line of in-game chat.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatLine {
    pub login: String,
    pub nickname: String,
    pub message: String,
}

/// The tracked state itself. Each field family has its own lock, and
/// every query hands out an owned snapshot, never a reference into the
/// tracked data.
pub struct GameState {
    roster: Mutex<Roster>,
    chat: Mutex<VecDeque<ChatLine>>,
    match_start: Mutex<i64>,
    max_chat_lines: usize,
}

/// Connected players, plus cached infos that outlive disconnects, so
/// that recent leavers still resolve to a display name. One struct
/// under one lock, so the two can never be locked in different orders.
struct Roster {
    /// Logins in connect order.
    order: Vec<String>,

    info: HashMap<String, PlayerInfo>,
}

impl GameState {
    pub fn new(max_chat_lines: usize) -> GameState {
        GameState {
            roster: Mutex::new(Roster {
                order: Vec::new(),
                info: HashMap::new(),
            }),
            chat: Mutex::new(VecDeque::new()),
            match_start: Mutex::new(0),
            max_chat_lines,
        }
    }

    pub(crate) fn player_connected(&self, login: &str) {
        let mut roster = self.roster.lock().unwrap();
        if !roster.order.iter().any(|l| l == login) {
            roster.order.push(login.to_string());
        }
    }

    pub(crate) fn player_disconnected(&self, login: &str) {
        let mut roster = self.roster.lock().unwrap();
        roster.order.retain(|l| l != login);
        // keep the info cache entry
    }

    /// Upsert the info cache, and make sure the login counts as
    /// connected.
    pub(crate) fn player_info_changed(&self, info: PlayerInfo) {
        let mut roster = self.roster.lock().unwrap();
        if !roster.order.iter().any(|l| l == &info.login) {
            roster.order.push(info.login.clone());
        }
        roster.info.insert(info.login.clone(), info);
    }

    pub(crate) fn chat_line(&self, login: &str, message: &str) {
        let nickname = self
            .player_by_login(login)
            .map(|info| info.nick_name)
            .unwrap_or_else(|| login.to_string());

        let mut chat = self.chat.lock().unwrap();
        chat.push_back(ChatLine {
            login: login.to_string(),
            nickname,
            message: message.to_string(),
        });
        while chat.len() > self.max_chat_lines {
            chat.pop_front();
        }
    }

    pub(crate) fn match_started(&self, epoch_secs: i64) {
        *self.match_start.lock().unwrap() = epoch_secs;
    }

    /// Info for every connected player, in connect order.
    pub fn players(&self) -> Vec<PlayerInfo> {
        let roster = self.roster.lock().unwrap();
        roster
            .order
            .iter()
            .map(|login| {
                roster
                    .info
                    .get(login)
                    .cloned()
                    .unwrap_or_else(|| PlayerInfo::unresolved(login))
            })
            .collect()
    }

    /// Last known info for the given login, connected or not.
    pub fn player_by_login(&self, login: &str) -> Option<PlayerInfo> {
        self.roster.lock().unwrap().info.get(login).cloned()
    }

    pub fn player_count(&self) -> usize {
        self.roster.lock().unwrap().order.len()
    }

    pub fn chat(&self) -> Vec<ChatLine> {
        self.chat.lock().unwrap().iter().cloned().collect()
    }

    /// Epoch seconds of the most recent `BeginMatch`, or zero if no
    /// match started since we are connected.
    pub fn match_start(&self) -> i64 {
        *self.match_start.lock().unwrap()
    }
}

/// Keeps a [`GameState`] up to date from server callbacks.
pub struct GameStateTracker {
    remote: Remote,
    state: Arc<GameState>,
}

impl GameStateTracker {
    pub fn new(remote: Remote) -> GameStateTracker {
        GameStateTracker::with_chat_capacity(remote, DEFAULT_MAX_CHAT_LINES)
    }

    pub fn with_chat_capacity(remote: Remote, max_chat_lines: usize) -> GameStateTracker {
        GameStateTracker {
            remote,
            state: Arc::new(GameState::new(max_chat_lines)),
        }
    }

    pub fn state(&self) -> Arc<GameState> {
        Arc::clone(&self.state)
    }

    /// Register for every callback the projection is derived from.
    /// All subscribers run inline: they only take locks briefly.
    pub fn subscribe(&self) {
        let state = self.state();
        self.remote.register_callback(
            "ManiaPlanet.PlayerConnect",
            Delivery::Inline,
            move |method, args| match args {
                [Value::String(login), Value::Bool(_is_spectator)] => {
                    state.player_connected(login)
                }
                _ => log::warn!("unexpected args for {}: {:?}", method, args),
            },
        );

        let state = self.state();
        self.remote.register_callback(
            "ManiaPlanet.PlayerDisconnect",
            Delivery::Inline,
            move |method, args| match args {
                [Value::String(login), Value::String(_reason)] => {
                    state.player_disconnected(login)
                }
                _ => log::warn!("unexpected args for {}: {:?}", method, args),
            },
        );

        let state = self.state();
        self.remote.register_callback(
            "ManiaPlanet.PlayerChat",
            Delivery::Inline,
            move |method, args| match args {
                [Value::Int(_uid), Value::String(login), Value::String(message), Value::Bool(_is_registered_cmd)] => {
                    state.chat_line(login, message)
                }
                _ => log::warn!("unexpected args for {}: {:?}", method, args),
            },
        );

        let state = self.state();
        self.remote.register_callback(
            "ManiaPlanet.PlayerInfoChanged",
            Delivery::Inline,
            move |method, args| match args {
                [info @ Value::Struct(_)] => match from_value::<PlayerInfo>(info.clone()) {
                    Ok(info) => state.player_info_changed(info),
                    Err(err) => log::warn!("unexpected args for {}: {}", method, err),
                },
                _ => log::warn!("unexpected args for {}: {:?}", method, args),
            },
        );

        let state = self.state();
        self.remote.register_callback(
            "ManiaPlanet.BeginMatch",
            Delivery::Inline,
            move |_method, _args| state.match_started(Utc::now().timestamp()),
        );

        // Nothing is projected out of these yet, but seeing them at
        // debug level helps when following along with a live server.
        for method in &[
            "ManiaPlanet.EndMatch",
            "ManiaPlanet.BeginMap",
            "ManiaPlanet.EndMap",
            "ManiaPlanet.StatusChanged",
            "ManiaPlanet.PlayerCheckpoint",
            "ManiaPlanet.PlayerFinish",
            "ManiaPlanet.MapListModified",
        ] {
            self.remote
                .register_callback(method, Delivery::Inline, |method, args| {
                    log::debug!("{}: {:?}", method, args)
                });
        }
    }

    /// Fetch the complete roster, one page of fifty players at a time,
    /// until the server returns an empty page or a fault.
    pub async fn initialize(&self) -> Result<(), CallError> {
        const PAGE_SIZE: i32 = 50;

        let mut index = 0;
        loop {
            let page = self
                .remote
                .call(
                    "GetPlayerList",
                    vec![Value::Int(PAGE_SIZE), Value::Int(index), Value::Int(0)],
                )
                .await;
            let entries = match page {
                Ok(Value::Array(entries)) => entries,
                Ok(other) => {
                    return Err(CallError::Protocol(format!(
                        "expected an array from GetPlayerList, got {:?}",
                        other
                    )))
                }
                Err(CallError::Fault(fault)) => {
                    log::warn!("GetPlayerList ended with {}", fault);
                    break;
                }
                Err(err) => return Err(err),
            };
            if entries.is_empty() {
                break;
            }

            for entry in entries {
                match from_value::<PlayerInfo>(entry) {
                    Ok(info) => self.state.player_info_changed(info),
                    Err(err) => log::warn!("skipping roster entry: {}", err),
                }
            }
            index += PAGE_SIZE;
        }

        log::debug!("initialized roster with {} players", self.state.player_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(login: &str, nick_name: &str) -> PlayerInfo {
        PlayerInfo {
            login: login.to_string(),
            nick_name: nick_name.to_string(),
            uid: 0,
            team_id: 0,
            spectator_status: 0,
            ladder_ranking: 0,
            flags: 0,
        }
    }

    #[test]
    fn roster_follows_connects_and_disconnects() {
        let state = GameState::new(DEFAULT_MAX_CHAT_LINES);

        state.player_connected("alpha");
        state.player_connected("beta");
        state.player_connected("alpha"); // repeated connect changes nothing
        assert_eq!(2, state.player_count());

        state.player_disconnected("alpha");
        assert_eq!(1, state.player_count());
        assert_eq!("beta", state.players()[0].login);

        state.player_disconnected("alpha"); // unknown logins are fine
        assert_eq!(1, state.player_count());
    }

    #[test]
    fn players_are_listed_in_connect_order() {
        let state = GameState::new(DEFAULT_MAX_CHAT_LINES);
        for login in &["c", "a", "b"] {
            state.player_connected(login);
        }
        let order: Vec<String> = state.players().into_iter().map(|p| p.login).collect();
        assert_eq!(vec!["c", "a", "b"], order);
    }

    #[test]
    fn info_upserts_keep_the_roster_consistent() {
        let state = GameState::new(DEFAULT_MAX_CHAT_LINES);

        // an info change for an unseen login counts as a connect
        state.player_info_changed(info("gamma", "Gamma"));
        assert_eq!(1, state.player_count());
        assert_eq!("Gamma", state.players()[0].nick_name);

        state.player_info_changed(info("gamma", "Renamed"));
        assert_eq!(1, state.player_count());
        assert_eq!("Renamed", state.players()[0].nick_name);
    }

    #[test]
    fn names_still_resolve_after_a_disconnect() {
        let state = GameState::new(DEFAULT_MAX_CHAT_LINES);
        state.player_info_changed(info("delta", "Delta"));
        state.player_disconnected("delta");

        assert_eq!(0, state.player_count());
        assert_eq!(
            "Delta",
            state.player_by_login("delta").unwrap().nick_name
        );

        state.chat_line("delta", "parting words");
        assert_eq!("Delta", state.chat()[0].nickname);
    }

    #[test]
    fn unknown_chatters_fall_back_to_their_login() {
        let state = GameState::new(DEFAULT_MAX_CHAT_LINES);
        state.chat_line("ghost", "boo");
        assert_eq!("ghost", state.chat()[0].nickname);
    }

    #[test]
    fn chat_is_capped_at_the_configured_length() {
        let state = GameState::new(3);
        for n in 0..10 {
            state.chat_line("epsilon", &format!("message {}", n));
        }
        let chat = state.chat();
        assert_eq!(3, chat.len());
        assert_eq!("message 7", chat[0].message);
        assert_eq!("message 9", chat[2].message);
    }

    #[test]
    fn match_start_is_updated() {
        let state = GameState::new(DEFAULT_MAX_CHAT_LINES);
        assert_eq!(0, state.match_start());
        state.match_started(1_200_300_400);
        assert_eq!(1_200_300_400, state.match_start());
    }
}
