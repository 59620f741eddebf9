use crate::{client::Client, error::GameError, session::SessionManager};
use futures_util::{select, FutureExt, SinkExt, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

#[derive(Error, Debug)]
enum WsError {
    #[error("violation of the application-layer protocol")]
    ProtocolError,
}

pub async fn accept_connection(stream: TcpStream, manager: &SessionManager) {
    log::info!("Accepted new connection");

    let Ok(stream) = tokio_tungstenite::accept_async(stream).await else {
        log::error!("Error occured during websocket handshake");
        return;
    };
    let (mut write, read) = stream.split();
    let mut read = read.fuse();

    let mut client = Client::new(manager);

    loop {
        select! {
            msg = read.try_next() => {
                let Ok(Some(Message::Text(msg))) = msg else {
                    break;
                };
                let Ok(msg) = serde_json::from_str::<Value>(&msg) else {
                    log::error!("Invalid JSON received: {}", &msg);
                    break;
                };
                let Ok(req) = parse_request(&msg) else {
                    log::error!("Invalid message received: {}", &msg);
                    break;
                };
                client.heartbeat();
                match process_request(req, &mut client) {
                    Ok(Some(reply)) => {
                        let reply = format_reply(reply);
                        write.send(Message::Text(reply.to_string())).await.ok();
                    },
                    Ok(None) => {},
                    Err(err) => {
                        let reply = json!({
                            "type": "error",
                            "error": err.to_string()
                        });
                        write.send(Message::Text(reply.to_string())).await.ok();
                    }
                }
            },
            event = client.next_event().fuse() => {
                let reply = json!({
                    "type": "event",
                    "event": event
                });
                if write.send(Message::Text(reply.to_string())).await.is_err() {
                    log::error!("Could not send websockets message");
                    break;
                }
            }
        }
    }

    client.leave();
}

/// A message sent by a game client to the server.
enum Request {
    CreateGame { max_players: Option<usize> },
    Join { game_id: String, name: String },
    Ready,
    Unready,
    MafiaVote { target: String },
    Investigate { target: String },
    Save { target: String },
    DayVote { target: String },
    Chat { message: String },
    GetState,
}

/// A message sent by the server to a game client.
enum Response {
    GameCreated { game_id: String },
    GameJoined { game_id: String, name: String },
    State(Value),
}

/// Parses a websockets message from the client.
fn parse_request(req: &Value) -> Result<Request, WsError> {
    let target = |req: &Value| -> Result<String, WsError> {
        req["target"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or(WsError::ProtocolError)
    };
    match req["type"].as_str().unwrap_or("") {
        "create_game" => Ok(Request::CreateGame {
            max_players: req["maxPlayers"].as_u64().map(|n| n as usize),
        }),
        "join" => {
            let game_id = req["gameId"]
                .as_str()
                .ok_or(WsError::ProtocolError)?
                .to_string();
            let name = req["name"]
                .as_str()
                .ok_or(WsError::ProtocolError)?
                .to_string();
            Ok(Request::Join { game_id, name })
        }
        "ready" => Ok(Request::Ready),
        "unready" => Ok(Request::Unready),
        "mafia_vote" => Ok(Request::MafiaVote { target: target(req)? }),
        "investigate" => Ok(Request::Investigate { target: target(req)? }),
        "save" => Ok(Request::Save { target: target(req)? }),
        "day_vote" => Ok(Request::DayVote { target: target(req)? }),
        "chat" => {
            let message = req["message"]
                .as_str()
                .ok_or(WsError::ProtocolError)?
                .to_string();
            Ok(Request::Chat { message })
        }
        "get_state" => Ok(Request::GetState),
        _ => Err(WsError::ProtocolError),
    }
}

/// Processes a request from the client.
fn process_request(req: Request, client: &mut Client) -> Result<Option<Response>, GameError> {
    match req {
        Request::CreateGame { max_players } => {
            let game_id = client.create_session(max_players)?;
            Ok(Some(Response::GameCreated { game_id }))
        }
        Request::Join { game_id, name } => {
            client.join(&game_id, &name)?;
            Ok(Some(Response::GameJoined { game_id, name }))
        }
        Request::Ready => client.set_ready().map(|_| None),
        Request::Unready => client.set_unready().map(|_| None),
        Request::MafiaVote { target } => client.cast_mafia_vote(&target).map(|_| None),
        Request::Investigate { target } => client.investigate(&target).map(|_| None),
        Request::Save { target } => client.doctor_save(&target).map(|_| None),
        Request::DayVote { target } => client.cast_day_vote(&target).map(|_| None),
        Request::Chat { message } => client.chat(&message).map(|_| None),
        Request::GetState => Ok(Some(Response::State(client.state()?))),
    }
}

/// Formats a reply to the client to be sent over websockets.
fn format_reply(res: Response) -> Value {
    match res {
        Response::GameCreated { game_id } => json!({
            "type": "game_created",
            "gameId": game_id
        }),
        Response::GameJoined { game_id, name } => json!({
            "type": "game_joined",
            "gameId": game_id,
            "name": name
        }),
        Response::State(state) => json!({
            "type": "state",
            "state": state
        }),
    }
}
