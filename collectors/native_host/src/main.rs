mod frame;

use clap::Parser;
use frame::{read_frame, write_frame};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "native_host", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17700
    #[arg(long, default_value = "http://127.0.0.1:17700")]
    core_url: String,

    /// How often queued browser commands are fetched from the core (milliseconds).
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,
}

/// Frames from the extension.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
enum Inbound {
    Event {
        event: Value,
    },
    Message {
        id: Value,
        #[serde(default)]
        sender: Option<Value>,
        message: Value,
    },
}

/// Frames to the extension.
#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
enum Outbound {
    Reply { id: Value, reply: Value },
    Commands { commands: Vec<Value> },
}

#[derive(Deserialize)]
struct CommandsResponse {
    ok: bool,
    #[serde(default)]
    commands: Vec<Value>,
}

#[derive(Deserialize)]
struct MessageResponse {
    reply: Value,
    #[serde(default)]
    commands: Vec<Value>,
}

#[derive(Clone)]
struct CoreClient {
    client: Client,
    base: String,
}

impl CoreClient {
    fn new(core_url: &str) -> Self {
        Self {
            client: Client::new(),
            base: core_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_event(&self, event: &Value) -> anyhow::Result<Vec<Value>> {
        let res = self
            .client
            .post(format!("{}/event", self.base))
            .json(event)
            .send()
            .await?;
        if !res.status().is_success() {
            anyhow::bail!("http_{}", res.status().as_u16());
        }
        let body: CommandsResponse = res.json().await?;
        if !body.ok {
            anyhow::bail!("not_ok");
        }
        Ok(body.commands)
    }

    async fn post_message(
        &self,
        sender: Option<Value>,
        message: Value,
    ) -> anyhow::Result<MessageResponse> {
        let res = self
            .client
            .post(format!("{}/message", self.base))
            .json(&message_body(sender, message))
            .send()
            .await?;
        if !res.status().is_success() {
            anyhow::bail!("http_{}", res.status().as_u16());
        }
        Ok(res.json().await?)
    }

    async fn commands(&self) -> anyhow::Result<Vec<Value>> {
        let res = self
            .client
            .get(format!("{}/commands", self.base))
            .send()
            .await?;
        if !res.status().is_success() {
            anyhow::bail!("http_{}", res.status().as_u16());
        }
        let body: CommandsResponse = res.json().await?;
        if !body.ok {
            anyhow::bail!("not_ok");
        }
        Ok(body.commands)
    }
}

fn message_body(sender: Option<Value>, message: Value) -> Value {
    match sender {
        Some(sender) if sender.is_object() => json!({"sender": sender, "message": message}),
        _ => json!({"message": message}),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries protocol frames.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "native_host=info".into()),
        )
        .init();

    let args = Args::parse();
    let core = CoreClient::new(&args.core_url);
    info!("Native host started. Relaying to {}", core.base);

    let (tx, mut rx) = mpsc::channel::<Outbound>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = rx.recv().await {
            if let Err(err) = write_frame(&mut stdout, &frame).await {
                error!("write frame failed: {err}");
                break;
            }
        }
    });
    let poller = tokio::spawn(poll_commands(
        core.clone(),
        tx.clone(),
        Duration::from_millis(args.poll_ms.max(100)),
    ));

    let mut stdin = tokio::io::stdin();
    loop {
        let frame: Value = match read_frame(&mut stdin).await {
            Ok(Some(v)) => v,
            Ok(None) => {
                info!("browser closed the pipe");
                break;
            }
            Err(err) => {
                error!("read frame failed: {err}");
                break;
            }
        };
        match serde_json::from_value::<Inbound>(frame) {
            Ok(inbound) => relay(&core, &tx, inbound).await,
            Err(err) => warn!("unrecognized frame: {err}"),
        }
    }

    poller.abort();
    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Forwards one inbound frame and queues whatever comes back. Frames are
/// relayed one at a time so the core sees browser events in order.
async fn relay(core: &CoreClient, tx: &mpsc::Sender<Outbound>, inbound: Inbound) {
    match inbound {
        Inbound::Event { event } => match core.post_event(&event).await {
            Ok(commands) => send_commands(tx, commands).await,
            Err(err) => warn!("post event failed: {err}"),
        },
        Inbound::Message {
            id,
            sender,
            message,
        } => {
            let (reply, commands) = match core.post_message(sender, message).await {
                Ok(res) => (res.reply, res.commands),
                Err(err) => {
                    warn!("post message failed: {err}");
                    (json!({"ok": false, "error": "core_unavailable"}), Vec::new())
                }
            };
            let _ = tx.send(Outbound::Reply { id, reply }).await;
            send_commands(tx, commands).await;
        }
    }
}

async fn send_commands(tx: &mpsc::Sender<Outbound>, commands: Vec<Value>) {
    if commands.is_empty() {
        return;
    }
    debug!(count = commands.len(), "commands queued");
    let _ = tx.send(Outbound::Commands { commands }).await;
}

/// Tick-driven effects (badge, overlay ticks, break warnings) only reach the
/// browser through this poll.
async fn poll_commands(core: CoreClient, tx: mpsc::Sender<Outbound>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut failing = false;
    loop {
        interval.tick().await;
        match core.commands().await {
            Ok(commands) => {
                if failing {
                    info!("core reachable again");
                    failing = false;
                }
                send_commands(&tx, commands).await;
            }
            Err(err) => {
                if !failing {
                    warn!("poll commands failed: {err}");
                    failing = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frames_parse_by_channel() {
        let f: Inbound = serde_json::from_value(json!({
            "channel": "event",
            "event": {"type": "TAB_ACTIVATED", "tabId": 3, "windowId": 1},
        }))
        .unwrap();
        assert!(matches!(f, Inbound::Event { .. }));

        let f: Inbound = serde_json::from_value(json!({
            "channel": "message",
            "id": 9,
            "message": {"type": "GET_SETTINGS"},
        }))
        .unwrap();
        assert_eq!(
            f,
            Inbound::Message {
                id: json!(9),
                sender: None,
                message: json!({"type": "GET_SETTINGS"}),
            }
        );

        assert!(serde_json::from_value::<Inbound>(json!({"channel": "other"})).is_err());
    }

    #[test]
    fn outbound_frames_carry_channel_tag() {
        let v = serde_json::to_value(Outbound::Reply {
            id: json!("a1"),
            reply: json!({"ok": true}),
        })
        .unwrap();
        assert_eq!(v, json!({"channel": "reply", "id": "a1", "reply": {"ok": true}}));

        let v = serde_json::to_value(Outbound::Commands {
            commands: vec![json!({"type": "SET_BADGE", "text": "3m"})],
        })
        .unwrap();
        assert_eq!(v["channel"], "commands");
    }

    #[test]
    fn message_body_drops_missing_or_malformed_sender() {
        let m = json!({"type": "USER_ACTIVITY"});
        assert_eq!(
            message_body(Some(json!({"tabId": 4})), m.clone()),
            json!({"sender": {"tabId": 4}, "message": m})
        );
        assert_eq!(message_body(None, m.clone()), json!({"message": m}));
        assert_eq!(message_body(Some(Value::Null), m.clone()), json!({"message": m}));
    }
}
