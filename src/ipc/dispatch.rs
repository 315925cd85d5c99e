use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use super::runtime::socket_path;
use super::server::DaemonState;
use crate::controller::Event;
use crate::playback::{MediaTicket, PlaybackState};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientOp {
    Status,
    Touch {
        x: f32,
        y: f32,
        viewport: Option<(u32, u32)>,
    },
    Playback {
        ticket: MediaTicket,
        state: PlaybackState,
    },
    Poll,
    Reload,
    Use(String),
    List,
    Doctor,
    Shutdown,
}

pub fn parse_op(req: &Value) -> Result<ClientOp> {
    let op = req.get("op").and_then(Value::as_str).unwrap_or("");
    match op {
        "status" => Ok(ClientOp::Status),
        "touch" => {
            let x = number(req, "x")?;
            let y = number(req, "y")?;
            let dim = |key: &str| {
                req.get(key)
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
            };
            let viewport = dim("w").zip(dim("h"));
            Ok(ClientOp::Touch { x, y, viewport })
        }
        "playback" => {
            let ticket = req
                .get("ticket")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("playback needs a numeric 'ticket'"))?;
            let state = req
                .get("state")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("playback needs a 'state'"))?
                .parse()?;
            Ok(ClientOp::Playback {
                ticket: MediaTicket(ticket),
                state,
            })
        }
        "poll" => Ok(ClientOp::Poll),
        "reload" => Ok(ClientOp::Reload),
        "use" => {
            let name = req.get("profile").and_then(Value::as_str).unwrap_or("");
            if name.is_empty() {
                return Err(anyhow!("use needs a 'profile'"));
            }
            Ok(ClientOp::Use(name.to_string()))
        }
        "list" => Ok(ClientOp::List),
        "doctor" => Ok(ClientOp::Doctor),
        "shutdown" => Ok(ClientOp::Shutdown),
        _ => Err(anyhow!("unknown op: {op}")),
    }
}

fn number(req: &Value, key: &str) -> Result<f32> {
    req.get(key)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .ok_or_else(|| anyhow!("touch needs a numeric '{key}'"))
}

/// Runs one client request on the daemon thread, in inbox order.
pub(super) fn apply(op: ClientOp, st: &mut DaemonState) -> Value {
    match op {
        ClientOp::Status => json!({"ok": true, "data": {
            "active_profile": st.cfg.active_name,
            "socket": socket_path(),
            "kiosk": st.controller.snapshot(),
            "pending_timers": st.controller.timers().len(),
        }}),
        ClientOp::Touch { x, y, viewport } => {
            let viewport = viewport.unwrap_or_else(|| st.cfg.profile.display.viewport());
            st.controller.handle(Event::Touch {
                pointer: (x, y),
                viewport,
            });
            progress(st)
        }
        ClientOp::Playback { ticket, state } => {
            st.controller.handle(Event::Playback { ticket, state });
            progress(st)
        }
        ClientOp::Poll => json!({"ok": true, "data": {"commands": st.queue.drain()}}),
        ClientOp::Reload => match st.reload() {
            Ok(changed) => json!({"ok": true, "data": {
                "active_profile": st.cfg.active_name,
                "changed": changed,
            }}),
            Err(e) => json!({"ok": false, "error": e.to_string()}),
        },
        ClientOp::Use(name) => match st.use_profile(&name) {
            Ok(_) => json!({"ok": true, "data": {"active_profile": st.cfg.active_name}}),
            Err(e) => json!({"ok": false, "error": e.to_string()}),
        },
        ClientOp::List => {
            let list = st.cfg.list_profiles();
            json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        ClientOp::Doctor => json!({"ok": true, "data": st.cfg.doctor_report()}),
        ClientOp::Shutdown => {
            st.running = false;
            json!({"ok": true, "data": "shutting down"})
        }
    }
}

fn progress(st: &DaemonState) -> Value {
    let c = &st.controller;
    json!({"ok": true, "data": {
        "screen": c.screen(),
        "gate": c.gate(),
        "selection": c.selection(),
        "result": c.result_resource(),
    }})
}
