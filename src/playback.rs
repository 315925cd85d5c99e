//! Commands to the external video player and the events it reports back.

use anyhow::{Result, anyhow};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    str::FromStr,
    sync::{Arc, Mutex},
};

/// Identifies one `issue` call. Player events carry the ticket of the item
/// they describe so a late event for a replaced item can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaTicket(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Loading,
    Ready,
    Ended,
}

impl FromStr for PlaybackState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "loading" => Ok(Self::Loading),
            "ready" => Ok(Self::Ready),
            "ended" => Ok(Self::Ended),
            other => Err(anyhow!("unknown playback state: {other}")),
        }
    }
}

/// The external player. Decoding and rendering live behind this.
pub trait PlaybackSession {
    /// Replace whatever is playing with `resource`. Readiness for the previous
    /// item is void from this point on.
    fn issue(&mut self, ticket: MediaTicket, resource: &str, looping: bool);
    fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum PlayerCommand {
    Issue {
        ticket: MediaTicket,
        resource: String,
        looping: bool,
    },
    Stop,
}

/// Commands waiting for the embedding player to collect them over IPC.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<PlayerCommand>>>,
}

impl CommandQueue {
    pub fn drain(&self) -> Vec<PlayerCommand> {
        match self.inner.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    fn push(&self, cmd: PlayerCommand) {
        match self.inner.lock() {
            Ok(mut q) => q.push_back(cmd),
            Err(poisoned) => poisoned.into_inner().push_back(cmd),
        }
    }
}

impl PlaybackSession for CommandQueue {
    fn issue(&mut self, ticket: MediaTicket, resource: &str, looping: bool) {
        info!("player: issue #{} '{}' (loop={})", ticket.0, resource, looping);
        self.push(PlayerCommand::Issue {
            ticket,
            resource: resource.to_string(),
            looping,
        });
    }

    fn stop(&mut self) {
        info!("player: stop");
        self.push(PlayerCommand::Stop);
    }
}
