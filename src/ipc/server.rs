use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{self, BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        mpsc::{self, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::{self, ClientOp};
use super::pipeline::run_pipeline;
use super::runtime::socket_path;
use crate::config::{Display, KioskConfigState};
use crate::controller::{Controller, Event};
use crate::playback::CommandQueue;
use crate::timers::TimerQueue;
use crate::tracker::PointerDown;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything that mutates the kiosk goes through this one queue.
pub enum Inbox {
    Pointer(PointerDown),
    Client {
        op: ClientOp,
        reply: Sender<serde_json::Value>,
    },
    /// A profile file was written; only the active one triggers a reload.
    ProfileChanged(PathBuf),
    Shutdown,
}

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    let (tx, rx) = mpsc::channel::<Inbox>();

    // state
    let mut state = DaemonState::new(tx.clone())?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    let _watcher = match super::watch::watch_profiles(&state.cfg.profiles_dir, tx.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("profile watcher unavailable: {e}");
            None
        }
    };
    spawn_signal_listener(tx.clone())?;

    state.controller.start();

    // accept loop
    listener.set_nonblocking(true)?;
    while state.running {
        match listener.accept() {
            Ok((stream, _)) => {
                let tx = tx.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, tx) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("accept failed: {e}"),
        }

        while let Ok(msg) = rx.try_recv() {
            state.on_message(msg);
            if !state.running {
                break;
            }
        }
        state.pump_timers(Instant::now());

        thread::sleep(state.cfg.profile.timing.poll());
    }

    state.controller.shutdown();
    let _ = std::fs::remove_file(&sock);
    info!("daemon: stopped");
    Ok(())
}

fn handle_client(mut stream: UnixStream, tx: Sender<Inbox>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;

    let resp = match dispatch::parse_op(&req) {
        Ok(op) => {
            let (reply_tx, reply_rx) = mpsc::channel();
            tx.send(Inbox::Client {
                op,
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("daemon inbox closed"))?;
            reply_rx.recv_timeout(REPLY_TIMEOUT).unwrap_or_else(
                |_| serde_json::json!({"ok": false, "error": "daemon did not answer in time"}),
            )
        }
        Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
    };

    writeln!(stream, "{resp}")?;
    Ok(())
}

fn spawn_signal_listener(tx: Sender<Inbox>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for sig in signals.forever() {
            info!("daemon: signal {sig}, shutting down");
            if tx.send(Inbox::Shutdown).is_err() {
                break;
            }
        }
    });
    Ok(())
}

pub(super) struct DaemonState {
    pub cfg: KioskConfigState,
    pub controller: Controller<CommandQueue, TimerQueue>,
    pub queue: CommandQueue,
    pub running: bool,
    input: InputThread,
}

impl DaemonState {
    fn new(tx: Sender<Inbox>) -> Result<Self> {
        let cfg = KioskConfigState::load_or_install_default()?;
        let queue = CommandQueue::default();
        let controller = Controller::new(&cfg.profile, queue.clone(), TimerQueue::new());
        let input = InputThread::start(cfg.profile.display, tx);
        Ok(Self {
            cfg,
            controller,
            queue,
            running: true,
            input,
        })
    }

    fn on_message(&mut self, msg: Inbox) {
        match msg {
            Inbox::Pointer(down) => {
                let viewport = self.cfg.profile.display.viewport();
                self.controller.handle(Event::Touch {
                    pointer: down.to_viewport(viewport),
                    viewport,
                });
            }
            Inbox::Client { op, reply } => {
                let resp = dispatch::apply(op, self);
                let _ = reply.send(resp);
            }
            Inbox::ProfileChanged(path) => {
                if !self.cfg.is_active_file(&path) {
                    debug!("ignoring change to inactive profile {}", path.display());
                    return;
                }
                if let Err(e) = self.reload() {
                    error!("reload failed: {e}");
                }
            }
            Inbox::Shutdown => self.running = false,
        }
    }

    fn pump_timers(&mut self, now: Instant) {
        pump_timers(&mut self.controller, now);
    }

    /// Keeps the last good profile when the file on disk does not load, and
    /// leaves the running session alone when nothing in it changed.
    pub fn reload(&mut self) -> Result<bool> {
        if !self.cfg.reload()? {
            debug!("profile '{}' unchanged", self.cfg.active_name);
            return Ok(false);
        }
        self.apply_profile();
        info!("profile '{}' reloaded", self.cfg.active_name);
        Ok(true)
    }

    pub fn use_profile(&mut self, name: &str) -> Result<()> {
        self.cfg.set_active(name)?;
        self.apply_profile();
        info!("switched active profile to {}", self.cfg.active_name);
        Ok(())
    }

    fn apply_profile(&mut self) {
        self.controller.reconfigure(&self.cfg.profile);
        self.input.update_display(self.cfg.profile.display);
    }
}

/// Delivers every timer due at `now`, one at a time, so an expiry that
/// cancels a later timer in the same poll keeps it from firing.
fn pump_timers(controller: &mut Controller<CommandQueue, TimerQueue>, now: Instant) {
    while let Some(handle) = controller.timers_mut().pop_due(now) {
        controller.handle(Event::TimerFired(handle));
    }
}

struct InputThread {
    display: Arc<Mutex<Display>>,
    _thread: thread::JoinHandle<()>,
}

impl InputThread {
    fn start(display: Display, tx: Sender<Inbox>) -> Self {
        let display_arc = Arc::new(Mutex::new(display));
        let display_clone = display_arc.clone();
        let handle = thread::spawn(move || {
            if let Err(e) = run_pipeline(display_clone, tx) {
                error!("touch pipeline failed: {e}");
            }
        });
        Self {
            display: display_arc,
            _thread: handle,
        }
    }

    fn update_display(&self, display: Display) {
        if let Ok(mut d) = self.display.lock() {
            *d = display;
        }
    }
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path();
    if !sock.exists() {
        return Err(anyhow!(
            "kioskflow daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::default_profile;
    use crate::controller::Screen;
    use crate::grid;
    use crate::playback::{PlaybackState, PlayerCommand};

    type Kiosk = Controller<CommandQueue, TimerQueue>;

    const VIEW: (u32, u32) = (1080, 1920);

    fn kiosk() -> (Kiosk, Instant) {
        let t0 = Instant::now();
        let mut c = Controller::new(&default_profile(), CommandQueue::default(), TimerQueue::new());
        c.start();
        (c, t0)
    }

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    fn ready(c: &mut Kiosk) {
        let ticket = c.snapshot().ticket.expect("media issued");
        c.handle(Event::Playback {
            ticket,
            state: PlaybackState::Ready,
        });
    }

    fn tap(c: &mut Kiosk, index: u8) {
        let n = grid::grid_size(c.screen());
        let cw = VIEW.0 as f32 / n as f32;
        let ch = VIEW.1 as f32 / n as f32;
        let pointer = (
            ((index % n) as f32 + 0.5) * cw,
            ((index / n) as f32 + 0.5) * ch,
        );
        c.handle(Event::Touch {
            pointer,
            viewport: VIEW,
        });
    }

    /// Ready, settle at `ms`, then tap `cell`.
    fn step(c: &mut Kiosk, t0: Instant, ms: u64, cell: u8) {
        ready(c);
        pump_timers(c, at(t0, ms));
        assert!(c.gate().touch_enabled, "not settled on {}", c.screen());
        tap(c, cell);
    }

    fn last_resource(c: &Kiosk) -> Option<String> {
        c.player()
            .drain()
            .into_iter()
            .rev()
            .find_map(|cmd| match cmd {
                PlayerCommand::Issue { resource, .. } => Some(resource),
                PlayerCommand::Stop => None,
            })
    }

    #[test]
    fn settle_and_idle_due_in_one_poll_fire_in_deadline_order() {
        let (mut c, t0) = kiosk();
        step(&mut c, t0, 1_000, 4);
        assert_eq!(c.screen(), Screen::AskGender);
        ready(&mut c);

        // settle is due at ~1.8s, the gender idle timeout at ~13s
        pump_timers(&mut c, at(t0, 20_000));
        assert_eq!(c.screen(), Screen::Idle);
        assert_eq!(last_resource(&c).as_deref(), Some("start"));
        assert!(!c.gate().touch_enabled);
        assert!(c.snapshot().idle_timer_armed);
        assert_eq!(c.timers().len(), 1);
    }

    #[test]
    fn idle_expiry_cancels_a_settle_due_in_the_same_poll() {
        let (mut c, t0) = kiosk();
        step(&mut c, t0, 1_000, 4);
        assert_eq!(c.screen(), Screen::AskGender);

        pump_timers(&mut c, at(t0, 12_500));
        assert_eq!(c.screen(), Screen::AskGender);
        ready(&mut c);

        // idle timeout at ~13s comes before the settle at ~13.3s
        pump_timers(&mut c, at(t0, 14_000));
        assert_eq!(c.screen(), Screen::Idle);
        assert!(!c.gate().touch_enabled);
        assert!(!c.gate().media_ready);
        assert_eq!(c.timers().len(), 1);
    }

    #[test]
    fn superseded_idle_timer_is_never_delivered() {
        let (mut c, t0) = kiosk();
        step(&mut c, t0, 1_000, 4);
        step(&mut c, t0, 2_000, 8);
        step(&mut c, t0, 3_000, 6);
        step(&mut c, t0, 4_000, 8);
        assert_eq!(c.screen(), Screen::Result);
        assert_eq!(c.result_resource(), Some("v1"));
        ready(&mut c);
        pump_timers(&mut c, at(t0, 5_000));
        assert!(c.gate().touch_enabled);

        // result idle timeout was armed at ~4s; a miss at 10s replaces it
        pump_timers(&mut c, at(t0, 10_000));
        tap(&mut c, 0);
        assert!(!c.gate().product_playing);
        assert_eq!(c.timers().len(), 1);

        pump_timers(&mut c, at(t0, 17_000));
        assert_eq!(c.screen(), Screen::Result);

        pump_timers(&mut c, at(t0, 22_500));
        assert_eq!(c.screen(), Screen::Idle);
        assert!(c.selection().is_empty());
    }
}
