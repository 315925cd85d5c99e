//! The kiosk's screen state machine.
//!
//! All state lives in [`Controller`] and changes only inside
//! [`Controller::handle`]. Touches, player notifications and timer expiries
//! arrive as [`Event`]s through one inbox, so they are applied strictly one
//! after another.

use anyhow::anyhow;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::config::{Media, Profile, Screens, Timing};
use crate::grid::{self, Cell};
use crate::playback::{MediaTicket, PlaybackSession, PlaybackState};
use crate::resolver::{ResourceId, Resolver};
use crate::selection::{self, Selection};
use crate::timers::{TimerHandle, TimerService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Idle,
    AskGender,
    AskAge,
    AskLifestyle,
    AskRefinement,
    Result,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Idle => "idle",
            Screen::AskGender => "ask_gender",
            Screen::AskAge => "ask_age",
            Screen::AskLifestyle => "ask_lifestyle",
            Screen::AskRefinement => "ask_refinement",
            Screen::Result => "result",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Screen {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "idle" => Ok(Screen::Idle),
            "ask_gender" | "gender" => Ok(Screen::AskGender),
            "ask_age" | "age" => Ok(Screen::AskAge),
            "ask_lifestyle" | "lifestyle" => Ok(Screen::AskLifestyle),
            "ask_refinement" | "refinement" => Ok(Screen::AskRefinement),
            "result" => Ok(Screen::Result),
            other => Err(anyhow!("unknown screen: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Touch-down of the first active pointer.
    Touch {
        pointer: (f32, f32),
        viewport: (u32, u32),
    },
    Playback {
        ticket: MediaTicket,
        state: PlaybackState,
    },
    TimerFired(TimerHandle),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackGate {
    pub touch_enabled: bool,
    pub media_ready: bool,
    pub product_playing: bool,
}

/// What happens when the current item reports `Ended`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Continuation {
    #[default]
    NoFollowUp,
    ReturnToResult,
}

/// Where the current item is in its ready → settle → advance sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaPhase {
    AwaitingReady,
    AwaitingSettle(TimerHandle),
    AwaitingAdvance(TimerHandle),
    Settled,
}

impl MediaPhase {
    fn timer(&self) -> Option<TimerHandle> {
        match *self {
            MediaPhase::AwaitingSettle(h) | MediaPhase::AwaitingAdvance(h) => Some(h),
            MediaPhase::AwaitingReady | MediaPhase::Settled => None,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveMedia {
    ticket: MediaTicket,
    resource: ResourceId,
    continuation: Continuation,
    phase: MediaPhase,
}

#[derive(Debug, Clone, Copy)]
struct IdleTimer {
    handle: TimerHandle,
    screen: Screen,
    entry: u64,
}

enum Action {
    Enter(Screen, Selection),
    PlayProduct(ResourceId),
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub screen: Screen,
    pub gate: PlaybackGate,
    pub selection: Selection,
    pub result: Option<ResourceId>,
    pub ticket: Option<MediaTicket>,
    pub playing: Option<ResourceId>,
    pub idle_timer_armed: bool,
}

pub struct Controller<P, T> {
    screens: Screens,
    media: Media,
    timing: Timing,
    resolver: Resolver,

    player: P,
    timers: T,

    screen: Screen,
    selection: Selection,
    gate: PlaybackGate,
    result: Option<ResourceId>,
    active: Option<ActiveMedia>,
    idle_timer: Option<IdleTimer>,
    next_ticket: u64,
    // bumped on every screen entry, including re-entering Result after a product clip
    entries: u64,
}

impl<P: PlaybackSession, T: TimerService> Controller<P, T> {
    pub fn new(profile: &Profile, player: P, timers: T) -> Self {
        Self {
            screens: profile.screens.clone(),
            media: profile.media.clone(),
            timing: profile.timing,
            resolver: Resolver::from_profile(profile),
            player,
            timers,
            screen: Screen::Idle,
            selection: Selection::default(),
            gate: PlaybackGate::default(),
            result: None,
            active: None,
            idle_timer: None,
            next_ticket: 0,
            entries: 0,
        }
    }

    /// First entry into `Idle`.
    pub fn start(&mut self) {
        self.enter_idle();
    }

    /// Swap in new tables and restart from `Idle`. Tickets keep counting so
    /// late events for the old media stay distinguishable.
    pub fn reconfigure(&mut self, profile: &Profile) {
        self.screens = profile.screens.clone();
        self.media = profile.media.clone();
        self.timing = profile.timing;
        self.resolver = Resolver::from_profile(profile);
        self.enter_idle();
    }

    pub fn shutdown(&mut self) {
        self.cancel_idle_timer();
        self.cancel_phase_timer();
        self.active = None;
        self.gate = PlaybackGate::default();
        self.player.stop();
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Touch { pointer, viewport } => self.on_touch(pointer, viewport),
            Event::Playback { ticket, state } => self.on_playback(ticket, state),
            Event::TimerFired(handle) => self.on_timer(handle),
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn gate(&self) -> PlaybackGate {
        self.gate
    }

    pub fn result_resource(&self) -> Option<&str> {
        self.result.as_deref()
    }

    #[cfg(test)]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    #[cfg(test)]
    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            screen: self.screen,
            gate: self.gate,
            selection: self.selection.clone(),
            result: self.result.clone(),
            ticket: self.active.as_ref().map(|a| a.ticket),
            playing: self.active.as_ref().map(|a| a.resource.clone()),
            idle_timer_armed: self.idle_timer.is_some(),
        }
    }

    fn on_touch(&mut self, pointer: (f32, f32), viewport: (u32, u32)) {
        if !(self.gate.touch_enabled && self.gate.media_ready) {
            debug!("touch dropped: {} not settled", self.screen);
            return;
        }
        let Some(cell) = grid::classify(pointer, viewport, self.screen) else {
            debug!("touch dropped: degenerate viewport {viewport:?}");
            return;
        };

        if self.screen == Screen::Result && !self.gate.product_playing {
            self.arm_idle_timer();
        }

        match self.dispatch(cell) {
            Some(Action::Enter(target, selection)) => {
                self.enter(target, selection);
            }
            Some(Action::PlayProduct(resource)) => self.play_product(resource),
            None => debug!("cell {} ignored on {}", cell.index, self.screen),
        }
    }

    fn dispatch(&self, cell: Cell) -> Option<Action> {
        let sel = &self.selection;
        match self.screen {
            Screen::Idle => {
                self.screens.idle.answer_at(cell.index)?;
                Some(Action::Enter(Screen::AskGender, sel.clone()))
            }
            Screen::AskGender => {
                let gender = self.screens.gender.answer_at(cell.index)?;
                Some(Action::Enter(Screen::AskAge, sel.with_gender(gender)))
            }
            Screen::AskAge => {
                let age = self.screens.age.answer_at(cell.index)?;
                Some(Action::Enter(Screen::AskLifestyle, sel.with_age(age)))
            }
            Screen::AskLifestyle => {
                let lifestyle = self.screens.lifestyle.answer_at(cell.index)?;
                let next = if self.resolver.refinement_enabled() {
                    Screen::AskRefinement
                } else {
                    Screen::Result
                };
                Some(Action::Enter(next, sel.with_lifestyle(lifestyle)))
            }
            Screen::AskRefinement => {
                let arity = selection::refinement_arity(sel, &self.resolver)?;
                let option = self.resolver.refinement_option(arity, cell)?;
                Some(Action::Enter(
                    Screen::Result,
                    sel.with_refinement_option(option),
                ))
            }
            Screen::Result => {
                if self.gate.product_playing {
                    return None;
                }
                let result = self.result.as_deref()?;
                let zone = self.resolver.hit_zone(result, cell)?;
                Some(Action::PlayProduct(zone.resource.clone()))
            }
        }
    }

    fn on_playback(&mut self, ticket: MediaTicket, state: PlaybackState) {
        let Some(active) = self.active.as_mut() else {
            debug!("{state:?} for #{} with nothing playing", ticket.0);
            return;
        };
        if active.ticket != ticket {
            debug!(
                "stale {state:?} for #{} (current #{})",
                ticket.0, active.ticket.0
            );
            return;
        }

        match state {
            PlaybackState::Loading => {
                if let Some(h) = active.phase.timer() {
                    self.timers.cancel(h);
                }
                active.phase = MediaPhase::AwaitingReady;
                self.gate.touch_enabled = false;
                self.gate.media_ready = false;
            }
            PlaybackState::Ready => {
                // looping items may report Ready again on wrap-around
                if active.phase != MediaPhase::AwaitingReady {
                    return;
                }
                self.gate.media_ready = true;
                let settle = self.timers.schedule(self.timing.touch_enable_delay());
                active.phase = MediaPhase::AwaitingSettle(settle);
            }
            PlaybackState::Ended => {
                let follow_up = std::mem::take(&mut active.continuation);
                if follow_up == Continuation::ReturnToResult {
                    self.return_to_result();
                }
            }
        }
    }

    fn on_timer(&mut self, handle: TimerHandle) {
        if let Some(idle) = self.idle_timer.filter(|t| t.handle == handle) {
            self.idle_timer = None;
            let unchanged = idle.screen == self.screen && idle.entry == self.entries;
            if unchanged && !self.gate.product_playing {
                info!("idle timeout on {}", self.screen);
                self.enter_idle();
            }
            return;
        }

        let Some(active) = self.active.as_mut() else {
            debug!("timer {handle:?} fired with nothing playing");
            return;
        };
        let advance_to = self
            .screens
            .layout(self.screen)
            .and_then(|l| l.advance_to)
            .filter(|_| !self.gate.product_playing);

        let phase = active.phase;
        match phase {
            MediaPhase::AwaitingSettle(h) if h == handle => {
                self.gate.touch_enabled = true;
                active.phase = match advance_to {
                    Some(_) => {
                        MediaPhase::AwaitingAdvance(self.timers.schedule(self.timing.advance_delay()))
                    }
                    None => MediaPhase::Settled,
                };
            }
            MediaPhase::AwaitingAdvance(h) if h == handle => {
                active.phase = MediaPhase::Settled;
                if let Some(next) = advance_to {
                    let selection = self.selection.clone();
                    self.enter(next, selection);
                }
            }
            _ => debug!("stale timer {handle:?}"),
        }
    }

    /// State-entry protocol. Returns false, leaving everything untouched, when
    /// the target has no media for `selection`.
    fn enter(&mut self, target: Screen, selection: Selection) -> bool {
        let Some(resource) = self.media_for(target, &selection) else {
            debug!(
                "no media for {target} with {:?}; staying on {}",
                selection, self.screen
            );
            return false;
        };

        self.cancel_idle_timer();
        self.result = (target == Screen::Result).then(|| resource.clone());
        self.selection = selection;
        self.gate.product_playing = false;

        info!("screen: {} -> {target} ('{resource}')", self.screen);
        self.screen = target;
        self.entries += 1;
        self.issue(resource, true, Continuation::NoFollowUp);
        self.arm_idle_timer();
        true
    }

    fn enter_idle(&mut self) {
        if !self.selection.is_empty() {
            debug!("clearing selection {:?}", self.selection);
        }
        self.enter(Screen::Idle, Selection::default());
    }

    fn media_for(&self, target: Screen, selection: &Selection) -> Option<ResourceId> {
        match target {
            Screen::Idle => Some(self.media.idle.clone()),
            Screen::AskGender => Some(self.media.gender.clone()),
            Screen::AskAge => Some(self.media.age.clone()),
            Screen::AskLifestyle => Some(self.media.lifestyle.clone()),
            Screen::AskRefinement => {
                let triple = selection::triple_key(selection)?;
                self.resolver.resolve_refinement_prompt(&triple).cloned()
            }
            Screen::Result => {
                let key = selection::composite_key(selection, &self.resolver)?;
                self.resolver.resolve_result(&key).cloned()
            }
        }
    }

    fn play_product(&mut self, resource: ResourceId) {
        info!("product: '{resource}'");
        self.cancel_idle_timer();
        self.gate.product_playing = true;
        self.issue(resource, false, Continuation::ReturnToResult);
    }

    fn return_to_result(&mut self) {
        self.gate.product_playing = false;
        let Some(resource) = self.result.clone() else {
            self.enter_idle();
            return;
        };
        info!("product finished; back to '{resource}'");
        self.entries += 1;
        self.issue(resource, true, Continuation::NoFollowUp);
        self.arm_idle_timer();
    }

    fn issue(&mut self, resource: ResourceId, looping: bool, continuation: Continuation) {
        self.cancel_phase_timer();
        self.gate.touch_enabled = false;
        self.gate.media_ready = false;

        self.next_ticket += 1;
        let ticket = MediaTicket(self.next_ticket);
        self.player.issue(ticket, &resource, looping);
        self.active = Some(ActiveMedia {
            ticket,
            resource,
            continuation,
            phase: MediaPhase::AwaitingReady,
        });
    }

    fn arm_idle_timer(&mut self) {
        self.cancel_idle_timer();
        let handle = self.timers.schedule(self.timing.idle_timeout());
        self.idle_timer = Some(IdleTimer {
            handle,
            screen: self.screen,
            entry: self.entries,
        });
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(t) = self.idle_timer.take() {
            self.timers.cancel(t.handle);
        }
    }

    fn cancel_phase_timer(&mut self) {
        if let Some(h) = self.active.as_ref().and_then(|a| a.phase.timer()) {
            self.timers.cancel(h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{default_profile, refined_profile};
    use std::time::Duration;

    #[derive(Default)]
    struct Player {
        issued: Vec<(MediaTicket, String, bool)>,
        stopped: usize,
    }

    impl PlaybackSession for Player {
        fn issue(&mut self, ticket: MediaTicket, resource: &str, looping: bool) {
            self.issued.push((ticket, resource.to_string(), looping));
        }

        fn stop(&mut self) {
            self.stopped += 1;
        }
    }

    #[derive(Default)]
    struct Timers {
        next: u64,
        live: Vec<(TimerHandle, Duration)>,
    }

    impl TimerService for Timers {
        fn schedule(&mut self, after: Duration) -> TimerHandle {
            self.next += 1;
            let h = TimerHandle::new(self.next);
            self.live.push((h, after));
            h
        }

        fn cancel(&mut self, handle: TimerHandle) {
            self.live.retain(|(h, _)| *h != handle);
        }
    }

    type Kiosk = Controller<Player, Timers>;

    const VIEW: (u32, u32) = (1080, 1920);

    fn kiosk(profile: &Profile) -> Kiosk {
        let mut c = Controller::new(profile, Player::default(), Timers::default());
        c.start();
        c
    }

    fn last_issue(c: &Kiosk) -> (MediaTicket, String, bool) {
        c.player().issued.last().cloned().expect("something issued")
    }

    fn ready(c: &mut Kiosk) {
        let ticket = last_issue(c).0;
        c.handle(Event::Playback {
            ticket,
            state: PlaybackState::Ready,
        });
    }

    fn settle(c: &mut Kiosk) {
        ready(c);
        let phase = c.active.as_ref().map(|a| a.phase);
        let Some(MediaPhase::AwaitingSettle(h)) = phase else {
            panic!("expected settle phase, got {phase:?}");
        };
        c.handle(Event::TimerFired(h));
    }

    fn tap(c: &mut Kiosk, index: u8) {
        let n = grid::grid_size(c.screen());
        let (w, h) = VIEW;
        let cw = w as f32 / n as f32;
        let ch = h as f32 / n as f32;
        let pointer = (
            ((index % n) as f32 + 0.5) * cw,
            ((index / n) as f32 + 0.5) * ch,
        );
        c.handle(Event::Touch {
            pointer,
            viewport: VIEW,
        });
    }

    fn idle_timers(c: &Kiosk) -> usize {
        let idle = c.timing.idle_timeout();
        c.timers().live.iter().filter(|(_, d)| *d == idle).count()
    }

    fn idle_handle(c: &Kiosk) -> TimerHandle {
        c.idle_timer.expect("idle timer armed").handle
    }

    /// Idle → gender → age → lifestyle with every screen settled in between.
    fn answer(c: &mut Kiosk, gender: u8, age: u8, lifestyle: u8) {
        settle(c);
        tap(c, 4);
        settle(c);
        tap(c, gender);
        settle(c);
        tap(c, age);
        settle(c);
        tap(c, lifestyle);
    }

    #[test]
    fn first_entry_is_idle_with_looped_start_video() {
        let c = kiosk(&default_profile());
        assert_eq!(c.screen(), Screen::Idle);
        let (_, resource, looping) = last_issue(&c);
        assert_eq!((resource.as_str(), looping), ("start", true));
        assert_eq!(c.gate(), PlaybackGate::default());
        assert_eq!(idle_timers(&c), 1);
    }

    #[test]
    fn idle_times_out_into_a_fresh_start_video() {
        let mut c = kiosk(&default_profile());
        let (first, _, _) = last_issue(&c);
        let h = idle_handle(&c);

        // the player never reported Ready for the attract loop
        c.handle(Event::TimerFired(h));
        assert_eq!(c.screen(), Screen::Idle);
        let (ticket, resource, looping) = last_issue(&c);
        assert!(ticket > first);
        assert_eq!((resource.as_str(), looping), ("start", true));
        assert_eq!(idle_timers(&c), 1);
        assert_ne!(idle_handle(&c), h);
    }

    #[test]
    fn touch_before_ready_is_dropped() {
        let mut c = kiosk(&default_profile());
        tap(&mut c, 4);
        assert_eq!(c.screen(), Screen::Idle);

        ready(&mut c);
        assert!(c.gate().media_ready);
        assert!(!c.gate().touch_enabled);
        tap(&mut c, 4);
        assert_eq!(c.screen(), Screen::Idle);
    }

    #[test]
    fn media_readiness_gates_touch_even_if_touch_was_left_enabled() {
        let mut c = kiosk(&default_profile());
        c.gate.touch_enabled = true;
        tap(&mut c, 4);
        assert_eq!(c.screen(), Screen::Idle);
    }

    #[test]
    fn three_answers_resolve_their_result() {
        let mut c = kiosk(&default_profile());
        answer(&mut c, 8, 6, 8);

        assert_eq!(c.screen(), Screen::Result);
        assert_eq!(c.result_resource(), Some("v1"));
        let (_, resource, looping) = last_issue(&c);
        assert_eq!((resource.as_str(), looping), ("v1", true));
        assert_eq!(c.selection().gender(), Some("male"));
        assert_eq!(c.selection().age(), Some("18-30"));
        assert_eq!(c.selection().lifestyle(), Some("athlete"));

        let h = idle_handle(&c);
        c.handle(Event::TimerFired(h));
        assert_eq!(c.screen(), Screen::Idle);
        assert!(c.selection().is_empty());
        assert_eq!(c.result_resource(), None);
        assert_eq!(last_issue(&c).1, "start");
    }

    #[test]
    fn unmatched_cells_change_nothing() {
        let mut c = kiosk(&default_profile());
        settle(&mut c);
        tap(&mut c, 4);
        settle(&mut c);
        assert_eq!(c.screen(), Screen::AskGender);

        let issued = c.player().issued.len();
        let gate = c.gate();
        let selection = c.selection().clone();
        for cell in (0..9).filter(|i| *i != 6 && *i != 8) {
            tap(&mut c, cell);
            assert_eq!(c.screen(), Screen::AskGender);
            assert_eq!(c.gate(), gate);
            assert_eq!(c.selection(), &selection);
        }
        assert_eq!(c.player().issued.len(), issued);
    }

    #[test]
    fn at_most_one_idle_timer_through_the_flow() {
        let mut c = kiosk(&default_profile());
        assert!(idle_timers(&c) <= 1);
        settle(&mut c);
        for cell in [4, 8, 7, 6] {
            tap(&mut c, cell);
            assert!(idle_timers(&c) <= 1);
            settle(&mut c);
            assert!(idle_timers(&c) <= 1);
        }
        assert_eq!(c.screen(), Screen::Result);
        for cell in [0, 1, 35, 20] {
            tap(&mut c, cell);
            assert_eq!(idle_timers(&c), 1);
        }
    }

    #[test]
    fn replaced_idle_timer_expiry_is_ignored() {
        let mut c = kiosk(&default_profile());
        settle(&mut c);
        tap(&mut c, 4);
        let old = idle_handle(&c);
        settle(&mut c);
        tap(&mut c, 6);
        assert_eq!(c.screen(), Screen::AskAge);

        c.handle(Event::TimerFired(old));
        assert_eq!(c.screen(), Screen::AskAge);
        assert_eq!(c.selection().gender(), Some("female"));
    }

    #[test]
    fn question_screen_times_out_to_idle() {
        let mut c = kiosk(&default_profile());
        settle(&mut c);
        tap(&mut c, 4);
        settle(&mut c);
        tap(&mut c, 8);
        assert_eq!(c.screen(), Screen::AskAge);

        let h = idle_handle(&c);
        c.handle(Event::TimerFired(h));
        assert_eq!(c.screen(), Screen::Idle);
        assert!(c.selection().is_empty());
        assert_eq!(idle_timers(&c), 1);
        assert_ne!(idle_handle(&c), h);
    }

    #[test]
    fn unmapped_result_stays_on_lifestyle() {
        let mut p = default_profile();
        p.results.remove("male.18-30.athlete");
        let mut c = kiosk(&p);
        settle(&mut c);
        tap(&mut c, 4);
        settle(&mut c);
        tap(&mut c, 8);
        settle(&mut c);
        tap(&mut c, 6);
        settle(&mut c);

        let issued = c.player().issued.len();
        tap(&mut c, 8);
        assert_eq!(c.screen(), Screen::AskLifestyle);
        assert_eq!(c.selection().lifestyle(), None);
        assert_eq!(c.player().issued.len(), issued);
        assert!(c.gate().touch_enabled && c.gate().media_ready);

        tap(&mut c, 7);
        assert_eq!(c.screen(), Screen::Result);
        assert_eq!(c.result_resource(), Some("v7"));
    }

    #[test]
    fn hotspot_plays_product_then_returns_to_result_loop() {
        let mut c = kiosk(&default_profile());
        answer(&mut c, 8, 6, 8);
        settle(&mut c);

        // row 3, column 5 on the 6x6 grid
        tap(&mut c, 16);
        assert!(c.gate().product_playing);
        let (product_ticket, resource, looping) = last_issue(&c);
        assert_eq!((resource.as_str(), looping), ("omega3", false));
        assert_eq!(idle_timers(&c), 0);
        assert!(c.idle_timer.is_none());

        settle(&mut c);
        let issued = c.player().issued.len();
        tap(&mut c, 13);
        assert_eq!(c.player().issued.len(), issued);
        assert_eq!(idle_timers(&c), 0);

        c.handle(Event::Playback {
            ticket: product_ticket,
            state: PlaybackState::Ended,
        });
        assert!(!c.gate().product_playing);
        assert_eq!(c.screen(), Screen::Result);
        let (_, resource, looping) = last_issue(&c);
        assert_eq!((resource.as_str(), looping), ("v1", true));
        assert_eq!(idle_timers(&c), 1);
        assert!(!c.gate().media_ready);
    }

    #[test]
    fn missed_tap_on_result_rearms_idle_timer() {
        let mut c = kiosk(&default_profile());
        answer(&mut c, 6, 8, 6);
        assert_eq!(c.result_resource(), Some("v18"));
        settle(&mut c);

        let before = idle_handle(&c);
        tap(&mut c, 0);
        let after = idle_handle(&c);
        assert_ne!(before, after);
        assert_eq!(idle_timers(&c), 1);
        assert!(!c.gate().product_playing);

        c.handle(Event::TimerFired(before));
        assert_eq!(c.screen(), Screen::Result);
        c.handle(Event::TimerFired(after));
        assert_eq!(c.screen(), Screen::Idle);
    }

    #[test]
    fn ended_on_looped_media_has_no_follow_up() {
        let mut c = kiosk(&default_profile());
        answer(&mut c, 8, 6, 8);
        let issued = c.player().issued.len();
        let ticket = last_issue(&c).0;
        c.handle(Event::Playback {
            ticket,
            state: PlaybackState::Ended,
        });
        assert_eq!(c.player().issued.len(), issued);
        assert_eq!(c.screen(), Screen::Result);
    }

    #[test]
    fn events_for_replaced_media_are_ignored() {
        let mut c = kiosk(&default_profile());
        let idle_ticket = last_issue(&c).0;
        settle(&mut c);
        tap(&mut c, 4);

        c.handle(Event::Playback {
            ticket: idle_ticket,
            state: PlaybackState::Ready,
        });
        assert!(!c.gate().media_ready);
        assert_eq!(c.active.as_ref().map(|a| a.phase), Some(MediaPhase::AwaitingReady));
    }

    #[test]
    fn loading_resets_the_gate_and_cancels_settle() {
        let mut c = kiosk(&default_profile());
        ready(&mut c);
        let Some(MediaPhase::AwaitingSettle(settle_timer)) = c.active.as_ref().map(|a| a.phase)
        else {
            panic!("expected settle phase");
        };
        let ticket = last_issue(&c).0;
        c.handle(Event::Playback {
            ticket,
            state: PlaybackState::Loading,
        });
        assert_eq!(c.gate(), PlaybackGate::default());
        assert!(c.timers().live.iter().all(|(h, _)| *h != settle_timer));

        c.handle(Event::TimerFired(settle_timer));
        assert!(!c.gate().touch_enabled);
        tap(&mut c, 4);
        assert_eq!(c.screen(), Screen::Idle);
    }

    #[test]
    fn arity_five_refinement_accepts_only_its_cells() {
        let mut c = kiosk(&refined_profile());
        answer(&mut c, 8, 6, 6);
        assert_eq!(c.screen(), Screen::AskRefinement);
        assert_eq!(last_issue(&c).1, "problems_sedentary_5");
        settle(&mut c);

        for cell in [1, 3, 5, 7] {
            tap(&mut c, cell);
            assert_eq!(c.screen(), Screen::AskRefinement);
            assert_eq!(c.selection().refinement_option(), None);
        }
        tap(&mut c, 4);
        assert_eq!(c.screen(), Screen::Result);
        assert_eq!(c.selection().refinement_option(), Some(3));
        assert_eq!(c.result_resource(), Some("v13_p3"));
    }

    #[test]
    fn arity_three_refinement_uses_its_own_layout() {
        let mut c = kiosk(&refined_profile());
        answer(&mut c, 8, 6, 8);
        assert_eq!(last_issue(&c).1, "problems_athlete_3");
        settle(&mut c);

        for cell in [0, 2, 6, 8] {
            tap(&mut c, cell);
            assert_eq!(c.screen(), Screen::AskRefinement);
        }
        tap(&mut c, 5);
        assert_eq!(c.result_resource(), Some("v1_p3"));
    }

    #[test]
    fn missing_prompt_keeps_lifestyle_screen() {
        let mut p = refined_profile();
        if let Some(r) = p.refinement.as_mut() {
            r.prompts.remove("male.18-30.athlete");
        }
        let mut c = kiosk(&p);
        answer(&mut c, 8, 6, 8);
        assert_eq!(c.screen(), Screen::AskLifestyle);
        assert_eq!(c.selection().lifestyle(), None);
    }

    #[test]
    fn settled_intro_screen_auto_advances() {
        let mut p = default_profile();
        p.screens.idle.advance_to = Some(Screen::AskGender);
        let mut c = kiosk(&p);
        settle(&mut c);
        assert!(c.gate().touch_enabled);

        let Some(MediaPhase::AwaitingAdvance(h)) = c.active.as_ref().map(|a| a.phase) else {
            panic!("expected advance phase");
        };
        let advance = c.timing.advance_delay();
        assert!(c.timers().live.iter().any(|(t, d)| *t == h && *d == advance));
        c.handle(Event::TimerFired(h));
        assert_eq!(c.screen(), Screen::AskGender);
        assert_eq!(idle_timers(&c), 1);
    }

    #[test]
    fn touch_before_auto_advance_supersedes_it() {
        let mut p = default_profile();
        p.screens.idle.advance_to = Some(Screen::AskGender);
        let mut c = kiosk(&p);
        settle(&mut c);
        let Some(MediaPhase::AwaitingAdvance(h)) = c.active.as_ref().map(|a| a.phase) else {
            panic!("expected advance phase");
        };
        tap(&mut c, 4);
        settle(&mut c);
        tap(&mut c, 8);
        assert_eq!(c.screen(), Screen::AskAge);
        assert!(c.timers().live.iter().all(|(t, _)| *t != h));

        c.handle(Event::TimerFired(h));
        assert_eq!(c.screen(), Screen::AskAge);
    }

    #[test]
    fn reconfigure_restarts_at_idle() {
        let mut c = kiosk(&default_profile());
        answer(&mut c, 8, 6, 8);
        let ticket = last_issue(&c).0;

        c.reconfigure(&refined_profile());
        assert_eq!(c.screen(), Screen::Idle);
        assert!(c.selection().is_empty());
        assert_eq!(idle_timers(&c), 1);
        assert!(last_issue(&c).0 > ticket);
        assert!(c.resolver().refinement_enabled());
    }

    #[test]
    fn shutdown_releases_player_and_timers() {
        let mut c = kiosk(&default_profile());
        answer(&mut c, 8, 6, 8);
        ready(&mut c);
        c.shutdown();
        assert_eq!(c.player().stopped, 1);
        assert!(c.timers().live.is_empty());
        assert!(!c.snapshot().idle_timer_armed);
    }
}
