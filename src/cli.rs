use anyhow::{Result, anyhow};
use pico_args::Arguments;
use serde_json::json;
use std::{env, process::Command};

use crate::config;
use crate::controller::Screen;
use crate::grid;
use crate::ipc;
use crate::resolver::Resolver;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("kioskflow: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(json!({"op": "shutdown"})),
        Some("status") => request(json!({"op": "status"})),
        Some("reload") => request(json!({"op": "reload"})),
        Some("list") => request(json!({"op": "list"})),
        Some("doctor") => request(json!({"op": "doctor"})),
        Some("poll") => request(json!({"op": "poll"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: kioskflow use <profile_name>"))?;
            request(json!({"op": "use", "profile": name}))
        }

        Some("touch") => {
            // kioskflow touch 540 960
            // kioskflow touch 540 960 1080 1920
            let usage = || anyhow!("usage: kioskflow touch <x> <y> [w h]");
            let x: f32 = pargs.free_from_str().map_err(|_| usage())?;
            let y: f32 = pargs.free_from_str().map_err(|_| usage())?;
            let w: Option<u32> = pargs.opt_free_from_str().map_err(|_| usage())?;
            let h: Option<u32> = pargs.opt_free_from_str().map_err(|_| usage())?;
            let mut req = json!({"op": "touch", "x": x, "y": y});
            match (w, h) {
                (Some(w), Some(h)) => {
                    req["w"] = json!(w);
                    req["h"] = json!(h);
                }
                (None, None) => {}
                _ => return Err(usage()),
            }
            request(req)
        }

        Some("playback") => {
            let usage = || anyhow!("usage: kioskflow playback <ticket> <loading|ready|ended>");
            let ticket: u64 = pargs.free_from_str().map_err(|_| usage())?;
            let state: String = pargs.free_from_str().map_err(|_| usage())?;
            request(json!({"op": "playback", "ticket": ticket, "state": state}))
        }

        Some("classify") => {
            let usage = || anyhow!("usage: kioskflow classify <screen> <x> <y> <w> <h>");
            let screen: String = pargs.free_from_str().map_err(|_| usage())?;
            let screen: Screen = screen.parse()?;
            let x: f32 = pargs.free_from_str().map_err(|_| usage())?;
            let y: f32 = pargs.free_from_str().map_err(|_| usage())?;
            let w: u32 = pargs.free_from_str().map_err(|_| usage())?;
            let h: u32 = pargs.free_from_str().map_err(|_| usage())?;
            let resp = match grid::classify((x, y), (w, h), screen) {
                Some(c) => json!({"ok": true, "data": {
                    "screen": screen,
                    "grid": grid::grid_size(screen),
                    "row": c.row,
                    "col": c.col,
                    "index": c.index,
                }}),
                None => json!({"ok": false, "error": "viewport has a zero dimension"}),
            };
            print_response(&resp);
            Ok(())
        }

        Some("check") => {
            let name: Option<String> = pargs.opt_free_from_str()?;
            let name = name.unwrap_or_else(|| "default".to_string());
            let resp = match config::load_profile(&name) {
                Ok(profile) => {
                    let resolver = Resolver::from_profile(&profile);
                    json!({"ok": true, "data": {
                        "profile": profile.meta.name,
                        "results": profile.results.len(),
                        "refinement": resolver.refinement_enabled(),
                        "overlapping_zones": resolver.overlapping_zones(),
                        "orphan_hotspots": resolver.orphan_hotspots(),
                    }})
                }
                Err(e) => json!({"ok": false, "error": e.to_string()}),
            };
            print_response(&resp);
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

fn print_help() {
    println!(
        r#"kioskflow: touch-driven video questionnaire kiosk

USAGE:
  kioskflow help [command]                 Show general or command-specific help
  kioskflow start                          Start the daemon
  kioskflow stop                           Stop the daemon
  kioskflow status                         Show screen, selection and playback state
  kioskflow reload                         Reload active profile
  kioskflow use <name>                     Switch active profile
  kioskflow list                           List profiles
  kioskflow doctor                         Diagnose permissions/devices
  kioskflow touch <x> <y> [w h]            Inject a touch-down
  kioskflow playback <ticket> <state>      Report player progress (loading|ready|ended)
  kioskflow poll                           Drain pending player commands
  kioskflow classify <screen> <x> <y> <w> <h>
                                           Show the grid cell under a point (offline)
  kioskflow check [profile]                Validate a profile and its hotspots (offline)

TIPS:
  - Profiles: ~/.config/kioskflow/profiles
  - Active profile pointer: ~/.config/kioskflow/active
  - Socket: ~/.local/run/kioskflow.sock
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: kioskflow start\nStarts the background daemon."),
        "stop" => println!("usage: kioskflow stop\nStops the running daemon."),
        "status" => println!(
            "usage: kioskflow status\nShows active profile, screen, playback gate, selection and socket."
        ),
        "reload" => println!(
            "usage: kioskflow reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: kioskflow use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: kioskflow list\nLists available profiles."),
        "doctor" => println!(
            "usage: kioskflow doctor\nChecks permissions and lists detected multitouch devices."
        ),
        "touch" => println!(
            "usage: kioskflow touch <x> <y> [w h]\nInjects a touch-down in viewport pixels.\nThe profile's display size is used when w/h are omitted."
        ),
        "playback" => println!(
            "usage: kioskflow playback <ticket> <loading|ready|ended>\nReports player progress for the media issued with <ticket>."
        ),
        "poll" => println!(
            "usage: kioskflow poll\nReturns and clears the player commands issued since the last poll."
        ),
        "classify" => println!(
            "usage: kioskflow classify <screen> <x> <y> <w> <h>\nScreens: idle, gender, age, lifestyle, refinement, result."
        ),
        "check" => println!(
            "usage: kioskflow check [profile|path]\nLoads and validates a profile, then reports overlapping and orphan hotspots."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
