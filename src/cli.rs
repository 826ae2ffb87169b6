use anyhow::{Context, Result, anyhow};
use log::warn;
use pico_args::Arguments;
use std::{
    env,
    fs::File,
    io::BufReader,
    path::PathBuf,
    process::Command,
};

use touchrec::{blob, replay};

use crate::config::{self, DaemonConfigState};
use crate::ipc;

const DEFAULT_SEGMENT_THRESHOLD: f32 = 0.5;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
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
            println!("touchrec: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(serde_json::json!({"op":"shutdown"})),
        Some("status") => request(serde_json::json!({"op":"status"})),
        Some("reload") => request(serde_json::json!({"op":"reload"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchrec use <profile_name>"))?;
            request(serde_json::json!({"op":"use","profile":name}))
        }

        Some("list") => request(serde_json::json!({"op":"list"})),
        Some("doctor") => request(serde_json::json!({"op":"doctor"})),

        Some("record") => {
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchrec record <start|finish <class>>"))?;
            match what.as_str() {
                "start" => request(serde_json::json!({"op":"record_start"})),
                "finish" => {
                    let class: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: touchrec record finish <class>"))?;
                    request(serde_json::json!({"op":"record_finish","class":class}))
                }
                other => Err(anyhow!("unknown record step: {other}")),
            }
        }

        Some("recognize") => {
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchrec recognize <start|finish>"))?;
            match what.as_str() {
                "start" => request(serde_json::json!({"op":"recognize_start"})),
                "finish" => request(serde_json::json!({"op":"recognize_finish"})),
                other => Err(anyhow!("unknown recognize step: {other}")),
            }
        }

        Some("cancel") => request(serde_json::json!({"op":"cancel"})),
        Some("classes") => request(serde_json::json!({"op":"classes"})),

        Some("remove") => {
            let class: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchrec remove <class>"))?;
            request(serde_json::json!({"op":"remove","class":class}))
        }

        Some("replay") => {
            let record: Option<String> = pargs.opt_value_from_str("--record")?;
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchrec replay <frames.jsonl> [--record <class>]"))?;
            replay_file(path, record)
        }

        Some("segment") => {
            let threshold: Option<f32> = pargs.opt_value_from_str("--threshold")?;
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchrec segment <grid.json> [--threshold <t>]"))?;
            segment_file(path, threshold)
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

/// Runs a recorded frame stream through a local session built from the
/// active profile, without a daemon.
fn replay_file(path: PathBuf, record: Option<String>) -> Result<()> {
    let cfg = DaemonConfigState::load_or_install_default()?;
    let templates_dir = cfg.templates_dir();
    let session = config::build_session(&cfg.profile, &templates_dir)?;

    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let frames = replay::read_frames(BufReader::new(file))?;
    if frames.is_empty() {
        warn!("{} contains no frames", path.display());
    }

    match record {
        Some(class) => {
            session.start_template_recording()?;
            for f in frames {
                session.add_frame(f);
            }
            let stored = session.finish_template_recording(&templates_dir, &class)?;
            print_response(&serde_json::json!({
                "class": stored.template.class_name,
                "template_number": stored.template.template_number,
                "file": stored.path,
            }));
        }
        None => {
            session.start_evaluation()?;
            let mut last_hint = String::new();
            for f in frames {
                let hint = session.add_frame(f);
                if !hint.is_empty() && hint != last_hint {
                    println!("hint: {hint}");
                }
                last_hint = hint;
            }
            let recognition = session.finish_evaluation()?;
            print_response(&serde_json::json!(recognition));
        }
    }
    Ok(())
}

fn segment_file(path: PathBuf, threshold: Option<f32>) -> Result<()> {
    let threshold = match threshold {
        Some(t) => t,
        None => DaemonConfigState::load_or_install_default()
            .map(|c| c.profile.tracker.segment_threshold)
            .unwrap_or(DEFAULT_SEGMENT_THRESHOLD),
    };
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let grid = replay::read_grid(BufReader::new(file))?;
    let clusters = blob::segment(&grid, threshold);
    let frame = blob::extract_frame(&grid, threshold, 0);
    print_response(&serde_json::json!({
        "threshold": threshold,
        "clusters": clusters,
        "frame": frame,
    }));
    Ok(())
}

fn print_help() {
    println!(
        r#"touchrec: multitouch gesture recorder and recognizer

USAGE:
  touchrec help [command]                  Show general or command-specific help
  touchrec start                           Start the daemon
  touchrec stop                            Stop the daemon
  touchrec status                          Show daemon and session state
  touchrec reload                          Reload active profile
  touchrec use <name>                      Switch active profile
  touchrec list                            List profiles
  touchrec doctor                          Diagnose permissions/devices
  touchrec record start                    Begin recording a template
  touchrec record finish <class>           Store the recording under <class>
  touchrec recognize start                 Begin recognizing
  touchrec recognize finish                Classify what was tracked
  touchrec cancel                          Abandon the running session
  touchrec classes                         List template classes
  touchrec remove <class>                  Forget a template class
  touchrec replay <frames.jsonl> [--record <class>]
                                           Run recorded frames offline
  touchrec segment <grid.json> [--threshold <t>]
                                           Label blobs in an intensity grid

TIPS:
  - Profiles: ~/.config/touchrec/profiles
  - Active profile pointer: ~/.config/touchrec/active
  - Templates: ~/.config/touchrec/templates (see [templates] in the profile)
  - Log level: TOUCHREC_LOG=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: touchrec start\nStarts the background daemon."),
        "stop" => println!("usage: touchrec stop\nStops the running daemon."),
        "status" => println!(
            "usage: touchrec status\nShows session state, active profile, devices, classifiers."
        ),
        "reload" => println!(
            "usage: touchrec reload\nReloads the current profile; refused while a session runs."
        ),
        "use" => {
            println!("usage: touchrec use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: touchrec list\nLists available profiles and the active one."),
        "doctor" => println!(
            "usage: touchrec doctor\nChecks permissions and lists detected multitouch devices."
        ),
        "record" => println!(
            "usage:\n  touchrec record start\n  touchrec record finish <class>\nRecords a template; finishing writes it to the templates directory."
        ),
        "recognize" => println!(
            "usage:\n  touchrec recognize start\n  touchrec recognize finish\nPrints every classifier's answer and the selected one."
        ),
        "cancel" => println!("usage: touchrec cancel\nReturns the session to idle."),
        "classes" => println!("usage: touchrec classes\nLists classes with their template counts."),
        "remove" => println!(
            "usage: touchrec remove <class>\nDrops <class> from the daemon; files stay on disk."
        ),
        "replay" => println!(
            "usage: touchrec replay <frames.jsonl> [--record <class>]\nFeeds a JSON frame stream through a local session and recognizes it, or stores it as a template of <class>."
        ),
        "segment" => println!(
            "usage: touchrec segment <grid.json> [--threshold <t>]\nReads a JSON array of rows and prints the labelled clusters."
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
