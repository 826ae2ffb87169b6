use anyhow::{Result, anyhow};
use log::{error, info, warn};
use serde_json::{Value, json};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use touchrec::GestureSession;

use super::pipeline::run_pipeline;
use super::runtime::socket_path;
use crate::config::{self, DaemonConfigState};

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let state = DaemonState::new()?;
    info!("daemon: active profile '{}'", state.cfg().active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let tx_sig = tx_req.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: caught signal {sig}");
            let _ = tx_sig.send(IpcMsg::Shutdown);
        }
    });

    // device thread
    let stop = Arc::new(AtomicBool::new(false));
    let pipeline = {
        let session = state.session.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            if let Err(e) = run_pipeline(session, stop) {
                error!("gesture pipeline failed: {e}");
            }
        })
    };

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let st = state.clone_shallow();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, &st, &tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => match state.reload() {
                    Ok(()) => info!("profile reloaded"),
                    Err(e) => error!("reload failed: {e}"),
                },
                IpcMsg::UseProfile(name) => match state.use_profile(&name) {
                    Ok(()) => info!("switched active profile to {name}"),
                    Err(e) => error!("use profile failed: {e}"),
                },
                IpcMsg::Shutdown => {
                    stop.store(true, Ordering::Relaxed);
                    let _ = pipeline.join();
                    let _ = std::fs::remove_file(&sock);
                    info!("daemon: shut down");
                    return Ok(());
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn handle_client(mut stream: UnixStream, st: &DaemonState, tx_req: &Sender<IpcMsg>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: Value = serde_json::from_str(&line)?;
    let resp = handle_request(&req, st, tx_req);
    writeln!(stream, "{resp}")?;
    Ok(())
}

fn ok(data: Value) -> Value {
    json!({"ok": true, "data": data})
}

fn fail(e: impl std::fmt::Display) -> Value {
    json!({"ok": false, "error": e.to_string()})
}

fn class_arg(req: &Value) -> Option<&str> {
    req.get("class")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

fn handle_request(req: &Value, st: &DaemonState, tx_req: &Sender<IpcMsg>) -> Value {
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");
    let session = &st.session;

    match op {
        "status" => {
            let cfg = st.cfg();
            ok(json!({
                "session": session.state(),
                "active_profile": cfg.active_name,
                "profile_name": cfg.profile.meta.name,
                "socket": socket_path().ok(),
                "devices": cfg.detected_devices,
                "classifiers": session.classifier_names(),
                "classes": session.classes().len(),
            }))
        }
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            ok(json!({"active_profile": st.cfg().active_name}))
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
            ok(json!({"active_profile": name}))
        }
        "list" => {
            let cfg = st.cfg();
            ok(json!({"profiles": cfg.list_profiles(), "active": cfg.active_name}))
        }
        "doctor" => ok(st.cfg().doctor_report()),
        "record_start" => match session.start_template_recording() {
            Ok(()) => ok(json!({"session": session.state()})),
            Err(e) => fail(e),
        },
        "record_finish" => {
            let Some(class) = class_arg(req) else {
                return fail("record_finish needs a non-empty \"class\"");
            };
            let dir = st.cfg().templates_dir();
            match session.finish_template_recording(&dir, class) {
                Ok(stored) => ok(json!({
                    "class": stored.template.class_name,
                    "template_number": stored.template.template_number,
                    "file": stored.path,
                })),
                Err(e) => fail(e),
            }
        }
        "recognize_start" => match session.start_evaluation() {
            Ok(()) => ok(json!({"session": session.state()})),
            Err(e) => fail(e),
        },
        "recognize_finish" => match session.finish_evaluation() {
            Ok(recognition) => ok(json!(recognition)),
            Err(e) => fail(e),
        },
        "cancel" => ok(json!({"previous": session.cancel()})),
        "classes" => {
            let classes: Vec<Value> = session
                .classes()
                .iter()
                .map(|c| json!({"class": c.class_name, "templates": c.templates.len()}))
                .collect();
            ok(json!(classes))
        }
        "remove" => {
            let Some(class) = class_arg(req) else {
                return fail("remove needs a non-empty \"class\"");
            };
            match session.remove_class(class) {
                Some(removed) => ok(json!({"class": removed.class_name, "templates": removed.templates.len()})),
                None => fail(format!("unknown class: {class}")),
            }
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            ok(json!("shutting down"))
        }
        _ => fail(format!("unknown op: {op}")),
    }
}

struct DaemonState {
    cfg: Arc<Mutex<DaemonConfigState>>,
    session: Arc<GestureSession>,
}

impl DaemonState {
    fn new() -> Result<Self> {
        Self::from_config(DaemonConfigState::load_or_install_default()?)
    }

    fn from_config(cfg: DaemonConfigState) -> Result<Self> {
        let session = config::build_session(&cfg.profile, &cfg.templates_dir())?;
        Ok(Self {
            cfg: Arc::new(Mutex::new(cfg)),
            session: Arc::new(session),
        })
    }

    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            session: self.session.clone(),
        }
    }

    fn cfg(&self) -> std::sync::MutexGuard<'_, DaemonConfigState> {
        self.cfg.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes the current profile into the session. Refused mid-gesture; the
    /// config still points at the new profile and a later reload applies it.
    fn apply_profile(&self) -> Result<()> {
        let (tracker, classifiers, templates_dir) = {
            let cfg = self.cfg();
            (
                cfg.profile.tracker_config(),
                cfg.profile.classifiers(),
                cfg.templates_dir(),
            )
        };
        self.session.reconfigure(tracker, classifiers)?;
        if let Err(e) = self.session.load_templates(&templates_dir) {
            warn!("templates not reloaded from {}: {e}", templates_dir.display());
        }
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.cfg().reload()?;
        self.apply_profile()
    }

    fn use_profile(&self, name: &str) -> Result<()> {
        self.cfg().set_active(name)?;
        self.apply_profile()
    }
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Shutdown,
}

// client helper
pub fn client_request(req: Value) -> Result<Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "touchrec daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: Value = serde_json::from_str(&resp)?;
    Ok(v)
}
