use touchrec::classifiers::TemplateMatcher;
use touchrec::{Error, Frame, GestureSession, GestureTemplate, SessionState, Touch, TrackerConfig};

fn zigzag(offset: f32) -> Vec<Frame> {
    let pts = [(0.0, 0.0), (40.0, 40.0), (80.0, 0.0), (120.0, 40.0), (160.0, 0.0)];
    pts.iter()
        .enumerate()
        .map(|(i, &(x, y))| Frame::new(i as u64 * 30, vec![Touch::at(0, x + offset, y + offset)]))
        .collect()
}

fn line() -> Vec<Frame> {
    (0..5u64)
        .map(|i| Frame::new(i * 30, vec![Touch::at(0, 50.0, 40.0 * i as f32)]))
        .collect()
}

fn matcher_session() -> GestureSession {
    let session = GestureSession::new(TrackerConfig::default());
    session.register(Box::new(TemplateMatcher::new(0.6)));
    session
}

fn record(session: &GestureSession, dir: &std::path::Path, class: &str, frames: Vec<Frame>) -> String {
    session.start_template_recording().unwrap();
    for f in frames {
        session.add_frame(f);
    }
    session.finish_template_recording(dir, class).unwrap().file_name()
}

#[test]
fn recorded_templates_reload_into_a_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = matcher_session();
    assert_eq!(record(&recorder, dir.path(), "zig", zigzag(0.0)), "zig_0.json");
    assert_eq!(record(&recorder, dir.path(), "zig", zigzag(300.0)), "zig_1.json");
    assert_eq!(record(&recorder, dir.path(), "line", line()), "line_0.json");

    let session = matcher_session();
    assert_eq!(session.load_templates(dir.path()).unwrap(), 3);
    let classes = session.classes();
    let zig = classes.iter().find(|c| c.class_name == "zig").unwrap();
    assert_eq!(zig.templates.len(), 2);

    session.start_evaluation().unwrap();
    for f in zigzag(1000.0) {
        session.add_frame(f);
    }
    let recognition = session.finish_evaluation().unwrap();
    assert_eq!(recognition.name(), Some("zig"));

    let probe = GestureTemplate::new("probe", zig.templates[0].gesture.clone());
    assert_eq!(session.recognize_template(&probe).name(), Some("zig"));
}

#[test]
fn removed_class_is_no_longer_recognized() {
    let dir = tempfile::tempdir().unwrap();
    let session = matcher_session();
    record(&session, dir.path(), "line", line());

    assert!(session.remove_class("line").is_some());
    assert!(session.remove_class("line").is_none());

    session.start_evaluation().unwrap();
    for f in line() {
        session.add_frame(f);
    }
    assert!(!session.finish_evaluation().unwrap().is_recognized());

    // the file is still on disk
    assert_eq!(session.load_templates(dir.path()).unwrap(), 1);
}

#[test]
fn empty_recording_is_rejected_and_can_be_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let session = matcher_session();
    session.start_template_recording().unwrap();

    let err = session.finish_template_recording(dir.path(), "nothing").unwrap_err();
    assert!(matches!(err, Error::InvalidTemplate(_)));
    assert_eq!(session.state(), SessionState::Recording);
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

    assert_eq!(session.cancel(), SessionState::Recording);
    assert_eq!(session.state(), SessionState::Idle);
}
