//! Agent 生命周期测试

mod common;

use std::sync::{Arc, Weak};
use std::time::Duration;

use agent_bridge::agent::{AgentEvents, AgentHandle, AgentLifecycle, AgentState};
use agent_bridge::{Error, Response, Token};
use common::{wait_until, ScriptedLauncher};
use parking_lot::Mutex;
use tokio::runtime::Runtime;

/// 记录生命周期回调
#[derive(Default)]
struct Recorder {
    starting: Mutex<Vec<Token>>,
    ready: Mutex<Vec<Token>>,
    stopped: Mutex<Vec<Token>>,
    responses: Mutex<Vec<(Token, Response)>>,
}

impl AgentEvents for Recorder {
    fn agent_starting(&self, agent: &Arc<AgentHandle>) {
        self.starting.lock().push(agent.token().clone());
    }

    fn agent_ready(&self, agent: &Arc<AgentHandle>) {
        self.ready.lock().push(agent.token().clone());
    }

    fn agent_stopped(&self, agent: &Arc<AgentHandle>) {
        self.stopped.lock().push(agent.token().clone());
    }

    fn on_response(&self, agent: &Arc<AgentHandle>, response: Response) {
        self.responses.lock().push((agent.token().clone(), response));
    }
}

fn setup(launcher: Arc<ScriptedLauncher>) -> (Runtime, Arc<AgentLifecycle>, Arc<Recorder>) {
    let rt = Runtime::new().unwrap();
    let lifecycle = Arc::new(AgentLifecycle::new(launcher, rt.handle().clone(), "GOPATH", 1));
    let recorder = Arc::new(Recorder::default());
    let events: Weak<Recorder> = Arc::downgrade(&recorder);
    lifecycle.set_events(events);
    (rt, lifecycle, recorder)
}

#[test]
fn test_lazy_start_launches_once() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, recorder) = setup(launcher.clone());

    assert!(lifecycle.current().is_none());
    assert_eq!(launcher.launch_count(), 0);

    let a = lifecycle.current_or_start().unwrap();
    let b = lifecycle.current_or_start().unwrap();
    assert_eq!(a.token(), b.token());
    assert_eq!(launcher.launch_count(), 1);
    assert_eq!(a.state(), AgentState::Running);

    assert_eq!(recorder.starting.lock().as_slice(), &[a.token().clone()]);
    assert_eq!(recorder.ready.lock().as_slice(), &[a.token().clone()]);
}

#[test]
fn test_concurrent_lazy_start_launches_once() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, _recorder) = setup(launcher.clone());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lifecycle = lifecycle.clone();
            std::thread::spawn(move || lifecycle.current_or_start().unwrap().token().clone())
        })
        .collect();

    let tokens: Vec<Token> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(tokens.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(launcher.launch_count(), 1);
}

#[test]
fn test_restart_stops_previous_exactly_once() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, recorder) = setup(launcher.clone());

    let a = lifecycle.start().unwrap();
    let b = lifecycle.restart().unwrap();

    assert_ne!(a.token(), b.token());
    assert!(b.token().seq() > a.token().seq());
    assert!(lifecycle.is_current(&b));
    assert!(!lifecycle.is_current(&a));

    // 旧 Agent 在后台停止
    assert!(wait_until(Duration::from_secs(2), || launcher.closed_count(a.token()) == 1));
    assert!(wait_until(Duration::from_secs(2), || a.state() == AgentState::Stopped));
    assert!(wait_until(Duration::from_secs(2), || recorder
        .stopped
        .lock()
        .contains(a.token())));

    // 再停一次不会生效
    assert!(!a.stop());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(launcher.closed_count(a.token()), 1);
    assert_eq!(b.state(), AgentState::Running);
    assert_eq!(launcher.closed_count(b.token()), 0);
}

#[test]
fn test_stale_stop_is_noop() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, _recorder) = setup(launcher);

    let a = lifecycle.start().unwrap();
    let b = lifecycle.restart().unwrap();

    assert!(!lifecycle.stop(Some(&a)));
    assert!(lifecycle.is_current(&b));

    assert!(lifecycle.stop(Some(&b)));
    assert!(lifecycle.current().is_none());
    assert!(!lifecycle.stop(None));
}

#[test]
fn test_env_change_stops_agent_and_restarts_lazily() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, _recorder) = setup(launcher.clone());

    // 没有 Agent 时只记录值
    assert!(!lifecycle.sync_environment(Some("/go/a")));
    assert_eq!(lifecycle.last_env(), "/go/a");

    let a = lifecycle.current_or_start().unwrap();
    assert_eq!(a.env_value(), "/go/a");
    assert_eq!(launcher.launches.lock()[0].env_value, "/go/a");

    // 值未变化
    assert!(!lifecycle.sync_environment(Some("/go/a")));
    // 空值不算变化
    assert!(!lifecycle.sync_environment(Some("")));
    assert!(!lifecycle.sync_environment(None));
    assert!(lifecycle.is_current(&a));

    assert!(lifecycle.sync_environment(Some("/go/b")));
    assert!(lifecycle.current().is_none());
    assert!(wait_until(Duration::from_secs(2), || launcher.closed_count(a.token()) == 1));

    let b = lifecycle.current_or_start().unwrap();
    assert_eq!(b.env_value(), "/go/b");
    assert_eq!(launcher.launches.lock()[1].env_value, "/go/b");
    assert_eq!(launcher.launches.lock()[1].env_key, "GOPATH");
}

#[test]
fn test_launch_failure_leaves_no_current_agent() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, recorder) = setup(launcher.clone());

    launcher.set_fail(true);
    let err = lifecycle.current_or_start().unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
    assert!(lifecycle.current().is_none());
    assert!(recorder.ready.lock().is_empty());

    launcher.set_fail(false);
    let agent = lifecycle.current_or_start().unwrap();
    assert!(lifecycle.is_current(&agent));
    assert_eq!(launcher.launch_count(), 1);
}

#[test]
fn test_responses_are_delivered_with_their_agent() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, recorder) = setup(launcher);

    let agent = lifecycle.start().unwrap();
    agent
        .send_frame(r#"{"Cookie":"rq#001","Props":{"View":{"Name":"a.go","Src":""}},"Actions":[{"Name":"ViewSaved"}]}"#.to_string())
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || recorder.responses.lock().len() == 1));
    let (token, response) = recorder.responses.lock()[0].clone();
    assert_eq!(&token, agent.token());
    assert_eq!(response.token, "rq#001");
    assert!(response.error.is_none());
}

#[test]
fn test_stop_closes_agent_input() {
    let launcher = ScriptedLauncher::echo();
    let (_rt, lifecycle, recorder) = setup(launcher.clone());

    let agent = lifecycle.start().unwrap();
    assert!(lifecycle.stop(None));
    assert_eq!(agent.state(), AgentState::Stopped);
    assert!(agent.send_frame("{}".to_string()).is_err());

    assert!(wait_until(Duration::from_secs(2), || launcher.closed_count(agent.token()) == 1));
    assert!(wait_until(Duration::from_secs(2), || recorder
        .stopped
        .lock()
        .contains(agent.token())));
}
