use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use theme_watch::{
    Listener, ListenerError, ListenerState, PollStrategy, Theme, WatchContext, WatchError,
    WatchStrategy,
};

const LONG: Duration = Duration::from_secs(5);

/// Returns each scripted reading once, then repeats the last one forever.
fn scripted(readings: &[Theme]) -> impl Fn() -> Theme + Send + Sync {
    let queue = Mutex::new(readings.iter().copied().collect::<VecDeque<_>>());
    let last = Mutex::new(Theme::Unknown);
    move || {
        let mut last = last.lock();
        if let Some(next) = queue.lock().pop_front() {
            *last = next;
        }
        *last
    }
}

fn wait_for_state<S: WatchStrategy>(listener: &Listener<S>, state: ListenerState) {
    let deadline = Instant::now() + LONG;
    while listener.state() != state {
        assert!(Instant::now() < deadline, "listener never reached {state:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn spawn_listen<S>(
    listener: &Arc<Listener<S>>,
    deliveries: Sender<Theme>,
) -> thread::JoinHandle<Result<(), ListenerError>>
where
    S: WatchStrategy + 'static,
{
    let listener = Arc::clone(listener);
    thread::spawn(move || {
        listener.listen(move |theme| {
            let _ = deliveries.send(theme);
        })
    })
}

/// Loops until stopped, or until `release` fires when it ignores stops.
struct Blocking {
    honors_stop: bool,
    interruptible: bool,
    release: Receiver<()>,
    exited: AtomicBool,
    shutdowns: AtomicUsize,
}

impl Blocking {
    fn new(honors_stop: bool, interruptible: bool) -> (Blocking, Sender<()>) {
        let (release_tx, release) = unbounded();
        let strategy = Blocking {
            honors_stop,
            interruptible,
            release,
            exited: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        };
        (strategy, release_tx)
    }
}

impl WatchStrategy for Blocking {
    fn watch(
        &self,
        ctx: &WatchContext<'_>,
        _on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        loop {
            if self.honors_stop && !ctx.is_listening() {
                break;
            }
            if self.release.recv_timeout(Duration::from_millis(1)).is_ok() {
                break;
            }
        }
        self.exited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn initiate_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_for_shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    fn interruptible(&self) -> bool {
        self.interruptible
    }
}

/// Fails immediately with a fixed error.
struct Failing {
    unsupported: bool,
    shutdowns: AtomicUsize,
}

impl Failing {
    fn new(unsupported: bool) -> Failing {
        Failing {
            unsupported,
            shutdowns: AtomicUsize::new(0),
        }
    }
}

impl WatchStrategy for Failing {
    fn watch(
        &self,
        _ctx: &WatchContext<'_>,
        _on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        if self.unsupported {
            Err(WatchError::Unsupported)
        } else {
            Err(WatchError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "preference key missing",
            )))
        }
    }

    fn initiate_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_for_shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }
}

#[test]
fn delivers_each_change_once_in_order() {
    let probe = scripted(&[Theme::Dark, Theme::Light, Theme::Dark]);
    let listener = Arc::new(Listener::new(PollStrategy::new(
        probe,
        Duration::from_millis(1),
    )));
    let (tx, rx) = unbounded();
    let driver = spawn_listen(&listener, tx);

    assert_eq!(rx.recv_timeout(LONG), Ok(Theme::Light));
    assert_eq!(rx.recv_timeout(LONG), Ok(Theme::Dark));
    // The probe keeps answering Dark; nothing else may arrive.
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    listener.stop();
    listener.wait(Some(LONG)).unwrap();
    driver.join().unwrap().unwrap();
    assert_eq!(listener.state(), ListenerState::Dead);
}

#[test]
fn unknown_readings_are_not_delivered() {
    let probe = scripted(&[Theme::Light, Theme::Unknown, Theme::Light, Theme::Dark]);
    let listener = Arc::new(Listener::new(PollStrategy::new(
        probe,
        Duration::from_millis(1),
    )));
    let (tx, rx) = unbounded();
    let driver = spawn_listen(&listener, tx);

    assert_eq!(rx.recv_timeout(LONG), Ok(Theme::Dark));
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    listener.wait(Some(LONG)).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn stop_and_wait_from_another_thread() {
    // An hour-long interval: only the stop wakeup can end the loop in time.
    let listener = Arc::new(Listener::new(PollStrategy::new(
        || Theme::Dark,
        Duration::from_secs(3600),
    )));
    let calls = Arc::new(AtomicUsize::new(0));
    let driver = {
        let listener = Arc::clone(&listener);
        let calls = Arc::clone(&calls);
        thread::spawn(move || {
            listener.listen(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        })
    };
    wait_for_state(&listener, ListenerState::Listening);
    thread::sleep(Duration::from_millis(20));

    let stopper = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || {
            listener.stop();
            listener.wait(Some(LONG))
        })
    };
    stopper.join().unwrap().unwrap();
    assert_eq!(listener.state(), ListenerState::Dead);

    let after_wait = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), after_wait);
    driver.join().unwrap().unwrap();
}

#[test]
fn second_listen_is_rejected_without_disturbing_the_first() {
    let (strategy, _release) = Blocking::new(true, true);
    let listener = Arc::new(Listener::new(strategy));
    let (tx, _rx) = unbounded();
    let driver = spawn_listen(&listener, tx);
    wait_for_state(&listener, ListenerState::Listening);

    match listener.listen(|_| {}) {
        Err(ListenerError::Usage(message)) => assert!(message.contains("already running")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(listener.state(), ListenerState::Listening);
    assert!(!listener.strategy().exited.load(Ordering::SeqCst));

    listener.wait(Some(LONG)).unwrap();
    driver.join().unwrap().unwrap();
    assert!(listener.strategy().exited.load(Ordering::SeqCst));
}

#[test]
fn stop_and_wait_are_noops_when_dead() {
    let (strategy, _release) = Blocking::new(true, true);
    let listener = Listener::new(strategy);

    listener.stop();
    assert_eq!(listener.state(), ListenerState::Dead);
    listener.wait(None).unwrap();
    listener.wait(Some(Duration::ZERO)).unwrap();
    assert_eq!(listener.strategy().shutdowns.load(Ordering::SeqCst), 0);
}

#[test]
fn repeated_stop_signals_the_strategy_once() {
    let (strategy, _release) = Blocking::new(true, true);
    let listener = Arc::new(Listener::new(strategy));
    let (tx, _rx) = unbounded();
    let driver = spawn_listen(&listener, tx);
    wait_for_state(&listener, ListenerState::Listening);

    listener.stop();
    listener.stop();
    assert_eq!(listener.state(), ListenerState::Stopping);
    listener.wait(Some(LONG)).unwrap();
    listener.stop();

    assert_eq!(listener.strategy().shutdowns.load(Ordering::SeqCst), 1);
    driver.join().unwrap().unwrap();
}

#[test]
fn wait_times_out_while_watch_is_alive_and_can_be_retried() {
    let (strategy, release) = Blocking::new(false, true);
    let listener = Arc::new(Listener::new(strategy));
    let (tx, _rx) = unbounded();
    let driver = spawn_listen(&listener, tx);
    wait_for_state(&listener, ListenerState::Listening);

    match listener.wait(Some(Duration::ZERO)) {
        Err(ListenerError::Timeout(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(listener.state(), ListenerState::Stopping);
    assert!(matches!(
        listener.wait(Some(Duration::from_millis(10))),
        Err(ListenerError::Timeout(_))
    ));
    assert!(!listener.strategy().exited.load(Ordering::SeqCst));

    release.send(()).unwrap();
    listener.wait(Some(LONG)).unwrap();
    assert!(listener.strategy().exited.load(Ordering::SeqCst));
    assert_eq!(listener.state(), ListenerState::Dead);
    driver.join().unwrap().unwrap();
}

#[test]
fn zero_timeout_never_succeeds_before_the_watch_exits() {
    let (strategy, _release) = Blocking::new(true, true);
    let listener = Arc::new(Listener::new(strategy));
    let (tx, _rx) = unbounded();
    let driver = spawn_listen(&listener, tx);
    wait_for_state(&listener, ListenerState::Listening);

    loop {
        match listener.wait(Some(Duration::ZERO)) {
            Ok(()) => {
                assert!(listener.strategy().exited.load(Ordering::SeqCst));
                break;
            }
            Err(ListenerError::Timeout(_)) => thread::sleep(Duration::from_millis(1)),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    driver.join().unwrap().unwrap();
}

#[test]
fn unbounded_wait_is_refused_for_uninterruptible_strategies() {
    let (strategy, _release) = Blocking::new(true, false);
    let listener = Arc::new(Listener::new(strategy));
    let (tx, _rx) = unbounded();
    let driver = spawn_listen(&listener, tx);
    wait_for_state(&listener, ListenerState::Listening);

    assert!(matches!(listener.wait(None), Err(ListenerError::Usage(_))));
    assert_eq!(listener.state(), ListenerState::Listening);

    listener.wait(Some(LONG)).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn unsupported_platform_resets_to_dead() {
    let listener = Listener::new(Failing::new(true));

    assert!(matches!(
        listener.listen(|_| {}),
        Err(ListenerError::UnsupportedPlatform)
    ));
    assert_eq!(listener.state(), ListenerState::Dead);
    assert_eq!(listener.strategy().shutdowns.load(Ordering::SeqCst), 0);

    // The same listener may try again.
    assert!(matches!(
        listener.listen(|_| {}),
        Err(ListenerError::UnsupportedPlatform)
    ));
    assert_eq!(listener.state(), ListenerState::Dead);
}

#[test]
fn strategy_failure_stops_then_surfaces() {
    let listener = Listener::new(Failing::new(false));

    match listener.listen(|_| {}) {
        Err(ListenerError::ListenFailed(WatchError::Io(err))) => {
            assert_eq!(err.kind(), io::ErrorKind::NotFound)
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(listener.state(), ListenerState::Stopping);
    assert_eq!(listener.strategy().shutdowns.load(Ordering::SeqCst), 1);

    assert!(matches!(
        listener.listen(|_| {}),
        Err(ListenerError::Usage(_))
    ));
    listener.wait(Some(LONG)).unwrap();
    assert_eq!(listener.state(), ListenerState::Dead);
}

#[test]
fn panicking_callback_tears_down_the_session() {
    let probe = scripted(&[Theme::Dark, Theme::Light]);
    let listener = Arc::new(Listener::new(PollStrategy::new(
        probe,
        Duration::from_millis(1),
    )));
    let driver = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.listen(|_| panic!("callback failed")))
    };

    assert!(driver.join().is_err());
    assert_eq!(listener.state(), ListenerState::Stopping);
    listener.wait(Some(LONG)).unwrap();
    assert_eq!(listener.state(), ListenerState::Dead);
}

#[test]
fn listener_can_be_reused_after_wait() {
    let listener = Arc::new(Listener::new(PollStrategy::new(
        scripted(&[Theme::Light, Theme::Dark]),
        Duration::from_millis(1),
    )));

    for _ in 0..2 {
        let (tx, rx) = bounded(8);
        let driver = spawn_listen(&listener, tx);
        wait_for_state(&listener, ListenerState::Listening);
        listener.wait(Some(LONG)).unwrap();
        driver.join().unwrap().unwrap();
        assert!(rx.try_iter().all(|theme| theme.is_known()));
    }
}
