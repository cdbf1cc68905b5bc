use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::io;
use std::process::{Child, Command, Stdio};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use objc2::rc::{autoreleasepool, Retained};
use objc2::runtime::AnyClass;
use objc2::{define_class, msg_send, sel, AllocAnyThread, DefinedClass};
use objc2_foundation::{
    ns_string, NSDate, NSDefaultRunLoopMode, NSDistributedNotificationCenter, NSNotification,
    NSObject, NSObjectProtocol, NSRunLoop, NSUserDefaults,
};
use parking_lot::Mutex;
use tracing::{debug, error, warn};
use wait_timeout::ChildExt;

use crate::capability;
use crate::config::{ListenerConfig, WorkerConfig};
use crate::error::WatchError;
use crate::listener::{WatchContext, WatchStrategy};
use crate::relay::{self, LineRelay};
use crate::theme::{ChangeFilter, Theme};

const REAP_POLL: Duration = Duration::from_millis(5);

type CFRunLoopRef = *mut c_void;

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFRunLoopGetCurrent() -> CFRunLoopRef;
    fn CFRunLoopStop(run_loop: CFRunLoopRef);
    fn CFRunLoopWakeUp(run_loop: CFRunLoopRef);
}

pub(crate) fn query_theme() -> Theme {
    autoreleasepool(|_| {
        let style = unsafe {
            NSUserDefaults::standardUserDefaults().stringForKey(ns_string!("AppleInterfaceStyle"))
        };
        // The key is only present while dark mode is on.
        match style {
            Some(style) if style.to_string() == "Dark" => Theme::Dark,
            _ => Theme::Light,
        }
    })
}

pub(crate) fn listen_supported() -> bool {
    AnyClass::get(c"NSDistributedNotificationCenter").is_some()
}

struct ThemeObserverIvars {
    on_notification: Box<dyn Fn()>,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[name = "ThemeWatchObserver"]
    #[ivars = ThemeObserverIvars]
    struct ThemeObserver;

    impl ThemeObserver {
        #[unsafe(method(themeChanged:))]
        fn _theme_changed(&self, _notification: &NSNotification) {
            (self.ivars().on_notification)();
        }
    }

    unsafe impl NSObjectProtocol for ThemeObserver {}
);

impl ThemeObserver {
    fn new(on_notification: impl Fn() + 'static) -> Retained<Self> {
        let observer = Self::alloc().set_ivars(ThemeObserverIvars {
            on_notification: Box::new(on_notification),
        });
        unsafe { msg_send![super(observer), init] }
    }
}

/// Observer registration with the distributed notification center, removed on drop.
struct Registration {
    center: Retained<NSDistributedNotificationCenter>,
    observer: Retained<ThemeObserver>,
}

impl Registration {
    fn install(on_notification: impl Fn() + 'static) -> Registration {
        let observer = ThemeObserver::new(on_notification);
        let center = NSDistributedNotificationCenter::defaultCenter();
        unsafe {
            center.addObserver_selector_name_object(
                &observer,
                sel!(themeChanged:),
                Some(ns_string!("AppleInterfaceThemeChangedNotification")),
                None,
            );
        }
        Registration { center, observer }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        unsafe { self.center.removeObserver(&self.observer) };
    }
}

/// Probes the theme and forwards it to `sink` when it changed. The sink
/// returns `false` once nobody is listening any more.
struct Reporter<F> {
    filter: RefCell<ChangeFilter>,
    sink: F,
    open: Cell<bool>,
}

impl<F: Fn(Theme) -> bool> Reporter<F> {
    fn new(sink: F) -> Reporter<F> {
        Reporter {
            filter: RefCell::new(ChangeFilter::default()),
            sink,
            open: Cell::new(true),
        }
    }

    fn report(&self) {
        let changed = self.filter.borrow_mut().observe(query_theme());
        if let Some(theme) = changed {
            if !(self.sink)(theme) {
                self.open.set(false);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.get()
    }
}

/// Installs the observer and spins the current thread's run loop until
/// `keep_running` says otherwise or the reporter's sink closes.
///
/// Every tick also re-probes the theme, since distributed notifications are
/// not reliably delivered to run loops of secondary threads.
fn run_observer<F, K>(reporter: Rc<Reporter<F>>, tick: Duration, keep_running: K)
where
    F: Fn(Theme) -> bool + 'static,
    K: Fn() -> bool,
{
    let _registration = {
        let reporter = Rc::clone(&reporter);
        Registration::install(move || reporter.report())
    };
    reporter.report();

    while keep_running() && reporter.is_open() {
        let ran = autoreleasepool(|_| {
            let run_loop = NSRunLoop::currentRunLoop();
            let limit = NSDate::dateWithTimeIntervalSinceNow(tick.as_secs_f64());
            unsafe { run_loop.runMode_beforeDate(NSDefaultRunLoopMode, &limit) }
        });
        if !ran {
            // No input sources attached yet; avoid spinning.
            thread::park_timeout(tick);
        }
        reporter.report();
    }
}

/// Entry point of a process-mode relay worker.
///
/// Runs on the process main thread, writes one theme name per line to stdout
/// and returns when stdout closes or the parent process goes away.
pub fn run_relay_worker() -> Result<(), WatchError> {
    if !capability::can_listen() {
        return Err(WatchError::Unsupported);
    }
    let parent = unsafe { libc::getppid() };
    let reporter = Rc::new(Reporter::new(|theme: Theme| {
        relay::write_line(&mut io::stdout().lock(), theme).is_ok()
    }));
    debug!(parent, "relay worker running");
    run_observer(reporter, ListenerConfig::default().poll_interval(), || {
        unsafe { libc::getppid() } == parent
    });
    debug!("relay worker exiting");
    Ok(())
}

/// `CFRunLoopRef` of the worker thread.
struct RunLoopHandle(CFRunLoopRef);

// SAFETY: CFRunLoopStop and CFRunLoopWakeUp are thread-safe, and the handle
// is withdrawn by the worker before its run loop goes away.
unsafe impl Send for RunLoopHandle {}

struct ThreadWorker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    run_loop: Arc<Mutex<Option<RunLoopHandle>>>,
}

enum Worker {
    Thread(ThreadWorker),
    Process(Child),
}

impl Worker {
    fn terminate(&mut self) {
        match self {
            Worker::Thread(worker) => {
                worker.stop.store(true, Ordering::Release);
                if let Some(run_loop) = worker.run_loop.lock().as_ref() {
                    unsafe {
                        CFRunLoopStop(run_loop.0);
                        CFRunLoopWakeUp(run_loop.0);
                    }
                }
                worker.handle.thread().unpark();
            }
            Worker::Process(child) => {
                // Errors only when the child was already reaped.
                if let Err(err) = child.kill() {
                    debug!(error = %err, "relay worker already gone");
                }
            }
        }
    }

    /// Joins an exited observer thread. Process workers are already reaped.
    fn release(self) {
        if let Worker::Thread(worker) = self {
            if worker.handle.join().is_err() {
                error!("observer thread panicked");
            }
        }
    }

    /// `true` once the worker has fully exited.
    fn reap(&mut self, deadline: Option<Instant>) -> bool {
        match self {
            Worker::Thread(worker) => loop {
                if worker.handle.is_finished() {
                    return true;
                }
                match deadline {
                    Some(deadline) if Instant::now() >= deadline => return false,
                    _ => thread::sleep(REAP_POLL),
                }
            },
            Worker::Process(child) => {
                let result = match deadline {
                    Some(deadline) => {
                        child.wait_timeout(deadline.saturating_duration_since(Instant::now()))
                    }
                    None => child.wait().map(Some),
                };
                match result {
                    Ok(Some(status)) => {
                        debug!(%status, "relay worker reaped");
                        true
                    }
                    Ok(None) => false,
                    Err(err) => {
                        warn!(error = %err, "could not reap relay worker");
                        true
                    }
                }
            }
        }
    }
}

/// Listens for `AppleInterfaceThemeChangedNotification`.
///
/// The notification runtime needs an event loop of its own, so the observer
/// lives in an isolated worker: a dedicated thread running its own run loop,
/// or a child process running [`run_relay_worker`]. Readings come back over
/// the relay and are delivered on the thread that called `listen()`.
pub struct NotificationStrategy {
    worker_config: WorkerConfig,
    relay_capacity: usize,
    tick: Duration,
    worker: Mutex<Option<Worker>>,
}

impl NotificationStrategy {
    pub fn from_config(config: &ListenerConfig) -> NotificationStrategy {
        NotificationStrategy {
            worker_config: config.worker.clone(),
            relay_capacity: config.relay_capacity(),
            tick: config.poll_interval(),
            worker: Mutex::new(None),
        }
    }

    /// Takes the session's worker out of the slot, then stops and reaps it.
    fn retire_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.terminate();
            worker.reap(None);
            worker.release();
        }
    }

    fn install_worker(&self, worker: Worker, ctx: &WatchContext<'_>) {
        *self.worker.lock() = Some(worker);
        // A stop that landed before the worker was published found nothing to terminate.
        if !ctx.is_listening() {
            self.initiate_shutdown();
        }
    }

    fn watch_thread(
        &self,
        ctx: &WatchContext<'_>,
        filter: &mut ChangeFilter,
        on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        let (sender, receiver) = relay::channel(self.relay_capacity);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let run_loop = Arc::new(Mutex::new(None));
        let tick = self.tick;

        let handle = {
            let stop = Arc::clone(&stop);
            let run_loop = Arc::clone(&run_loop);
            thread::Builder::new()
                .name("theme-watch-observer".to_string())
                .spawn(move || {
                    *run_loop.lock() = Some(RunLoopHandle(unsafe { CFRunLoopGetCurrent() }));
                    let _ = ready_tx.send(());
                    let reporter = Rc::new(Reporter::new(move |theme: Theme| sender.push(theme)));
                    run_observer(reporter, tick, || !stop.load(Ordering::Acquire));
                    run_loop.lock().take();
                })?
        };
        // The run loop handle is published before the observer starts.
        let _ = ready_rx.recv();
        self.install_worker(
            Worker::Thread(ThreadWorker {
                handle,
                stop,
                run_loop,
            }),
            ctx,
        );

        for reading in receiver {
            if !ctx.is_listening() {
                break;
            }
            if let Some(theme) = filter.observe(reading) {
                debug!(%theme, "theme changed");
                on_change(theme);
            }
        }
        Ok(())
    }

    fn watch_process(
        &self,
        program: &std::path::Path,
        args: &[String],
        ctx: &WatchContext<'_>,
        filter: &mut ChangeFilter,
        on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("relay worker has no stdout"))?;
        debug!(pid = child.id(), "relay worker spawned");
        self.install_worker(Worker::Process(child), ctx);

        for reading in LineRelay::new(stdout) {
            let reading = reading?;
            if !ctx.is_listening() {
                break;
            }
            if let Some(theme) = filter.observe(reading) {
                debug!(%theme, "theme changed");
                on_change(theme);
            }
        }

        if ctx.is_listening() {
            if let Some(Worker::Process(child)) = self.worker.lock().as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    if !status.success() {
                        error!(%status, "relay worker exited unexpectedly");
                        return Err(WatchError::WorkerExited(status));
                    }
                }
            }
        }
        Ok(())
    }
}

impl WatchStrategy for NotificationStrategy {
    fn watch(
        &self,
        ctx: &WatchContext<'_>,
        on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        if !capability::can_listen() {
            return Err(WatchError::Unsupported);
        }
        let mut filter = ChangeFilter::seeded(query_theme());
        let result = match &self.worker_config {
            WorkerConfig::Thread => self.watch_thread(ctx, &mut filter, on_change),
            WorkerConfig::Process { program, args } => {
                self.watch_process(program, args, ctx, &mut filter, on_change)
            }
        };
        self.retire_worker();
        result
    }

    fn initiate_shutdown(&self) {
        if let Some(worker) = self.worker.lock().as_mut() {
            worker.terminate();
        }
    }

    /// Reaps a worker the watch loop has not retired yet. The loop itself
    /// empties the slot before it returns, so an empty slot here only means
    /// `Listener::wait` still has to acquire the driver lock.
    fn wait_for_shutdown(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut slot = self.worker.lock();
        let Some(worker) = slot.as_mut() else {
            return true;
        };
        if !worker.reap(deadline) {
            return false;
        }
        if let Some(worker) = slot.take() {
            worker.release();
        }
        true
    }
}

impl Drop for NotificationStrategy {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.get_mut().take() {
            worker.terminate();
            worker.reap(Some(Instant::now() + Duration::from_secs(1)));
        }
    }
}
