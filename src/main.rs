use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use theme_watch::{system_listener, ListenerConfig};

const RELAY_WORKER_FLAG: &str = "--relay-worker";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const TERMINATE_POLL: Duration = Duration::from_millis(100);

const USAGE: &str = "usage: theme-watch [theme | listen | --relay-worker]";

static TERMINATE: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_terminate(_signal: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_terminate_handler() {
    use std::{mem, ptr};

    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handle_terminate as *const () as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGINT, &action, ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &action, ptr::null_mut());
    }
}

#[cfg(not(unix))]
fn install_terminate_handler() {}

fn init_logging() {
    // stdout carries theme names only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "theme_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Prints every theme change until SIGINT/SIGTERM, then shuts the listener down.
fn listen_until_terminated() -> Result<(), Box<dyn Error>> {
    let config = ListenerConfig::load()?;
    let listener = Arc::new(system_listener(&config));
    install_terminate_handler();

    let driver = {
        let listener = Arc::clone(&listener);
        thread::Builder::new()
            .name("theme-watch-listen".to_string())
            .spawn(move || listener.listen(|theme| println!("{theme}")))?
    };
    info!("listening for theme changes");

    while !TERMINATE.load(Ordering::SeqCst) && !driver.is_finished() {
        thread::sleep(TERMINATE_POLL);
    }

    listener.stop();
    listener.wait(Some(SHUTDOWN_TIMEOUT))?;
    match driver.join() {
        Ok(result) => result?,
        Err(_) => return Err("listener thread panicked".into()),
    }
    info!("listener stopped");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("theme") => {
            println!("{}", theme_watch::theme());
            Ok(())
        }
        Some("listen") => listen_until_terminated(),
        Some(RELAY_WORKER_FLAG) => Ok(theme_watch::watch::run_relay_worker()?),
        Some(_) => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}
