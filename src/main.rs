//! Binary entry point for `rudis-server`.
//!
//! Control flow: parse arguments, initialise logging, build the server
//! state and the event loop, install the listeners / cron timer /
//! before-sleep hook, then hand the thread to the loop until a shutdown is
//! requested.  Exit code 0 on clean shutdown, 1 on initialisation failure.

use log::{info, LevelFilter};

use rudis::cli::parse_args;
use rudis::server::{before_sleep, server_cron};
use rudis::{AeEventLoop, Server};

fn main() {
    let parsed = match parse_args() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("rudis-server: {e}");
            std::process::exit(1);
        }
    };
    if parsed.exit_early {
        std::process::exit(0);
    }

    let default_level = match parsed.verbosity {
        i32::MIN..=-1 => LevelFilter::Error,
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(default_level)
        .init();

    let mut server = Server::new(parsed.config);
    let mut el = match AeEventLoop::<Server>::new(server.event_loop_size()) {
        Ok(el) => el,
        Err(e) => {
            eprintln!("rudis-server: cannot create event loop: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.listen(&mut el) {
        eprintln!("rudis-server: {e}");
        std::process::exit(1);
    }

    el.create_time_event(1, server_cron);
    el.before_sleep = Some(before_sleep);

    info!(
        "rudis-server v{} ready to accept connections, pid {}",
        rudis::RUDIS_VERSION_STRING,
        std::process::id()
    );

    el.run(&mut server);

    info!("shutdown requested, exiting");
    server.teardown(&mut el);
    std::process::exit(0);
}
