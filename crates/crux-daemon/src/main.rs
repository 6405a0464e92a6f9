//! `crux-daemon` entry point.
//!
//! Intentionally thin: all wiring lives in `lib.rs`. This just builds the
//! application and runs it to completion (spec §4.F "run()").

fn main() -> anyhow::Result<()> {
    let app = crux_daemon::build_application()?;
    let code = app.run();
    std::process::exit(code);
}
