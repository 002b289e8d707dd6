//! Stream a G-code file to the configured controller
//!
//! Usage: `gcodestream <file.gcode> [config.toml]`

use anyhow::Context;
use gcodestream::{
    init_logging, CommandCreator, Config, Controller, ControllerEvent, GcodeStreamReader,
    SerialConnection,
};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let mut args = std::env::args().skip(1);
    let gcode = args
        .next()
        .map(PathBuf::from)
        .context("usage: gcodestream <file.gcode> [config.toml]")?;
    let config_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };

    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let params = config.connection_params()?;

    let controller = Controller::new(config.controller_config());
    let mut events = controller.subscribe();
    controller
        .open_connection(Box::new(SerialConnection::new(params)))
        .await?;

    let source = GcodeStreamReader::open(&gcode, CommandCreator::new())?;
    controller.queue_command_source(Box::new(source))?;
    controller.begin_streaming()?;

    let success = loop {
        match events.recv().await {
            Some(ControllerEvent::StreamComplete { success }) => break success,
            Some(ControllerEvent::ConsoleMessage(message)) => {
                tracing::info!("{}", message.text)
            }
            Some(ControllerEvent::Disconnected) | None => break false,
            Some(_) => {}
        }
    };

    tracing::info!(
        "Sent {} rows in {:.1}s, {} errors",
        controller.rows_completed(),
        controller.send_duration().as_secs_f64(),
        controller.error_count()
    );
    controller.close_connection()?;

    anyhow::ensure!(success, "stream did not complete successfully");
    Ok(())
}
