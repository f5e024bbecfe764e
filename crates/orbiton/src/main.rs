use std::io;
use std::sync::mpsc;
use std::sync::Arc;

use orbiton::app::{App, Flow};
use orbiton::config::Config;
use orbiton::display::TerminalDisplay;
use orbiton::interrupt::InterruptCoordinator;
use orbiton::logging;
use orbiton::runners::runner_for_id;
use orbiton::runtime::{AppEvent, RuntimeController, TurnHost};
use agent_runner::Notification;
use orbiton_tui::{ProcessTerminal, TerminalSignal};
use tracing::{debug, info, warn};

fn main() -> io::Result<()> {
    let config = Config::load().map_err(io::Error::other)?;
    let log_path = logging::init(&config.state_dir)?;
    info!(log = %log_path.display(), runner = %config.runner, "orbiton starting");

    let runner = runner_for_id(&config.runner).map_err(io::Error::other)?;
    let coordinator = Arc::new(InterruptCoordinator::new());
    let (events, receiver) = mpsc::channel();

    let mut controller =
        RuntimeController::new(runner, Arc::clone(&coordinator), events.clone());
    let profile = controller.profile();
    let mut app = App::new(config, &profile, Arc::clone(&coordinator));
    let mut display = TerminalDisplay::new(ProcessTerminal::new());

    let input_events = events.clone();
    let signal_events = events;
    display.start(
        Box::new(move |line| {
            let _ = input_events.send(AppEvent::Input(line));
        }),
        Box::new(move |signal| {
            let event = match signal {
                TerminalSignal::Interrupt => AppEvent::Interrupt,
                TerminalSignal::Resize => AppEvent::Resize,
                TerminalSignal::EndOfInput => AppEvent::InputClosed,
            };
            let _ = signal_events.send(event);
        }),
    )?;
    app.start(&mut display);

    while let Ok(event) = receiver.recv() {
        let submitted = matches!(event, AppEvent::Input(_));
        let resized = matches!(event, AppEvent::Resize);

        let flow = app.handle_event(event, &mut controller, &mut display);
        if submitted {
            display.input_consumed();
        }
        if resized {
            display.redraw();
        }
        if flow == Flow::Exit {
            break;
        }
    }

    debug!("shutting down");
    controller.shutdown();
    // Settle the interrupted turn so the final snapshot has no in-flight tools.
    while let Ok(event) = receiver.try_recv() {
        if matches!(event, AppEvent::Notification(_)) {
            app.handle_event(event, &mut controller, &mut display);
        }
    }
    // A detached worker never reports back; settle its turn here.
    if let Some(run_id) = coordinator.active_run() {
        warn!(run_id, "turn still running at exit");
        let event = AppEvent::Notification(Notification::Interrupted { run_id });
        app.handle_event(event, &mut controller, &mut display);
    }
    app.shutdown(&mut display);
    display.stop()
}
