use crate::agent::AgentCommand;
use crate::power::{InteractiveStatus, MacOsPowerSource, PowerSource};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

const SCREEN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Watch the OS power state and deliver every interactive/non-interactive
/// transition to the agent as a command. Returns `None` when the platform
/// has no power source; the agent then simply stays on its active cadence.
pub fn spawn_screen_watch(command_tx: UnboundedSender<AgentCommand>) -> Option<JoinHandle<()>> {
    spawn_screen_watch_internal(
        command_tx,
        Arc::new(MacOsPowerSource),
        SCREEN_POLL_INTERVAL,
    )
}

fn spawn_screen_watch_internal(
    command_tx: UnboundedSender<AgentCommand>,
    source: Arc<dyn PowerSource>,
    poll_interval: Duration,
) -> Option<JoinHandle<()>> {
    let initial = source.interactive_status();
    if matches!(initial, InteractiveStatus::NotSupported) {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut last = initial;
        loop {
            if command_tx.is_closed() {
                break;
            }

            sleep(poll_interval).await;

            if command_tx.is_closed() {
                break;
            }

            let status = source.interactive_status();
            if matches!(
                status,
                InteractiveStatus::Unknown | InteractiveStatus::NotSupported
            ) || status == last
            {
                continue;
            }
            last = status;

            // No debouncing: rapid toggles are forwarded as-is and the
            // scheduler is expected to cope.
            let interactive = status == InteractiveStatus::Interactive;
            if command_tx
                .send(AgentCommand::ScreenStateChanged { interactive })
                .is_err()
            {
                break;
            }
        }
    }))
}
