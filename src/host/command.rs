//! Remote command execution on a host.

use tracing::{debug, info, warn};

use crate::compute::{
    CommandId, CommandStatus, ComputeError, OutputEvent, OutputStream, Region, RemoteCompute,
};
use crate::fault::Fault;
use crate::model::Host;
use crate::settle::settle;

use super::{HostController, require_instance, require_region};

/// One output line tagged with the stream it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamEvent {
    /// Originating stream.
    pub stream: OutputStream,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Output line.
    pub message: String,
}

/// Final state of a remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutcome {
    /// Provider command id.
    pub command_id: CommandId,
    /// Final status.
    pub status: CommandStatus,
    /// Merged stdout and stderr ordered by timestamp; empty when silent.
    pub events: Vec<StreamEvent>,
}

impl<C: RemoteCompute + ?Sized> HostController<'_, C> {
    /// Runs a shell script on the host and waits for it to finish.
    ///
    /// The status is polled up to `command_max_attempts` times. Unless
    /// `silent`, stdout and stderr are fetched and merged in timestamp
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Timeout`] when the command is still in flight after
    /// the last poll, and a remote fault when any provider call fails.
    pub async fn send_command(
        &self,
        host: &Host,
        commands: &[String],
        silent: bool,
    ) -> Result<CommandOutcome, Fault> {
        let region = require_region(host)?;
        let instance_id = require_instance(host)?;
        let remote = |err| Fault::remote(&host.id, err);

        let command_id = self
            .compute
            .send_remote_command(
                &region,
                &instance_id,
                commands,
                &self.config.command_output_channel,
            )
            .await
            .map_err(remote)?;
        debug!(host_id = %host.id, command_id = %command_id, lines = commands.len(), "command sent");

        let max_attempts = self.config.command_max_attempts;
        let mut attempt = 0;
        let status = loop {
            attempt += 1;
            let status = self
                .compute
                .poll_command_status(&region, &command_id, &instance_id)
                .await
                .map_err(remote)?;
            if !status.is_in_flight() {
                break status;
            }
            if attempt >= max_attempts {
                warn!(host_id = %host.id, command_id = %command_id, attempts = attempt, "command timed out");
                return Err(Fault::Timeout {
                    entity_id: host.id.clone(),
                    operation: format!("command {command_id}"),
                    attempts: attempt,
                });
            }
            tokio::time::sleep(self.config.command_poll_interval()).await;
        };

        if status == CommandStatus::Success {
            info!(host_id = %host.id, command_id = %command_id, "command finished");
        } else {
            warn!(host_id = %host.id, command_id = %command_id, status = ?status, "command did not succeed");
        }

        let events = if silent {
            Vec::new()
        } else {
            let streams = [OutputStream::Stdout, OutputStream::Stderr];
            let fetched = settle(
                streams
                    .into_iter()
                    .map(|stream| self.fetch_stream(&region, &command_id, &instance_id, stream)),
            )
            .await
            .into_result()
            .map_err(remote)?;
            merge_streams(fetched)
        };

        Ok(CommandOutcome {
            command_id,
            status,
            events,
        })
    }

    async fn fetch_stream(
        &self,
        region: &Region,
        command_id: &CommandId,
        instance_id: &str,
        stream: OutputStream,
    ) -> Result<(OutputStream, Vec<OutputEvent>), ComputeError> {
        let events = self
            .compute
            .fetch_command_output(region, command_id, instance_id, stream)
            .await?;
        Ok((stream, events))
    }
}

fn merge_streams(streams: Vec<(OutputStream, Vec<OutputEvent>)>) -> Vec<StreamEvent> {
    let mut merged: Vec<StreamEvent> = streams
        .into_iter()
        .flat_map(|(stream, events)| {
            events.into_iter().map(move |event| StreamEvent {
                stream,
                timestamp_ms: event.timestamp_ms,
                message: event.message,
            })
        })
        .collect();
    merged.sort_by_key(|event| event.timestamp_ms);
    merged
}
