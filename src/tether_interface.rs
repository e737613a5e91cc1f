use anyhow::Result;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tether_agent::{ChannelDefinition, ChannelOptionsBuilder, TetherAgent, TetherAgentOptionsBuilder};

use crate::{
    analysis::CountReport,
    monitor::MonitorEvent,
    systems::debounce::{EdgeDirection, EdgeEvent},
};

pub fn connect(role: &str, group: &str, host: &str) -> Result<TetherAgent> {
    let tether_agent = TetherAgentOptionsBuilder::new(role)
        .id(Some(group))
        .host(Some(host))
        .build()?;
    info!("Tether Agent connected to {} as {}/{}", host, role, group);
    Ok(tether_agent)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeMessage {
    pub pin: u32,
    pub direction: EdgeDirection,
    pub level: String,
    /// Local wall-clock time, millisecond precision
    pub timestamp: String,
}

impl EdgeMessage {
    pub fn new(pin: u32, edge: &EdgeEvent) -> Self {
        EdgeMessage {
            pin,
            direction: edge.direction,
            level: String::from(edge.direction.level_name()),
            timestamp: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
        }
    }
}

pub struct MonitorOutputs {
    pub edge_output: ChannelDefinition,
    pub status_output: ChannelDefinition,
    pub still_output: ChannelDefinition,
}

impl MonitorOutputs {
    pub fn new(tether_agent: &mut TetherAgent) -> Result<MonitorOutputs> {
        let edge_output = ChannelOptionsBuilder::create_sender("edgeEvents")
            .qos(Some(1))
            .build(tether_agent)?;

        // Latest status should be available to late subscribers
        let status_output = ChannelOptionsBuilder::create_sender("recordingStatus")
            .qos(Some(1))
            .retain(Some(true))
            .build(tether_agent)?;

        let still_output = ChannelOptionsBuilder::create_sender("stillCaptures")
            .qos(Some(1))
            .build(tether_agent)?;

        Ok(MonitorOutputs {
            edge_output,
            status_output,
            still_output,
        })
    }
}

pub struct AnalysisOutputs {
    pub count_output: ChannelDefinition,
}

impl AnalysisOutputs {
    pub fn new(tether_agent: &mut TetherAgent) -> Result<AnalysisOutputs> {
        let count_output = ChannelOptionsBuilder::create_sender("countResults")
            .qos(Some(2))
            .retain(Some(true))
            .build(tether_agent)?;
        Ok(AnalysisOutputs { count_output })
    }
}

/// Encode and send; failures are logged, never fatal
fn publish<T: Serialize + ?Sized>(
    tether_agent: &TetherAgent,
    channel: &ChannelDefinition,
    value: &T,
    what: &str,
) {
    match rmp_serde::to_vec_named(value) {
        Ok(payload) => {
            if let Err(e) = tether_agent.send(channel, Some(&payload)) {
                error!("Failed to publish {}: {e:?}", what);
            }
        }
        Err(e) => error!("Failed to encode {}: {e}", what),
    }
}

pub fn publish_monitor_event(
    tether_agent: &TetherAgent,
    outputs: &MonitorOutputs,
    pin: u32,
    event: &MonitorEvent,
) {
    match event {
        MonitorEvent::Edge(edge) => publish(
            tether_agent,
            &outputs.edge_output,
            &EdgeMessage::new(pin, edge),
            "edge event",
        ),
        MonitorEvent::Status(status) => publish(
            tether_agent,
            &outputs.status_output,
            status,
            "recording status",
        ),
        MonitorEvent::StillCaptured(path) => publish(
            tether_agent,
            &outputs.still_output,
            &path.to_string_lossy(),
            "still capture",
        ),
        // Session transitions reach subscribers through the status
        other => debug!("Not published: {:?}", other),
    }
}

pub fn publish_count_report(
    tether_agent: &TetherAgent,
    outputs: &AnalysisOutputs,
    report: &CountReport,
) {
    publish(tether_agent, &outputs.count_output, report, "count results");
}
