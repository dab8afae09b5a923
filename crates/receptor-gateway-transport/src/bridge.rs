//! Glue between a session and whatever carries its frames.

use futures::{Sink, SinkExt};
use receptor_gateway_core::Receptor;
use receptor_gateway_session::{ReceptorSession, SessionChannels};
use tokio_util::sync::CancellationToken;

use crate::protocol::{AgentFrame, GatewayFrame};

/// Why the outbound loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundExit {
    /// The session was closed.
    Closed,
    /// A fault was reported against the session.
    Fault(String),
    /// The sink stopped accepting frames.
    SinkFailed,
}

/// Apply one inbound agent frame to its session.
pub fn apply_agent_frame(session: &ReceptorSession, frame: AgentFrame) {
    match frame {
        AgentFrame::Hello { node_id, metadata } => {
            if let Err(e) = session.register_connection(&node_id, metadata) {
                tracing::debug!(%node_id, error = %e, "ignoring hello on closed session");
            }
        }
        AgentFrame::RouteTable { edges, seen } => {
            if let Err(e) = session.update_routing_table(edges, seen) {
                tracing::debug!(node_id = %session.node_id(), error = %e, "ignoring route table");
            }
        }
        AgentFrame::Response(response) => {
            session.deliver_response(response);
        }
        AgentFrame::Fault { message } => {
            session.report_fault(message);
        }
    }
}

/// Drain a session's outbound channels into `sink` as encoded frames.
///
/// Control traffic goes first. Once the session closes or is dropped,
/// control frames still queued (withdrawal, terminate) are flushed and the
/// sink is closed; pending jobs are dropped.
pub async fn forward_outbound<S>(
    mut channels: SessionChannels,
    closed: CancellationToken,
    mut sink: S,
) -> OutboundExit
where
    S: Sink<String> + Unpin,
    S::Error: std::fmt::Display,
{
    let exit = loop {
        let frame = tokio::select! {
            biased;
            Some(control) = channels.control.recv() => GatewayFrame::Control(control),
            Some(fault) = channels.faults.recv() => {
                tracing::warn!(fault = %fault, "session fault reported");
                break OutboundExit::Fault(fault.detail);
            }
            () = closed.cancelled() => break OutboundExit::Closed,
            Some(message) = channels.messages.recv() => GatewayFrame::Job(message),
        };

        if !send_frame(&mut sink, &frame).await {
            break OutboundExit::SinkFailed;
        }
    };

    if exit != OutboundExit::SinkFailed {
        while let Ok(control) = channels.control.try_recv() {
            if !send_frame(&mut sink, &GatewayFrame::Control(control)).await {
                break;
            }
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "error closing outbound sink");
    }
    exit
}

async fn send_frame<S>(sink: &mut S, frame: &GatewayFrame) -> bool
where
    S: Sink<String> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match frame.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize frame: {e}");
            return true;
        }
    };
    match sink.send(text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "outbound sink closed");
            false
        }
    }
}
