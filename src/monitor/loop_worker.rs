use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::controller::{EngineReceiver, VisibilityEvent};
use crate::config::ProctorConfig;
use crate::detection::{
    classify, classify_visibility, CooldownGate, EscalationCounter, GazeThresholds,
};
use crate::pose::{FrameSource, PoseAdapter, VideoFrame};
use crate::relay::AlertRelay;
use crate::storage::AttemptStore;
use crate::submission::{self, HostQuizPage, SubmissionSequencer};
use crate::ui::StatusSink;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

/// Everything the detection loop owns for one monitoring session.
pub struct MonitorContext {
    pub attempt_id: String,
    pub config: ProctorConfig,
    pub adapter: PoseAdapter,
    pub store: Arc<dyn AttemptStore>,
    pub escalation: EscalationCounter,
    pub relay: AlertRelay,
    pub sequencer: SubmissionSequencer,
    pub page: Arc<dyn HostQuizPage>,
    pub status: Arc<dyn StatusSink>,
}

/// Self-rescheduling detection tick plus the parallel visibility channel.
///
/// Within one tick the order is fixed: observation, classification, cooldown
/// check, then status/relay/escalation effects. Relay dispatches are spawned
/// and never awaited here. The loop exits on cancellation or when the
/// escalation threshold hands the page over to the forced-submission
/// sequencer.
pub async fn monitor_loop(
    mut context: MonitorContext,
    mut frames: Box<dyn FrameSource>,
    mut engine_rx: EngineReceiver,
    mut visibility_rx: mpsc::UnboundedReceiver<VisibilityEvent>,
    cancel_token: CancellationToken,
) {
    let thresholds = match GazeThresholds::new(
        context.config.left_threshold_degrees,
        context.config.right_threshold_degrees,
    ) {
        Ok(thresholds) => thresholds,
        Err(err) => {
            log_warn!("refusing to monitor with invalid thresholds: {err:#}");
            return;
        }
    };

    let mut relay_gate = CooldownGate::new(
        context.config.relay_cooldown_ms,
        context.config.cooldown_scope,
    );
    let mut display_gate = CooldownGate::global(context.config.display_cooldown_ms);

    let mut ticker = interval(Duration::from_millis(context.config.frame_poll_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_frame: Option<VideoFrame> = None;
    let mut engine_pending = true;
    let mut visibility_open = true;

    context.status.status("Loading detection model...");
    log_info!(
        "monitoring started for attempt {} (poll every {}ms)",
        context.attempt_id,
        context.config.frame_poll_interval_ms
    );

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("monitor loop shutting down");
                break;
            }
            engine = &mut engine_rx, if engine_pending => {
                engine_pending = false;
                match engine {
                    Ok(Ok(engine)) => {
                        context.adapter.engine_ready(engine);
                        context.status.status("Monitoring active");
                    }
                    Ok(Err(reason)) => {
                        context.adapter.engine_failed(&reason);
                        context.status.status("Camera active, detection unavailable");
                    }
                    Err(_) => {
                        context.adapter.engine_failed("engine initializer dropped");
                        context.status.status("Camera active, detection unavailable");
                    }
                }
            }
            event = visibility_rx.recv(), if visibility_open => {
                match event {
                    Some(event) => {
                        if handle_visibility(&mut context, event, &mut relay_gate) {
                            break;
                        }
                    }
                    None => visibility_open = false,
                }
            }
            _ = ticker.tick() => {
                tick(
                    &mut context,
                    frames.as_mut(),
                    &thresholds,
                    &mut relay_gate,
                    &mut display_gate,
                    &mut last_frame,
                );
            }
        }
    }
    // Dropping the frame source releases the camera stream.
}

fn tick(
    context: &mut MonitorContext,
    frames: &mut dyn FrameSource,
    thresholds: &GazeThresholds,
    relay_gate: &mut CooldownGate,
    display_gate: &mut CooldownGate,
    last_frame: &mut Option<VideoFrame>,
) {
    let Some(frame) = frames.poll_frame() else {
        return;
    };

    let observation = context.adapter.observe(&frame);
    *last_frame = Some(frame);
    let Some(observation) = observation else {
        return;
    };

    // The indicator updates every frame, gated by nothing.
    context.status.gaze(&observation);

    let Some(signal) = classify(&observation, thresholds) else {
        return;
    };

    if display_gate.admit(signal.kind, signal.occurred_at_ms) {
        context.status.warning(&signal.description);
    }

    if relay_gate.admit(signal.kind, signal.occurred_at_ms) {
        context.relay.dispatch(&signal, last_frame.as_ref());
        // Pose violations pass through the counter but never escalate.
        if let Err(err) = context.escalation.record(&context.attempt_id, signal.kind) {
            log_warn!("failed to record violation: {err:#}");
        }
    }
}

/// Returns true when monitoring must stop because the escalation threshold
/// was crossed and the sequencer has taken over.
fn handle_visibility(
    context: &mut MonitorContext,
    event: VisibilityEvent,
    relay_gate: &mut CooldownGate,
) -> bool {
    let Some(mut signal) = classify_visibility(event.hidden, event.occurred_at_ms) else {
        return false;
    };

    if submission::force_submit_armed(context.store.as_ref(), &context.attempt_id) {
        return false;
    }

    let escalation = match context.escalation.record(&context.attempt_id, signal.kind) {
        Ok(escalation) => escalation,
        Err(err) => {
            log_warn!("failed to record tab switch: {err:#}");
            return false;
        }
    };

    signal.description = format!(
        "Tab switch detected ({}/{})",
        escalation.count, context.config.max_tab_switches
    );
    context.status.warning(&signal.description);

    if relay_gate.admit(signal.kind, event.occurred_at_ms) {
        // No camera frame is meaningful for a tab switch.
        context.relay.dispatch(&signal, None);
    }

    if escalation.threshold_crossed {
        context.status.status("VIOLATION! Submitting...");
        log_info!(
            "tab switch budget exhausted for attempt {}; forcing submission",
            context.attempt_id
        );
        if let Err(err) = context
            .sequencer
            .trigger(&context.attempt_id, context.page.as_ref())
        {
            log_warn!("forced submission trigger failed: {err:#}");
        }
        return true;
    }

    false
}
