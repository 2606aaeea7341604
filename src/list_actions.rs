//! List-action aggregators (C5): actions whose result is a stream of
//! same-kind events terminated by a distinguished completion event.
//!
//! Each aggregator sends its action, awaits the acknowledging response,
//! installs temporary capture handlers on the subscription registry for the
//! body and terminator event names (saving whatever was registered before),
//! pumps the read loop until the terminator fires, and restores the saved
//! handlers on every exit path via [`CaptureScope`]'s `Drop`.

use crate::error::Result;
use crate::events::{CaptureScope, EventMessage, Handler};
use crate::packet::Packet;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// The header fields of one aggregated event, with the `Event`, `ActionID`,
/// and key-extracting headers already stripped.
pub type Fields = HashMap<String, String>;

fn strip_common(msg: &EventMessage) -> Fields {
    let mut fields: Fields = msg.packet.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
    fields.remove("Event");
    fields.remove("ActionID");
    fields
}

async fn run_flat_list_action(
    session: &Session,
    action_name: &str,
    body_event: &str,
    terminator_event: &str,
    key_header: &str,
) -> Result<HashMap<String, Fields>> {
    let aggregate: Arc<Mutex<HashMap<String, Fields>>> = Arc::new(Mutex::new(HashMap::new()));

    let agg = aggregate.clone();
    let key_header = key_header.to_owned();
    let body_handler: Handler = Arc::new(move |msg: &EventMessage| {
        let mut fields = strip_common(msg);
        if let Some(key) = fields.remove(&key_header) {
            agg.lock().unwrap().insert(key, fields);
        }
        Ok(())
    });

    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = Mutex::new(Some(done_tx));
    let terminator_handler: Handler = Arc::new(move |_msg: &EventMessage| {
        if let Some(tx) = done_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    });

    let body_event = format!("on_{body_event}");
    let terminator_event = format!("on_{terminator_event}");

    let registry = session.registry();
    let _scope = CaptureScope::install(registry, vec![(&body_event, body_handler), (&terminator_event, terminator_handler)]);

    session.dispatch_action(Packet::action(action_name)).await?;
    session.drain_until_signal(done_rx, session.default_timeout()).await?;
    drop(_scope);

    Ok(Arc::try_unwrap(aggregate)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|arc| arc.lock().unwrap().clone()))
}

/// `Status`: channel → remaining fields.
pub async fn status(session: &Session) -> Result<HashMap<String, Fields>> {
    run_flat_list_action(session, "Status", "Status", "StatusComplete", "Channel").await
}

/// `ParkedCalls`: parked extension → remaining fields.
pub async fn parked_calls(session: &Session) -> Result<HashMap<String, Fields>> {
    run_flat_list_action(session, "ParkedCalls", "ParkedCall", "ParkedCallsComplete", "Exten").await
}

/// `ZapShowChannels`: channel number (keyed by `Location`) → remaining fields.
pub async fn zap_show_channels(session: &Session) -> Result<HashMap<String, Fields>> {
    run_flat_list_action(session, "ZapShowChannels", "ZapShowChannels", "ZapShowChannelsComplete", "Location").await
}

/// One queue's aggregated `QueueStatus` result.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub fields: Fields,
    pub members: HashMap<String, Fields>,
    pub entries: HashMap<String, Fields>,
}

/// `QueueStatus`: queue name → `{fields, members: interface → fields,
/// entries: channel → fields}`.
pub async fn queue_status(session: &Session) -> Result<HashMap<String, QueueSnapshot>> {
    let aggregate: Arc<Mutex<HashMap<String, QueueSnapshot>>> = Arc::new(Mutex::new(HashMap::new()));

    let agg_params = aggregate.clone();
    let params_handler: Handler = Arc::new(move |msg: &EventMessage| {
        let mut fields = strip_common(msg);
        if let Some(queue) = fields.remove("Queue") {
            agg_params.lock().unwrap().entry(queue).or_default().fields = fields;
        }
        Ok(())
    });

    let agg_member = aggregate.clone();
    let member_handler: Handler = Arc::new(move |msg: &EventMessage| {
        let mut fields = strip_common(msg);
        let Some(queue) = fields.remove("Queue") else {
            return Ok(());
        };
        let interface = fields.remove("Interface").unwrap_or_default();
        agg_member.lock().unwrap().entry(queue).or_default().members.insert(interface, fields);
        Ok(())
    });

    let agg_entry = aggregate.clone();
    let entry_handler: Handler = Arc::new(move |msg: &EventMessage| {
        let mut fields = strip_common(msg);
        let Some(queue) = fields.remove("Queue") else {
            return Ok(());
        };
        let channel = fields.remove("Channel").unwrap_or_default();
        agg_entry.lock().unwrap().entry(queue).or_default().entries.insert(channel, fields);
        Ok(())
    });

    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = Mutex::new(Some(done_tx));
    let terminator_handler: Handler = Arc::new(move |_msg: &EventMessage| {
        if let Some(tx) = done_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    });

    let registry = session.registry();
    let _scope = CaptureScope::install(
        registry,
        vec![
            ("on_QueueParams", params_handler),
            ("on_QueueMember", member_handler),
            ("on_QueueEntry", entry_handler),
            ("on_QueueStatusEnd", terminator_handler),
        ],
    );

    session.dispatch_action(Packet::action("QueueStatus")).await?;
    session.drain_until_signal(done_rx, session.default_timeout()).await?;
    drop(_scope);

    Ok(Arc::try_unwrap(aggregate)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|arc| arc.lock().unwrap().clone()))
}
