//! Action dispatcher (C4): builds a typed argument set into a packet,
//! submits it through the session, and shapes the validated response.
//!
//! Every function here does the same three things — build, submit, shape —
//! and stays a thin wrapper on purpose: the interesting engineering is in
//! [`crate::session`] and [`crate::list_actions`].

use crate::error::{AmiError, Result};
use crate::packet::Packet;
use crate::session::Session;

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

/// Submit an arbitrary action by name with raw key/value headers. Backs the
/// CLI's generic `action <Name> --key=value…` subcommand; typed call sites
/// below should prefer the named wrapper.
pub async fn invoke_raw(session: &Session, action: &str, args: &[(String, String)]) -> Result<Packet> {
    let mut p = Packet::action(action);
    for (k, v) in args {
        p.set(k.clone(), v.clone());
    }
    session.dispatch_action(p).await
}

pub async fn ping(session: &Session) -> Result<()> {
    session.dispatch_action(Packet::action("Ping")).await?;
    Ok(())
}

/// Shortcut for the `Command` action; returns the console output lines.
pub async fn command(session: &Session, command_line: &str) -> Result<Vec<String>> {
    let mut p = Packet::action("Command");
    p.set("Command", command_line);
    let response = session.dispatch_action(p).await?;
    Ok(response.lines().map(|lines| lines.to_vec()).unwrap_or_default())
}

/// The two mutually exclusive ways to tell Asterisk where a new channel
/// should go, enforced at the type level rather than by a runtime check.
pub enum OriginateTarget<'a> {
    Dialplan {
        context: &'a str,
        extension: &'a str,
        priority: u32,
    },
    Application {
        application: &'a str,
        data: Option<&'a str>,
    },
}

pub struct OriginateOptions<'a> {
    pub channel: &'a str,
    pub target: OriginateTarget<'a>,
    pub timeout: Option<u32>,
    pub caller_id: Option<&'a str>,
    pub account: Option<&'a str>,
    pub async_: bool,
    pub variables: &'a [(&'a str, &'a str)],
}

pub async fn originate(session: &Session, opts: OriginateOptions<'_>) -> Result<()> {
    let mut p = Packet::action("Originate");
    p.set("Channel", opts.channel);
    match opts.target {
        OriginateTarget::Dialplan {
            context,
            extension,
            priority,
        } => {
            p.set("Context", context);
            p.set("Exten", extension);
            p.set("Priority", priority.to_string());
        }
        OriginateTarget::Application { application, data } => {
            p.set("Application", application);
            p.set_opt("Data", data);
        }
    }
    p.set_opt("Timeout", opts.timeout.map(|t| t.to_string()));
    p.set_opt("CallerID", opts.caller_id);
    p.set_opt("Account", opts.account);
    if opts.async_ {
        p.set("Async", "yes");
    }
    for (key, value) in opts.variables {
        p.push_multi("Variable", *key, *value);
    }
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn hangup(session: &Session, channel: &str, cause: Option<i32>) -> Result<()> {
    let mut p = Packet::action("Hangup");
    p.set("Channel", channel);
    p.set_opt("Cause", cause.map(|c| c.to_string()));
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn redirect(
    session: &Session,
    channel: &str,
    context: &str,
    extension: &str,
    priority: u32,
    extra_channel: Option<&str>,
) -> Result<()> {
    let mut p = Packet::action("Redirect");
    p.set("Channel", channel);
    p.set("Context", context);
    p.set("Exten", extension);
    p.set("Priority", priority.to_string());
    p.set_opt("ExtraChannel", extra_channel);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn setvar(session: &Session, channel: Option<&str>, variable: &str, value: &str) -> Result<()> {
    let mut p = Packet::action("Setvar");
    p.set_opt("Channel", channel);
    p.set("Variable", variable);
    p.set("Value", value);
    session.dispatch_action(p).await?;
    Ok(())
}

/// Returns the variable's value, or `default` if the PBX answers the
/// literal sentinel `"(null)"`, or fails with `KeyNotFound` if no default
/// was supplied.
pub async fn getvar(session: &Session, channel: Option<&str>, variable: &str, default: Option<&str>) -> Result<String> {
    let mut p = Packet::action("Getvar");
    p.set_opt("Channel", channel);
    p.set("Variable", variable);
    let response = session.dispatch_action(p).await?;
    let value = response.get("Value").unwrap_or_default();
    if value == "(null)" {
        default
            .map(str::to_owned)
            .ok_or_else(|| AmiError::KeyNotFound(variable.to_owned()))
    } else {
        Ok(value.to_owned())
    }
}

pub async fn monitor_start(session: &Session, channel: &str, file: &str, format: &str, mix: bool) -> Result<()> {
    let mut p = Packet::action("Monitor");
    p.set("Channel", channel);
    p.set("File", file);
    p.set("Format", format);
    p.set("Mix", yes_no(mix));
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn monitor_stop(session: &Session, channel: &str) -> Result<()> {
    let mut p = Packet::action("StopMonitor");
    p.set("Channel", channel);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn change_monitor(session: &Session, channel: &str, file: &str) -> Result<()> {
    let mut p = Packet::action("ChangeMonitor");
    p.set("Channel", channel);
    p.set("File", file);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn pause_monitor(session: &Session, channel: &str) -> Result<()> {
    let mut p = Packet::action("PauseMonitor");
    p.set("Channel", channel);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn unpause_monitor(session: &Session, channel: &str) -> Result<()> {
    let mut p = Packet::action("UnpauseMonitor");
    p.set("Channel", channel);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn send_text(session: &Session, channel: &str, message: &str) -> Result<()> {
    let mut p = Packet::action("SendText");
    p.set("Channel", channel);
    p.set("Message", message);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn absolute_timeout(session: &Session, channel: &str, timeout: u32) -> Result<()> {
    let mut p = Packet::action("AbsoluteTimeout");
    p.set("Channel", channel);
    p.set("Timeout", timeout.to_string());
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn mailbox_status(session: &Session, mailbox: &str) -> Result<bool> {
    let mut p = Packet::action("MailboxStatus");
    p.set("Mailbox", mailbox);
    let response = session.dispatch_action(p).await?;
    Ok(response.get("Waiting") == Some("1"))
}

/// Returns `(new_messages, old_messages)`.
pub async fn mailbox_count(session: &Session, mailbox: &str) -> Result<(u32, u32)> {
    let mut p = Packet::action("MailboxCount");
    p.set("Mailbox", mailbox);
    let response = session.dispatch_action(p).await?;
    let new = response.get("NewMessages").and_then(|s| s.parse().ok()).unwrap_or(0);
    let old = response.get("OldMessages").and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok((new, old))
}

pub async fn extension_state(session: &Session, extension: &str, context: &str) -> Result<String> {
    let mut p = Packet::action("ExtensionState");
    p.set("Exten", extension);
    p.set("Context", context);
    let response = session.dispatch_action(p).await?;
    Ok(response.get("Status").unwrap_or_default().to_owned())
}

pub async fn db_get(session: &Session, family: &str, key: &str) -> Result<String> {
    let mut p = Packet::action("DBGet");
    p.set("Family", family);
    p.set("Key", key);
    let response = session.dispatch_action(p).await?;
    Ok(response.get("Val").unwrap_or_default().to_owned())
}

pub async fn db_put(session: &Session, family: &str, key: &str, value: &str) -> Result<()> {
    let mut p = Packet::action("DBPut");
    p.set("Family", family);
    p.set("Key", key);
    p.set("Val", value);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn db_del(session: &Session, family: &str, key: &str) -> Result<()> {
    let mut p = Packet::action("DBDel");
    p.set("Family", family);
    p.set("Key", key);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn db_del_tree(session: &Session, family: &str, key: Option<&str>) -> Result<()> {
    let mut p = Packet::action("DBDelTree");
    p.set("Family", family);
    p.set_opt("Key", key);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn user_event(session: &Session, event_name: &str, headers: &[(&str, &str)]) -> Result<()> {
    let mut p = Packet::action("UserEvent");
    p.set("UserEvent", event_name);
    for (name, value) in headers {
        p.set(*name, *value);
    }
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn bridge(session: &Session, channel1: &str, channel2: &str, tone: bool) -> Result<()> {
    let mut p = Packet::action("Bridge");
    p.set("Channel1", channel1);
    p.set("Channel2", channel2);
    p.set("Tone", yes_no(tone));
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn module_load(session: &Session, module: &str, load_type: &str) -> Result<()> {
    let mut p = Packet::action("ModuleLoad");
    p.set("Module", module);
    p.set("LoadType", load_type);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn reload(session: &Session, module: Option<&str>) -> Result<()> {
    let mut p = Packet::action("Reload");
    p.set_opt("Module", module);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn core_settings(session: &Session) -> Result<Packet> {
    session.dispatch_action(Packet::action("CoreSettings")).await
}

pub async fn core_status(session: &Session) -> Result<Packet> {
    session.dispatch_action(Packet::action("CoreStatus")).await
}

pub async fn zap_dial_offhook(session: &Session, channel: &str, number: &str) -> Result<()> {
    let mut p = Packet::action("ZapDialOffhook");
    p.set("ZapChannel", channel);
    p.set("Number", number);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn zap_hangup(session: &Session, channel: &str) -> Result<()> {
    let mut p = Packet::action("ZapHangup");
    p.set("ZapChannel", channel);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn zap_transfer(session: &Session, channel: &str, extension: &str) -> Result<()> {
    let mut p = Packet::action("ZapTransfer");
    p.set("ZapChannel", channel);
    p.set("Exten", extension);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn zap_dnd_on(session: &Session, channel: &str) -> Result<()> {
    let mut p = Packet::action("ZapDNDon");
    p.set("ZapChannel", channel);
    session.dispatch_action(p).await?;
    Ok(())
}

pub async fn zap_dnd_off(session: &Session, channel: &str) -> Result<()> {
    let mut p = Packet::action("ZapDNDoff");
    p.set("ZapChannel", channel);
    session.dispatch_action(p).await?;
    Ok(())
}
