//! Channel reference: a value object carrying a channel identifier and a
//! back-reference to its session, used only to expose per-channel
//! convenience operations. This is a typing distinction, not an ownership
//! one — the session remains the sole owner of the socket and state.

use crate::action;
use crate::error::Result;
use crate::session::Session;

/// A reference to an Asterisk channel (e.g. `SIP/100-1`), scoped to the
/// session that observed it.
#[derive(Clone)]
pub struct Channel {
    session: Session,
    id: String,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Channel {}

impl Channel {
    pub fn new(session: Session, id: impl Into<String>) -> Self {
        Channel {
            session,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A channel identifier beginning (case-insensitively) with `"zap"`
    /// carries the additional Zapata operation set.
    pub fn is_zap(&self) -> bool {
        self.id.len() >= 3 && self.id[..3].eq_ignore_ascii_case("zap")
    }

    /// Narrow to a [`ZapChannel`] if this channel's id carries the `zap`
    /// prefix; otherwise returns `self` unchanged as the error value.
    pub fn into_zap(self) -> std::result::Result<ZapChannel, Channel> {
        if self.is_zap() {
            Ok(ZapChannel(self))
        } else {
            Err(self)
        }
    }

    pub async fn hangup(&self, cause: Option<i32>) -> Result<()> {
        action::hangup(&self.session, &self.id, cause).await
    }

    pub async fn redirect(
        &self,
        context: &str,
        extension: &str,
        priority: u32,
        extra_channel: Option<&str>,
    ) -> Result<()> {
        action::redirect(&self.session, &self.id, context, extension, priority, extra_channel).await
    }

    pub async fn setvar(&self, variable: &str, value: &str) -> Result<()> {
        action::setvar(&self.session, Some(&self.id), variable, value).await
    }

    pub async fn getvar(&self, variable: &str, default: Option<&str>) -> Result<String> {
        action::getvar(&self.session, Some(&self.id), variable, default).await
    }

    pub async fn monitor_start(&self, file: &str, format: &str, mix: bool) -> Result<()> {
        action::monitor_start(&self.session, &self.id, file, format, mix).await
    }

    pub async fn monitor_stop(&self) -> Result<()> {
        action::monitor_stop(&self.session, &self.id).await
    }

    pub async fn pause_monitor(&self) -> Result<()> {
        action::pause_monitor(&self.session, &self.id).await
    }

    pub async fn unpause_monitor(&self) -> Result<()> {
        action::unpause_monitor(&self.session, &self.id).await
    }

    pub async fn send_text(&self, message: &str) -> Result<()> {
        action::send_text(&self.session, &self.id, message).await
    }

    pub async fn absolute_timeout(&self, timeout: u32) -> Result<()> {
        action::absolute_timeout(&self.session, &self.id, timeout).await
    }
}

/// A [`Channel`] known to be backed by the legacy Zapata driver, exposing
/// its additional operation set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZapChannel(Channel);

impl ZapChannel {
    pub fn channel(&self) -> &Channel {
        &self.0
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub async fn dial_offhook(&self, number: &str) -> Result<()> {
        action::zap_dial_offhook(&self.0.session, &self.0.id, number).await
    }

    pub async fn hangup(&self) -> Result<()> {
        action::zap_hangup(&self.0.session, &self.0.id).await
    }

    pub async fn transfer(&self, extension: &str) -> Result<()> {
        action::zap_transfer(&self.0.session, &self.0.id, extension).await
    }

    pub async fn dnd_on(&self) -> Result<()> {
        action::zap_dnd_on(&self.0.session, &self.0.id).await
    }

    pub async fn dnd_off(&self) -> Result<()> {
        action::zap_dnd_off(&self.0.session, &self.0.id).await
    }
}

#[cfg(test)]
mod tests {
    // Channel construction requires a live Session, so channel-prefix
    // classification is exercised directly via the id string here; the
    // dispatch methods are covered by the session integration tests.
    #[test]
    fn zap_prefix_is_case_insensitive() {
        assert!(starts_with_zap("ZAP/1-1"));
        assert!(starts_with_zap("zap/1-1"));
        assert!(starts_with_zap("Zap/1-1"));
        assert!(!starts_with_zap("SIP/100-1"));
    }

    fn starts_with_zap(id: &str) -> bool {
        id.len() >= 3 && id[..3].eq_ignore_ascii_case("zap")
    }
}
