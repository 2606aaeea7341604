//! The AMI packet type: an ordered header mapping with the `ChanVariable`-style
//! nested multi-value rule and the `Lines` extension used by `Response: Follows`.

use std::fmt;

/// Header names whose repeated `key=value` occurrences collapse into a
/// nested mapping rather than overwriting each other.
pub const MULTI_VALUE_HEADERS: &[&str] = &["ChanVariable", "DestChanVariable"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum HeaderValue {
    Single(String),
    Multi(Vec<(String, String)>),
}

/// An ordered mapping from header name to value, as sent or received on the
/// wire. A single packet carries at most one of `Response` or `Event`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    headers: Vec<(String, HeaderValue)>,
    lines: Option<Vec<String>>,
}

impl Packet {
    pub fn new() -> Self {
        Packet {
            headers: Vec::new(),
            lines: None,
        }
    }

    /// Start building an outbound action packet.
    pub fn action(name: impl Into<String>) -> Self {
        let mut p = Packet::new();
        p.set("Action", name);
        p
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|(n, _)| n == name)
    }

    /// Last-write-wins set of a plain header. Preserves the header's first
    /// insertion position on update.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        if let Some(idx) = self.position(&name) {
            self.headers[idx].1 = HeaderValue::Single(value);
        } else {
            self.headers.push((name, HeaderValue::Single(value)));
        }
        self
    }

    /// Set a header only if `value` is `Some`; omits it entirely otherwise.
    /// Mirrors the outbound encoding rule: "unspecified" arguments are
    /// omitted, not sent as an empty string.
    pub fn set_opt(&mut self, name: impl Into<String>, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(v) = value {
            self.set(name, v);
        }
        self
    }

    /// Record one `key=value` occurrence of a multi-value header (e.g.
    /// `ChanVariable`). Last-write-wins per subkey.
    pub fn push_multi(&mut self, name: impl Into<String>, subkey: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let subkey = subkey.into();
        let value = value.into();
        if let Some(idx) = self.position(&name) {
            if let HeaderValue::Multi(entries) = &mut self.headers[idx].1 {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == subkey) {
                    slot.1 = value;
                } else {
                    entries.push((subkey, value));
                }
                return self;
            }
        }
        self.headers.push((name, HeaderValue::Multi(vec![(subkey, value)])));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match self.position(name).map(|i| &self.headers[i].1) {
            Some(HeaderValue::Single(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_multi(&self, name: &str) -> Option<&[(String, String)]> {
        match self.position(name).map(|i| &self.headers[i].1) {
            Some(HeaderValue::Multi(entries)) => Some(entries.as_slice()),
            _ => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.position(name)?;
        match self.headers.remove(idx).1 {
            HeaderValue::Single(v) => Some(v),
            HeaderValue::Multi(_) => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn action_name(&self) -> Option<&str> {
        self.get("Action")
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    pub fn set_action_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.set("ActionID", id)
    }

    pub fn response(&self) -> Option<&str> {
        self.get("Response")
    }

    pub fn event(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("Message")
    }

    pub fn lines(&self) -> Option<&[String]> {
        self.lines.as_deref()
    }

    pub fn set_lines(&mut self, lines: Vec<String>) -> &mut Self {
        self.lines = Some(lines);
        self
    }

    /// Iterate plain (non-multi) headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().filter_map(|(k, v)| match v {
            HeaderValue::Single(s) => Some((k.as_str(), s.as_str())),
            HeaderValue::Multi(_) => None,
        })
    }

    /// Response is successful iff `Response` is `Success`, `Follows`, or `Pong`.
    pub fn is_success(&self) -> bool {
        matches!(self.response(), Some("Success") | Some("Follows") | Some("Pong"))
    }

    /// Encode this packet as a sequence of wire lines, each without its
    /// trailing `CRLF` (the transport appends that). `Action` is emitted
    /// first, `ActionID` second, everything else in insertion order.
    pub fn encode_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.headers.len() + 1);
        let mut emitted = vec![false; self.headers.len()];

        if let Some(idx) = self.position("Action") {
            if let HeaderValue::Single(v) = &self.headers[idx].1 {
                lines.push(format!("Action: {}", v));
                emitted[idx] = true;
            }
        }
        if let Some(idx) = self.position("ActionID") {
            if let HeaderValue::Single(v) = &self.headers[idx].1 {
                lines.push(format!("ActionID: {}", v));
                emitted[idx] = true;
            }
        }
        for (i, (name, value)) in self.headers.iter().enumerate() {
            if emitted[i] {
                continue;
            }
            match value {
                HeaderValue::Single(v) => lines.push(format!("{}: {}", name, v)),
                HeaderValue::Multi(entries) => {
                    for (subkey, subvalue) in entries {
                        lines.push(format!("{}: {}={}", name, subkey, subvalue));
                    }
                }
            }
        }
        lines
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.encode_lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_for_plain_headers() {
        let mut p = Packet::new();
        p.set("Channel", "SIP/100-1");
        p.set("Channel", "SIP/101-1");
        assert_eq!(p.get("Channel"), Some("SIP/101-1"));
        assert_eq!(p.encode_lines().iter().filter(|l| l.starts_with("Channel")).count(), 1);
    }

    #[test]
    fn multi_value_header_collapses_to_map() {
        let mut p = Packet::new();
        p.push_multi("ChanVariable", "FOO", "bar");
        p.push_multi("ChanVariable", "BAZ", "qux");
        p.push_multi("ChanVariable", "FOO", "overwritten");
        let entries = p.get_multi("ChanVariable").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("FOO".to_owned(), "overwritten".to_owned()));
        assert_eq!(entries[1], ("BAZ".to_owned(), "qux".to_owned()));
    }

    #[test]
    fn encode_orders_action_then_action_id_then_rest() {
        let mut p = Packet::action("Status");
        p.set("Channel", "SIP/100-1");
        p.set_action_id("T1");
        let lines = p.encode_lines();
        assert_eq!(lines[0], "Action: Status");
        assert_eq!(lines[1], "ActionID: T1");
        assert_eq!(lines[2], "Channel: SIP/100-1");
    }

    #[test]
    fn set_opt_omits_none() {
        let mut p = Packet::action("Originate");
        p.set_opt("Priority", None::<String>);
        assert!(!p.contains("Priority"));
        p.set_opt("Priority", Some("1"));
        assert_eq!(p.get("Priority"), Some("1"));
    }

    #[test]
    fn is_success_recognizes_three_response_values() {
        for r in ["Success", "Follows", "Pong"] {
            let mut p = Packet::new();
            p.set("Response", r);
            assert!(p.is_success(), "{} should be success", r);
        }
        let mut p = Packet::new();
        p.set("Response", "Error");
        assert!(!p.is_success());
    }
}
