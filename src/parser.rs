//! The packet framing state machine (C1, decode side).
//!
//! Fed one already-line-split, `CRLF`-stripped line at a time by the
//! session's read loop (see [`crate::transport`] for the line source). This
//! is where the irregular `Response: Follows … --END COMMAND--` sub-grammar
//! lives.

use crate::error::AmiError;
use crate::packet::{Packet, MULTI_VALUE_HEADERS};

#[derive(Debug)]
enum State {
    /// Between packets, no header lines consumed yet.
    Idle,
    /// Accumulating ordinary header lines.
    Headers(Packet),
    /// Inside a `Follows` body. `expecting_leading_action_id` is true only
    /// for the very first body line, which may be an `ActionID:` header.
    FollowsBody {
        packet: Packet,
        lines: Vec<String>,
        expecting_leading_action_id: bool,
    },
    /// The `--END COMMAND--` terminator was seen; one more line (the blank
    /// separator) must be consumed before the packet is complete.
    FollowsSeparator(Packet),
}

/// Incremental parser: feed it lines, get back complete packets.
pub struct PacketParser {
    state: State,
}

impl Default for PacketParser {
    fn default() -> Self {
        PacketParser { state: State::Idle }
    }
}

impl PacketParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (already stripped of its trailing `CRLF`/`LF`). Returns
    /// `Ok(Some(packet))` once a full packet boundary is reached.
    pub fn feed_line(&mut self, line: String) -> Result<Option<Packet>, AmiError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {
                if line.is_empty() {
                    // Stray blank line between packets; ignore.
                    Ok(None)
                } else {
                    let (name, value) = parse_header_line(&line)?;
                    let mut packet = Packet::new();
                    if name == "Response" && value == "Follows" {
                        packet.set(name, value);
                        self.state = State::FollowsBody {
                            packet,
                            lines: Vec::new(),
                            expecting_leading_action_id: true,
                        };
                    } else {
                        insert_header(&mut packet, name, value);
                        self.state = State::Headers(packet);
                    }
                    Ok(None)
                }
            }
            State::Headers(mut packet) => {
                if line.is_empty() {
                    Ok(Some(packet))
                } else {
                    let (name, value) = parse_header_line(&line)?;
                    if name == "Response" && value == "Follows" {
                        packet.set(name, value);
                        self.state = State::FollowsBody {
                            packet,
                            lines: Vec::new(),
                            expecting_leading_action_id: true,
                        };
                    } else {
                        insert_header(&mut packet, name, value);
                        self.state = State::Headers(packet);
                    }
                    Ok(None)
                }
            }
            State::FollowsBody {
                mut packet,
                mut lines,
                expecting_leading_action_id,
            } => {
                if line == "--END COMMAND--" {
                    packet.set_lines(lines);
                    self.state = State::FollowsSeparator(packet);
                    Ok(None)
                } else if expecting_leading_action_id {
                    match parse_header_line(&line) {
                        Ok((name, value)) if name == "ActionID" => {
                            packet.set_action_id(value);
                        }
                        _ => {
                            lines.push(line);
                        }
                    }
                    self.state = State::FollowsBody {
                        packet,
                        lines,
                        expecting_leading_action_id: false,
                    };
                    Ok(None)
                } else {
                    lines.push(line);
                    self.state = State::FollowsBody {
                        packet,
                        lines,
                        expecting_leading_action_id: false,
                    };
                    Ok(None)
                }
            }
            State::FollowsSeparator(packet) => {
                // Exactly one separator line is consumed, its content is not
                // inspected.
                let _ = line;
                Ok(Some(packet))
            }
        }
    }
}

/// Split one header line into `(name, value)` per the AMI grammar:
/// `Name:` (no space) means an empty value; otherwise split on the first
/// `": "` and take the remainder verbatim.
fn parse_header_line(line: &str) -> Result<(String, String), AmiError> {
    if line.ends_with(':') && line.matches(':').count() == 1 {
        return Ok((line[..line.len() - 1].to_owned(), String::new()));
    }
    if let Some(pos) = line.find(": ") {
        let name = line[..pos].to_owned();
        let value = line[pos + 2..].to_owned();
        return Ok((name, value));
    }
    Err(AmiError::Malformed(line.to_owned()))
}

fn insert_header(packet: &mut Packet, name: String, value: String) {
    if MULTI_VALUE_HEADERS.contains(&name.as_str()) {
        if let Some(eq) = value.find('=') {
            let subkey = value[..eq].to_owned();
            let subvalue = value[eq + 1..].to_owned();
            packet.push_multi(name, subkey, subvalue);
            return;
        }
    }
    packet.set(name, value);
}
