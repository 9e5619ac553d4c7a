//! AWS `application/vnd.amazon.eventstream` framing.
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32][headers][payload][message_crc u32]
//! ```

const PRELUDE_LEN: usize = 12;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;

const SKIPPED_EVENTS: &[&str] = &["meteringEvent", "contextUsageEvent"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub event_type: Option<String>,
    pub message_type: Option<String>,
    pub payload: &'a [u8],
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Parses one frame at the start of `data`, returning it and its length.
fn parse_frame(data: &[u8]) -> Option<(Frame<'_>, usize)> {
    let total = read_u32(data, 0)? as usize;
    let headers_len = read_u32(data, 4)? as usize;
    let prelude_crc = read_u32(data, 8)?;
    if total < MIN_FRAME_LEN || total > data.len() || PRELUDE_LEN + headers_len + 4 > total {
        return None;
    }
    if crc32fast::hash(&data[..8]) != prelude_crc {
        return None;
    }
    let headers = &data[PRELUDE_LEN..PRELUDE_LEN + headers_len];
    let payload = &data[PRELUDE_LEN + headers_len..total - 4];

    let mut frame = Frame {
        event_type: None,
        message_type: None,
        payload,
    };
    let mut at = 0;
    while at < headers.len() {
        let name_len = *headers.get(at)? as usize;
        let name = std::str::from_utf8(headers.get(at + 1..at + 1 + name_len)?).ok()?;
        at += 1 + name_len;
        let kind = *headers.get(at)?;
        at += 1;
        let value_len = match kind {
            0 | 1 => 0,
            2 => 1,
            3 => 2,
            4 => 4,
            5 | 8 => 8,
            6 | 7 => {
                let len = read_u16(headers, at)? as usize;
                at += 2;
                len
            }
            9 => 16,
            _ => return None,
        };
        let value = headers.get(at..at + value_len)?;
        at += value_len;
        if kind == 7 {
            let text = String::from_utf8_lossy(value).into_owned();
            match name {
                ":event-type" => frame.event_type = Some(text),
                ":message-type" => frame.message_type = Some(text),
                _ => {}
            }
        }
    }
    Some((frame, total))
}

/// True when `data` starts with a frame whose prelude checksum holds.
pub fn is_event_stream(data: &[u8]) -> bool {
    parse_frame(data).is_some()
}

/// All frames in `data`. Stops at the first frame that does not parse.
pub fn frames(data: &[u8]) -> Vec<Frame<'_>> {
    let mut out = Vec::new();
    let mut rest = data;
    while rest.len() >= MIN_FRAME_LEN {
        let Some((frame, len)) = parse_frame(rest) else {
            break;
        };
        out.push(frame);
        rest = &rest[len..];
    }
    out
}

/// Payloads of content-bearing frames, one per line.
pub fn payload_lines(data: &[u8]) -> String {
    frames(data)
        .into_iter()
        .filter(|frame| {
            frame
                .event_type
                .as_deref()
                .is_none_or(|kind| !SKIPPED_EVENTS.contains(&kind))
        })
        .map(|frame| String::from_utf8_lossy(frame.payload).into_owned())
        .filter(|payload| !payload.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) fn encode_frame(event_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut headers = Vec::new();
    for (name, value) in [(":event-type", event_type), (":message-type", "event")] {
        headers.push(name.len() as u8);
        headers.extend_from_slice(name.as_bytes());
        headers.push(7);
        headers.extend_from_slice(&(value.len() as u16).to_be_bytes());
        headers.extend_from_slice(value.as_bytes());
    }
    let total = (PRELUDE_LEN + headers.len() + payload.len() + 4) as u32;
    let mut frame = Vec::with_capacity(total as usize);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(&(headers.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&prelude_crc.to_be_bytes());
    frame.extend_from_slice(&headers);
    frame.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&message_crc.to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_split_and_metering_skipped() {
        let mut data = encode_frame("assistantResponseEvent", br#"{"content":"Hel"}"#);
        data.extend(encode_frame("meteringEvent", br#"{"unit":"credit","usage":0.1}"#));
        data.extend(encode_frame("assistantResponseEvent", br#"{"content":"lo"}"#));

        assert!(is_event_stream(&data));
        let frames = frames(&data);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].event_type.as_deref(), Some("meteringEvent"));
        assert_eq!(frames[0].message_type.as_deref(), Some("event"));
        assert_eq!(
            payload_lines(&data),
            "{\"content\":\"Hel\"}\n{\"content\":\"lo\"}"
        );
    }

    #[test]
    fn text_and_corrupt_preludes_are_not_frames() {
        assert!(!is_event_stream(br#"{"content":"hello world, long enough"}"#));
        let mut data = encode_frame("assistantResponseEvent", b"{}");
        data[9] ^= 0xff;
        assert!(!is_event_stream(&data));
    }
}
