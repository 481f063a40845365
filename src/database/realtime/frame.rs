/// One decoded event-stream frame: the declared event name and its joined data lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RawFrame {
    pub(crate) event: Option<String>,
    pub(crate) data: Option<String>,
}

/// Incremental decoder for `event:` / `data:` line framing.
///
/// A blank line completes the pending frame. Comment lines (starting with `:`) and
/// unknown fields are ignored.
#[derive(Debug, Default)]
pub(crate) struct FrameDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    /// Feeds one line (without its terminator); returns a frame when the line completes one.
    pub(crate) fn push_line(&mut self, line: &str) -> Option<RawFrame> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.take_frame();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }

    /// Flushes a frame left pending when the connection ends without a blank line.
    pub(crate) fn finish(&mut self) -> Option<RawFrame> {
        self.take_frame()
    }

    fn take_frame(&mut self) -> Option<RawFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        };
        Some(RawFrame {
            event: self.event.take(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(input: &str) -> Vec<RawFrame> {
        let mut decoder = FrameDecoder::default();
        let mut frames: Vec<RawFrame> = input
            .split('\n')
            .filter_map(|line| decoder.push_line(line))
            .collect();
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn decodes_put_frame() {
        let frames = decode("event: put\ndata: {\"path\":\"/\",\"data\":1}\n\n");
        assert_eq!(
            frames,
            vec![RawFrame {
                event: Some("put".into()),
                data: Some("{\"path\":\"/\",\"data\":1}".into()),
            }]
        );
    }

    #[test]
    fn keep_alive_has_null_data() {
        let frames = decode("event: keep-alive\ndata: null\n\nevent: put\r\ndata: x\r\n\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("keep-alive"));
        assert_eq!(frames[0].data.as_deref(), Some("null"));
        assert_eq!(frames[1].event.as_deref(), Some("put"));
        assert_eq!(frames[1].data.as_deref(), Some("x"));
    }

    #[test]
    fn multi_line_data_is_joined_and_comments_skipped() {
        let frames = decode(": ping\nevent: patch\ndata: {\"a\":\ndata: 1}\nid: 7\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.as_deref(), Some("{\"a\":\n1}"));
    }

    #[test]
    fn frame_without_data_still_completes() {
        let frames = decode("event: auth_revoked\n\n\n\n");
        assert_eq!(
            frames,
            vec![RawFrame {
                event: Some("auth_revoked".into()),
                data: None,
            }]
        );
    }

    #[test]
    fn trailing_frame_is_flushed() {
        let frames = decode("event: cancel\ndata: null");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("cancel"));
    }
}
