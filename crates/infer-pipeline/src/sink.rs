//! JSON-lines downstream sink

use std::io::Write;

use frame_meta::{Buffer, FrameMeta};
use infer_scheduler::{Downstream, FlowResult};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;

#[derive(Serialize)]
struct Record<'a> {
    pts_ns: u64,
    frames: &'a [FrameMeta],
}

/// Writes the metadata of every forwarded buffer as one JSON line
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Downstream for JsonLinesSink {
    fn push(&self, buffer: Buffer) -> FlowResult {
        let mut writer = self.writer.lock();
        let written = buffer.with_meta(|meta| {
            let record = Record {
                pts_ns: buffer.pts_ns(),
                frames: &meta.frames,
            };
            serde_json::to_writer(&mut *writer, &record)
        });

        let result = written
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        match result {
            Ok(()) => FlowResult::Ok,
            Err(e) => {
                error!(pts = buffer.pts_ns(), "Failed to write buffer record: {}", e);
                FlowResult::Error
            }
        }
    }
}
