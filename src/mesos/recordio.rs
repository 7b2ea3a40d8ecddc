//! RecordIO framing used by the agent's streaming calls.
//!
//! Each record is `<decimal length>\n<payload>`. The decoder is incremental:
//! chunks may split a header or a payload anywhere.

use anyhow::{Context, Result, bail};

/// Longest length header we are willing to buffer before giving up.
const MAX_HEADER_LEN: usize = 20;
/// Largest record payload accepted from the agent.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Frame a single payload.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let header = format!("{}\n", payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Serialize a JSON message and frame it.
pub fn encode_json(message: &serde_json::Value) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message).context("failed to serialize record")?;
    Ok(encode(&payload))
}

#[derive(Debug, Default)]
pub struct Decoder {
    buffer: Vec<u8>,
    pending_len: Option<usize>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every record completed by it (possibly none).
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();

        loop {
            match self.pending_len {
                None => {
                    let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
                        if self.buffer.len() > MAX_HEADER_LEN {
                            bail!(
                                "record length header exceeds {MAX_HEADER_LEN} bytes without a newline"
                            );
                        }
                        break;
                    };
                    let header = std::str::from_utf8(&self.buffer[..newline])
                        .context("record length header is not UTF-8")?;
                    let len = header
                        .trim()
                        .parse::<usize>()
                        .with_context(|| format!("invalid record length header: '{header}'"))?;
                    if len > MAX_RECORD_LEN {
                        bail!("record length {len} exceeds the {MAX_RECORD_LEN} byte limit");
                    }
                    self.buffer.drain(..=newline);
                    self.pending_len = Some(len);
                }
                Some(len) => {
                    if self.buffer.len() < len {
                        break;
                    }
                    records.push(self.buffer.drain(..len).collect());
                    self.pending_len = None;
                }
            }
        }

        Ok(records)
    }

    /// True when no partial record is buffered.
    pub fn is_idle(&self) -> bool {
        self.pending_len.is_none() && self.buffer.is_empty()
    }
}
