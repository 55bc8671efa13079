//! # Encoding Module
//!
//! This module converts between text and the raw bytes travelling over the
//! serial line. Outbound text is UTF-8 encoded; inbound bytes are decoded
//! incrementally so that a multi-byte character split across two reads is
//! still decoded as one character.

/// Encodes text for the wire.
///
/// # Examples
///
/// ```
/// use serial_session::serial::encoding::encode_text;
///
/// assert_eq!(encode_text("OPEN\r\n"), b"OPEN\r\n".to_vec());
/// ```
#[must_use]
pub fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Incremental UTF-8 decoder.
///
/// Invalid sequences are replaced with U+FFFD. An incomplete sequence at the
/// end of a chunk is held back until the next chunk completes it.
///
/// # Examples
///
/// ```
/// use serial_session::serial::encoding::Utf8StreamDecoder;
///
/// let mut decoder = Utf8StreamDecoder::new();
/// let bytes = "Válvula".as_bytes();
/// let mut text = decoder.decode(&bytes[..2]);
/// text.push_str(&decoder.decode(&bytes[2..]));
/// assert_eq!(text, "Válvula");
/// ```
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a chunk, returning all text that is complete so far.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let valid_end = consumed + err.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[consumed..valid_end]) {
                        text.push_str(valid);
                    }
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + len;
                        }
                        None => {
                            // incomplete tail, wait for more bytes
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        text
    }

    /// Flushes a dangling incomplete sequence at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
