//! UTF-8 decoding for the terminal parser
//!
//! Streaming decoder that survives arbitrary chunk boundaries. Malformed
//! input never fails: it is reported so the caller can substitute U+FFFD.

/// UTF-8 decoder state
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    /// Bytes accumulated for current character
    buffer: [u8; 4],
    /// Number of bytes in buffer
    len: usize,
    /// Expected total bytes for current character
    expected: usize,
}

/// Result of feeding a byte to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utf8Result {
    /// Need more bytes
    Pending,
    /// Successfully decoded a character
    Char(char),
    /// The byte (or the sequence it completed) is invalid
    Invalid,
    /// A partial sequence was cut short by this byte. The partial sequence
    /// is invalid; the byte itself was not consumed and must be fed again.
    Interrupted,
}

impl Utf8Decoder {
    pub const REPLACEMENT: char = '\u{FFFD}';

    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the decoder state
    pub fn reset(&mut self) {
        self.len = 0;
        self.expected = 0;
    }

    /// Check if decoder is in the middle of a sequence
    pub fn is_pending(&self) -> bool {
        self.len > 0
    }

    /// Feed a byte to the decoder
    pub fn feed(&mut self, byte: u8) -> Utf8Result {
        if self.len == 0 {
            return self.start(byte);
        }

        // Anything but a continuation byte ends the partial sequence
        if byte & 0b1100_0000 != 0b1000_0000 {
            self.reset();
            return Utf8Result::Interrupted;
        }

        self.buffer[self.len] = byte;
        self.len += 1;
        if self.len < self.expected {
            return Utf8Result::Pending;
        }

        let result = self.decode();
        self.reset();
        result
    }

    fn start(&mut self, byte: u8) -> Utf8Result {
        let expected = match byte {
            0x00..=0x7F => return Utf8Result::Char(char::from(byte)),
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            // Continuation bytes, overlong leads and out-of-range leads
            _ => return Utf8Result::Invalid,
        };
        self.buffer[0] = byte;
        self.len = 1;
        self.expected = expected;
        Utf8Result::Pending
    }

    fn decode(&self) -> Utf8Result {
        let b = &self.buffer;
        let cp = match self.expected {
            2 => (u32::from(b[0] & 0x1F) << 6) | u32::from(b[1] & 0x3F),
            3 => {
                let cp = (u32::from(b[0] & 0x0F) << 12)
                    | (u32::from(b[1] & 0x3F) << 6)
                    | u32::from(b[2] & 0x3F);
                // Overlong forms; surrogates are rejected by char::from_u32
                if cp < 0x800 {
                    return Utf8Result::Invalid;
                }
                cp
            }
            4 => {
                let cp = (u32::from(b[0] & 0x07) << 18)
                    | (u32::from(b[1] & 0x3F) << 12)
                    | (u32::from(b[2] & 0x3F) << 6)
                    | u32::from(b[3] & 0x3F);
                if cp < 0x10000 {
                    return Utf8Result::Invalid;
                }
                cp
            }
            _ => return Utf8Result::Invalid,
        };
        char::from_u32(cp).map_or(Utf8Result::Invalid, Utf8Result::Char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> String {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for &byte in bytes {
            loop {
                match decoder.feed(byte) {
                    Utf8Result::Pending => {}
                    Utf8Result::Char(c) => out.push(c),
                    Utf8Result::Invalid => out.push(Utf8Decoder::REPLACEMENT),
                    Utf8Result::Interrupted => {
                        out.push(Utf8Decoder::REPLACEMENT);
                        continue;
                    }
                }
                break;
            }
        }
        out
    }

    #[test]
    fn test_ascii() {
        assert_eq!(decode_all(b"hello"), "hello");
    }

    #[test]
    fn test_multibyte() {
        assert_eq!(decode_all("é日🦀".as_bytes()), "é日🦀");
    }

    #[test]
    fn test_invalid_start_byte() {
        assert_eq!(decode_all(b"a\x80b"), "a\u{FFFD}b");
        assert_eq!(decode_all(b"\xff"), "\u{FFFD}");
    }

    #[test]
    fn test_interrupted_sequence_keeps_next_byte() {
        assert_eq!(decode_all(b"\xe6\x97A"), "\u{FFFD}A");
    }

    #[test]
    fn test_overlong_rejected() {
        assert_eq!(decode_all(b"\xc0\xaf"), "\u{FFFD}\u{FFFD}");
        assert_eq!(decode_all(b"\xe0\x80\xaf"), "\u{FFFD}");
    }

    #[test]
    fn test_surrogate_rejected() {
        assert_eq!(decode_all(b"\xed\xa0\x80"), "\u{FFFD}");
    }

    #[test]
    fn test_pending_state() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(0xE6), Utf8Result::Pending);
        assert!(decoder.is_pending());
        assert_eq!(decoder.feed(0x97), Utf8Result::Pending);
        assert_eq!(decoder.feed(0xA5), Utf8Result::Char('日'));
        assert!(!decoder.is_pending());
    }
}
