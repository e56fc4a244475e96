use std::sync::Mutex;

/// Default capacity of process logs kept in reports
pub const LOG_LIMIT: usize = 2048;

/// Thread-safe byte sink that silently drops everything past its limit.
#[derive(Debug)]
pub struct TruncateBuffer {
    limit: usize,
    data: Mutex<Vec<u8>>,
}

impl TruncateBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Mutex::new(Vec::new()),
        }
    }

    /// Append bytes, keeping at most `limit` bytes in total
    pub fn write(&self, bytes: &[u8]) {
        let mut data = match self.data.lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        let available = self.limit.saturating_sub(data.len());
        data.extend_from_slice(&bytes[..bytes.len().min(available)]);
    }

    /// Contents as text with invalid UTF-8 sequences and NULs removed
    pub fn text(&self) -> String {
        let data = match self.data.lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        fix_utf8(&data)
    }
}

impl Default for TruncateBuffer {
    fn default() -> Self {
        Self::new(LOG_LIMIT)
    }
}

fn fix_utf8(mut bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                result.push_str(valid);
                break;
            }
            Err(err) => {
                let (valid, rest) = bytes.split_at(err.valid_up_to());
                if let Ok(valid) = std::str::from_utf8(valid) {
                    result.push_str(valid);
                }
                let skip = err.error_len().unwrap_or(rest.len());
                bytes = &rest[skip..];
            }
        }
    }
    result.retain(|c| c != '\0');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_at_limit() {
        let buffer = TruncateBuffer::new(8);
        buffer.write(b"hello ");
        buffer.write(b"world");
        buffer.write(b"!!!");
        assert_eq!(buffer.text(), "hello wo");
    }

    #[test]
    fn test_strips_invalid_utf8_and_nul() {
        let buffer = TruncateBuffer::default();
        buffer.write(b"ok\0\xff\xfe done");
        assert_eq!(buffer.text(), "ok done");
    }

    #[test]
    fn test_cut_multibyte_char_is_dropped() {
        let buffer = TruncateBuffer::new(4);
        buffer.write("abй".as_bytes());
        buffer.write("x".as_bytes());
        assert_eq!(buffer.text(), "abй");
        let buffer = TruncateBuffer::new(3);
        buffer.write("abй".as_bytes());
        assert_eq!(buffer.text(), "ab");
    }
}
