use std::fmt;

/// A fixed capacity text buffer that lives on the stack.
///
/// Used for all formatting done while handling a fault, since allocating from
/// a compromised heap is not an option. Writes past the capacity are silently
/// truncated, always at a `char` boundary for text.
///
/// One byte is always held back so that the contents can be nul terminated
/// for passing to libc.
pub struct LineBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> LineBuf<N> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if any write did not fit
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    #[inline]
    fn remaining(&self) -> usize {
        N.saturating_sub(1) - self.len
    }

    /// Appends raw bytes, truncating at capacity
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let take = bytes.len().min(self.remaining());
        self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
        self.truncated |= take < bytes.len();
    }

    /// Appends text, truncating at the last `char` boundary that fits
    pub fn push_str(&mut self, s: &str) {
        let mut take = s.len().min(self.remaining());
        while !s.is_char_boundary(take) {
            take -= 1;
        }

        self.push_bytes(&s.as_bytes()[..take]);
        self.truncated |= take < s.len();
    }

    /// Appends raw bytes as text, replacing every invalid UTF-8 sequence with
    /// `U+FFFD` so that nothing after it is lost
    pub fn push_lossy(&mut self, bytes: &[u8]) {
        for chunk in bytes.utf8_chunks() {
            self.push_str(chunk.valid());
            if !chunk.invalid().is_empty() {
                self.push_str(char::REPLACEMENT_CHARACTER.encode_utf8(&mut [0; 4]));
            }
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The contents as text, up to the first invalid UTF-8 sequence if raw
    /// bytes were pushed
    pub fn as_str(&self) -> &str {
        match std::str::from_utf8(self.as_bytes()) {
            Ok(s) => s,
            // SAFETY: valid_up_to is by definition a valid UTF-8 prefix
            Err(err) => unsafe {
                std::str::from_utf8_unchecked(&self.buf[..err.valid_up_to()])
            },
        }
    }

    /// Removes trailing ASCII whitespace, eg. the newline a tool printed
    pub fn trim_end(&mut self) {
        while self.len > 0 && self.buf[self.len - 1].is_ascii_whitespace() {
            self.len -= 1;
        }
    }

    /// Nul terminates the contents and returns a pointer suitable for libc
    #[inline]
    pub fn as_c_ptr(&mut self) -> *const libc::c_char {
        self.buf[self.len] = 0;
        self.buf.as_ptr().cast()
    }
}

impl<const N: usize> Default for LineBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for LineBuf<N> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl<const N: usize> fmt::Debug for LineBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
