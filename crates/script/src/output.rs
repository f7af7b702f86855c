/// Captured `print` output, truncated at a byte cap on a character boundary.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    cap: usize,
    text: String,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            text: String::new(),
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        if self.truncated {
            return;
        }
        let room = self.cap.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(chunk);
            return;
        }
        let mut end = room;
        while !chunk.is_char_boundary(end) {
            end -= 1;
        }
        self.text.push_str(&chunk[..end]);
        self.truncated = true;
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn take(&mut self) -> (String, bool) {
        let truncated = std::mem::replace(&mut self.truncated, false);
        (std::mem::take(&mut self.text), truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_on_char_boundary() {
        let mut out = OutputBuffer::new(5);
        out.push("abc");
        out.push("déf");
        let (text, truncated) = out.take();
        assert_eq!(text, "abcd");
        assert!(truncated);
    }

    #[test]
    fn test_under_cap_is_untouched() {
        let mut out = OutputBuffer::new(16);
        out.push("hello\n");
        assert!(!out.is_truncated());
        assert_eq!(out.take(), ("hello\n".to_string(), false));
    }
}
