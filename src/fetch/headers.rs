/// Collects response headers from raw header lines as they arrive off the wire.
///
/// Every status line (`HTTP/...`) starts a fresh header block, so after a redirect chain only
/// the headers of the final response remain. Headers from intermediate hops are dropped.
#[derive(Debug, Default, Clone)]
pub struct HeaderAccumulator {
    headers: Vec<(String, String)>,
    status_lines: usize,
}

impl HeaderAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, raw: &str) {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.starts_with("HTTP/") {
            self.headers.clear();
            self.status_lines += 1;
            return;
        }
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.headers.push((name.to_string(), value.trim().to_string()));
    }

    pub fn feed_block(&mut self, block: &str) {
        for line in block.split('\n') {
            self.feed_line(line);
        }
    }

    pub fn status_lines(&self) -> usize {
        self.status_lines
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn into_headers(self) -> Vec<(String, String)> {
        self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_status_line_resets_headers() {
        let mut acc = HeaderAccumulator::new();
        acc.feed_block(
            "HTTP/1.1 302 Found\r\nLocation: /next\r\nX-Hop: first\r\n\r\n\
             HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Final:  yes \r\n\r\n",
        );
        assert_eq!(acc.status_lines(), 2);
        assert_eq!(
            acc.headers(),
            &[("Content-Type".to_string(), "text/plain".to_string()), ("X-Final".to_string(), "yes".to_string())]
        );
    }

    #[test]
    fn keeps_duplicates_in_order_and_skips_garbage() {
        let mut acc = HeaderAccumulator::new();
        acc.feed_line("HTTP/2 200\r\n");
        acc.feed_line("set-cookie: a=1\r\n");
        acc.feed_line("not a header line");
        acc.feed_line(": empty-name");
        acc.feed_line("set-cookie: b=2");
        acc.feed_line("x-empty:");
        assert_eq!(
            acc.into_headers(),
            vec![
                ("set-cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
                ("x-empty".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn value_keeps_inner_colons() {
        let mut acc = HeaderAccumulator::new();
        acc.feed_line("Location: http://example.test:8080/path");
        assert_eq!(acc.headers()[0].1, "http://example.test:8080/path");
    }
}
