//! SSE 流式读取
//!
//! 逐行解析 `data:` 帧，拼接 `choices[0].delta.content`。
//! 非 data 行、空帧、`[DONE]` 与非 JSON 帧一律跳过：解析函数返回 Option，调用方遇 None 即跳过。

use serde_json::Value;

/// 解析单行；仅当该行是携带 JSON 的 data 帧时返回 Some
pub fn parse_data_line(line: &str) -> Option<Value> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

/// 取出增量文本片段
pub fn delta_content(chunk: &Value) -> Option<&str> {
    chunk.pointer("/choices/0/delta/content")?.as_str()
}

/// 流式累积器：按字节喂入，跨 chunk 边界缓存未完整的行
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    text: String,
    frames: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.consume_line(&line);
        }
    }

    fn consume_line(&mut self, raw: &[u8]) {
        // 无法按 UTF-8 解码的行直接丢弃
        let Ok(line) = std::str::from_utf8(raw) else {
            return;
        };
        let Some(chunk) = parse_data_line(line) else {
            return;
        };
        self.frames += 1;
        if let Some(fragment) = delta_content(&chunk) {
            self.text.push_str(fragment);
        }
    }

    /// 已解析的有效帧数
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// 处理末尾无换行的残余数据，返回完整文本
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.consume_line(&rest);
        }
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulate_text(body: &str) -> String {
        let mut acc = StreamAccumulator::new();
        acc.push(body.as_bytes());
        acc.finish()
    }

    #[test]
    fn test_concatenates_delta_fragments() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                    data: [DONE]\n\n";
        assert_eq!(accumulate_text(body), "Hello");
    }

    #[test]
    fn test_no_data_lines_yields_empty_text() {
        let body = ": keep-alive\nevent: ping\n{\"choices\": []}\n";
        assert_eq!(accumulate_text(body), "");
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let body = "data: {not json}\ndata:{\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n";
        assert_eq!(accumulate_text(body), "ok");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut acc = StreamAccumulator::new();
        acc.push(b"data: {\"choices\":[{\"delta\":{\"con");
        acc.push(b"tent\":\"caf\xc3");
        acc.push(b"\xa9\"}}]}\n");
        acc.push(b"data: {\"choices\":[{\"delta\":{}}]}");
        assert_eq!(acc.frames(), 1);
        assert_eq!(acc.finish(), "café");
    }

    #[test]
    fn test_parse_data_line_rejects_done() {
        assert!(parse_data_line("data: [DONE]").is_none());
        assert!(parse_data_line("data:").is_none());
        assert!(parse_data_line("id: 3").is_none());
        assert!(parse_data_line("data: {\"a\":1}").is_some());
    }
}
