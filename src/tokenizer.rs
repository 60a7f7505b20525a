//! 基于分块输入的定位原语。所有 match 只在 Text 分块内命中，
//! 命中后顺带吞掉尾随空白（并收集途经的注释），语法因此对空白不敏感。

use crate::ast::Comment;
use crate::chunker::{Chunk, ChunkKind, ChunkedSource};
use crate::error::{ErrorKind, LessError, LessResult};
use regex::Regex;
use std::collections::HashMap;

/// 游标快照：`(index, chunk_id, chunk_offset)` 三元组加回溯所需的附加状态。
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub index: usize,
    pub chunk: usize,
    pub offset: usize,
    spaced: bool,
    comments: usize,
}

pub struct Tokenizer<'s> {
    source: &'s str,
    chunks: &'s [Chunk],
    index: usize,
    chunk: usize,
    spaced: bool,
    keep_comments: bool,
    comments: Vec<Comment>,
    // 正则按实例缓存，编译之间互不共享。
    cache: HashMap<&'static str, Regex>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UntilOptions {
    pub include_delimiter: bool,
    pub balanced_parens: bool,
}

impl<'s> Tokenizer<'s> {
    pub fn new(chunked: &'s ChunkedSource, keep_comments: bool) -> Self {
        Self {
            source: &chunked.source,
            chunks: &chunked.chunks,
            index: 0,
            chunk: 0,
            spaced: false,
            keep_comments,
            comments: Vec::new(),
            cache: HashMap::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_eof(&self) -> bool {
        self.index >= self.source.len()
    }

    /// 上一次消费后是否存在分隔空白（或注释）。
    pub fn is_spaced(&self) -> bool {
        self.spaced
    }

    pub fn take_comments(&mut self) -> Vec<Comment> {
        std::mem::take(&mut self.comments)
    }

    pub fn remember(&self) -> Location {
        Location {
            index: self.index,
            chunk: self.chunk,
            offset: self
                .index
                .saturating_sub(self.chunks.get(self.chunk).map_or(0, |c| c.start)),
            spaced: self.spaced,
            comments: self.comments.len(),
        }
    }

    pub fn recall(&mut self, location: Location) {
        self.index = location.index;
        self.chunk = location.chunk;
        self.spaced = location.spaced;
        self.comments.truncate(location.comments);
    }

    fn sync(&mut self) {
        while self.chunk + 1 < self.chunks.len() && self.index >= self.chunks[self.chunk].end {
            self.chunk += 1;
        }
    }

    fn current_chunk(&self) -> &Chunk {
        &self.chunks[self.chunk.min(self.chunks.len() - 1)]
    }

    fn in_text(&self) -> bool {
        let chunk = self.current_chunk();
        chunk.kind == ChunkKind::Text && self.index < chunk.end
    }

    /// 当前 Text 分块内的剩余文本；位于其他分块时为空串。
    fn rest(&self) -> &'s str {
        let chunk = self.current_chunk();
        if chunk.kind == ChunkKind::Text && self.index < chunk.end {
            &self.source[self.index..chunk.end]
        } else {
            ""
        }
    }

    fn raw_rest(&self) -> &'s str {
        &self.source[self.index.min(self.source.len())..]
    }

    pub fn peek_char(&self, offset: usize) -> Option<char> {
        self.raw_rest().chars().nth(offset)
    }

    pub fn current_char(&self) -> Option<char> {
        self.peek_char(0)
    }

    pub fn peek_str(&self, text: &str) -> bool {
        self.raw_rest().starts_with(text)
    }

    /// 前瞻一个完整单词（后随字符不能延续标识符）。
    pub fn peek_word(&self, word: &str) -> bool {
        let rest = self.raw_rest();
        rest.starts_with(word)
            && !rest[word.len()..]
                .chars()
                .next()
                .map_or(false, |c| c.is_alphanumeric() || c == '-' || c == '_')
    }

    /// 跳过空白与注释后检查下一个字符，不移动游标。
    pub fn peek_after_comments(&self, expected: char) -> bool {
        let mut index = self.index;
        let mut chunk = self.chunk;
        loop {
            while chunk + 1 < self.chunks.len() && index >= self.chunks[chunk].end {
                chunk += 1;
            }
            let current = &self.chunks[chunk.min(self.chunks.len() - 1)];
            if current.kind == ChunkKind::Comment && index == current.start {
                index = current.end;
                continue;
            }
            match self.source[index..].chars().next() {
                Some(c) if c.is_whitespace() => index += c.len_utf8(),
                Some(c) => return c == expected,
                None => return false,
            }
        }
    }

    /// 吞掉空白与注释（注释进入待取队列），返回是否发生了跳过。
    pub fn skip_whitespace(&mut self) -> bool {
        let skipped = self.skip_whitespace_inner();
        self.spaced = skipped;
        skipped
    }

    fn skip_whitespace_inner(&mut self) -> bool {
        let mut skipped = false;
        loop {
            self.sync();
            let chunk = self.current_chunk().clone();
            if chunk.kind == ChunkKind::Comment && self.index == chunk.start {
                let text = self.source[chunk.start..chunk.end].to_string();
                if self.keep_comments {
                    self.comments.push(Comment::new(text, chunk.start));
                }
                self.index = chunk.end;
                skipped = true;
                continue;
            }
            if chunk.kind == ChunkKind::QuotedString {
                break;
            }
            // 优化级别 0 时注释仍留在 Text 分块内，这里手工识别。
            let rest = self.rest();
            if rest.starts_with("/*") {
                let end = rest.find("*/").map(|p| p + 2).unwrap_or(rest.len());
                if self.keep_comments {
                    self.comments
                        .push(Comment::new(rest[..end].to_string(), self.index));
                }
                self.index += end;
                skipped = true;
                continue;
            }
            if rest.starts_with("//") {
                let end = rest.find('\n').unwrap_or(rest.len());
                if self.keep_comments {
                    self.comments
                        .push(Comment::new(rest[..end].to_string(), self.index));
                }
                self.index += end;
                skipped = true;
                continue;
            }
            match rest.chars().next() {
                Some(c) if c.is_whitespace() => {
                    self.index += c.len_utf8();
                    skipped = true;
                }
                Some(_) => break,
                None => {
                    if self.chunk + 1 >= self.chunks.len() {
                        break;
                    }
                    self.chunk += 1;
                }
            }
        }
        skipped
    }

    fn after_consume(&mut self) {
        self.skip_whitespace();
    }

    pub fn match_char(&mut self, expected: char) -> bool {
        self.sync();
        if self.rest().starts_with(expected) {
            self.index += expected.len_utf8();
            self.after_consume();
            true
        } else {
            false
        }
    }

    pub fn match_str(&mut self, expected: &str) -> bool {
        self.sync();
        if self.rest().starts_with(expected) {
            self.index += expected.len();
            self.after_consume();
            true
        } else {
            false
        }
    }

    fn compiled(&mut self, pattern: &'static str) -> &Regex {
        self.cache.entry(pattern).or_insert_with(|| {
            Regex::new(&format!("^(?:{pattern})")).expect("内建正则必须合法")
        })
    }

    /// 锚定在当前分块游标处的正则匹配。
    pub fn match_re(&mut self, pattern: &'static str) -> Option<String> {
        self.sync();
        let rest = self.rest();
        let m = self.compiled(pattern).find(rest)?;
        if m.start() != 0 || m.end() == 0 {
            return None;
        }
        let text = m.as_str().to_string();
        self.index += m.end();
        self.after_consume();
        Some(text)
    }

    pub fn match_re_captures(&mut self, pattern: &'static str) -> Option<Vec<Option<String>>> {
        self.sync();
        let rest = self.rest();
        let caps = self.compiled(pattern).captures(rest)?;
        let all = caps.get(0)?;
        if all.start() != 0 || all.end() == 0 {
            return None;
        }
        let groups = (0..caps.len())
            .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
            .collect();
        self.index += all.end();
        self.after_consume();
        Some(groups)
    }

    /// 手写数字扫描：可选符号、整数位、可选小数位。不吞尾随空白。
    pub fn match_number(&mut self, allow_decimals: bool, allow_operator: bool) -> Option<String> {
        self.sync();
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut i = 0;
        if allow_operator && i < bytes.len() && (bytes[i] == b'-' || bytes[i] == b'+') {
            i += 1;
        }
        let digits_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if allow_decimals && i < bytes.len() && bytes[i] == b'.' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 {
                i = j;
            }
        }
        if i == digits_start || !rest[digits_start..i].chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        let text = rest[..i].to_string();
        self.index += i;
        Some(text)
    }

    /// 手写关键字扫描：`[@@?]?[A-Za-z0-9_-]+`，首字符规则可配。不吞尾随空白。
    pub fn match_keyword(&mut self, allow_at: bool, allow_leading_digit: bool) -> Option<String> {
        self.sync();
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut i = 0;
        if allow_at {
            while i < 2 && i < bytes.len() && bytes[i] == b'@' {
                i += 1;
            }
        }
        let word_start = i;
        while i < bytes.len() {
            let b = bytes[i];
            let is_word = b.is_ascii_alphanumeric() || b == b'-' || b == b'_';
            if !is_word {
                break;
            }
            if i == word_start && b.is_ascii_digit() && !allow_leading_digit {
                return None;
            }
            i += 1;
        }
        if i == word_start {
            return None;
        }
        let text = rest[..i].to_string();
        self.index += i;
        Some(text)
    }

    /// 读取单位后缀（`%` 或字母串），紧贴数字，不吞空白。
    pub fn match_unit(&mut self) -> Option<String> {
        self.sync();
        let rest = self.rest();
        if rest.starts_with('%') {
            self.index += 1;
            return Some("%".to_string());
        }
        let len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if len == 0 {
            return None;
        }
        let text = rest[..len].to_string();
        self.index += len;
        Some(text)
    }

    /// 扫描到分隔符为止，可选择吞掉分隔符、尊重括号配平。
    /// 字符串分块原样并入，注释分块跳过。找不到分隔符则游标不动。
    pub fn match_until(&mut self, delimiter: char, options: UntilOptions) -> Option<String> {
        let saved = self.remember();
        let mut collected = String::new();
        let mut depth = 0usize;
        loop {
            self.sync();
            let chunk = self.current_chunk().clone();
            if self.index >= self.source.len() {
                self.recall(saved);
                return None;
            }
            match chunk.kind {
                ChunkKind::QuotedString if self.index == chunk.start => {
                    collected.push_str(&self.source[chunk.start..chunk.end]);
                    self.index = chunk.end;
                    continue;
                }
                ChunkKind::Comment if self.index == chunk.start => {
                    self.index = chunk.end;
                    continue;
                }
                _ => {}
            }
            let Some(c) = self.current_char() else {
                self.recall(saved);
                return None;
            };
            if c == delimiter && (!options.balanced_parens || depth == 0) {
                if options.include_delimiter {
                    collected.push(c);
                    self.index += c.len_utf8();
                }
                self.after_consume();
                return Some(collected);
            }
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
            collected.push(c);
            self.index += c.len_utf8();
        }
    }

    /// 当前字符是 `open` 时读取配平区间，返回去掉外层定界符的内容。
    pub fn match_balanced(&mut self, open: char, close: char) -> Option<String> {
        let saved = self.remember();
        if self.current_char() != Some(open) {
            return None;
        }
        self.index += open.len_utf8();
        match self.match_balanced_tail(open, close) {
            Some(inner) => Some(inner),
            None => {
                self.recall(saved);
                None
            }
        }
    }

    /// 开定界符已被消费时的配平扫描，返回闭合符之前的内容。
    pub fn match_balanced_tail(&mut self, open: char, close: char) -> Option<String> {
        let saved = self.remember();
        let mut depth = 1usize;
        let mut collected = String::new();
        loop {
            self.sync();
            let chunk = self.current_chunk().clone();
            if chunk.kind == ChunkKind::QuotedString && self.index == chunk.start {
                collected.push_str(&self.source[chunk.start..chunk.end]);
                self.index = chunk.end;
                continue;
            }
            let Some(c) = self.current_char() else {
                self.recall(saved);
                return None;
            };
            self.index += c.len_utf8();
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    self.after_consume();
                    return Some(collected);
                }
            }
            collected.push(c);
        }
    }

    /// 当前位于字符串分块（或裸引号）时整串读出，含引号。
    pub fn get_quoted_string(&mut self) -> LessResult<Option<String>> {
        self.sync();
        let chunk = self.current_chunk().clone();
        if chunk.kind == ChunkKind::QuotedString && self.index == chunk.start {
            let text = self.source[chunk.start..chunk.end].to_string();
            self.index = chunk.end;
            self.after_consume();
            return Ok(Some(text));
        }
        // 优化级别 0：字符串留在 Text 分块内。
        let rest = self.rest();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            return Ok(None);
        };
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b if b == quote as u8 => {
                    let text = rest[..i + 1].to_string();
                    self.index += i + 1;
                    self.after_consume();
                    return Ok(Some(text));
                }
                _ => i += 1,
            }
        }
        Err(LessError::parse(
            ErrorKind::UnterminatedString,
            "字符串缺少闭合引号",
            self.index,
        ))
    }

    /// 当前位于注释分块时直接取出。
    pub fn get_comment(&mut self) -> Option<Comment> {
        self.sync();
        let chunk = self.current_chunk().clone();
        if chunk.kind == ChunkKind::Comment && self.index == chunk.start {
            let text = self.source[chunk.start..chunk.end].to_string();
            self.index = chunk.end;
            self.after_consume();
            return Some(Comment::new(text, chunk.start));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker;

    fn tokenizer(src: &str) -> (chunker::ChunkedSource, ()) {
        (chunker::chunk(src, 1).unwrap(), ())
    }

    #[test]
    fn match_char_skips_trailing_whitespace() {
        let (chunked, _) = tokenizer("a   b");
        let mut t = Tokenizer::new(&chunked, true);
        assert!(t.match_char('a'));
        assert!(t.is_spaced());
        assert!(t.match_char('b'));
        assert!(t.is_eof());
    }

    #[test]
    fn whitespace_skip_collects_comments() {
        let (chunked, _) = tokenizer("a /* note */ b");
        let mut t = Tokenizer::new(&chunked, true);
        assert!(t.match_char('a'));
        assert!(t.match_char('b'));
        let comments = t.take_comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].text, "/* note */");
    }

    #[test]
    fn recall_restores_comment_queue() {
        let (chunked, _) = tokenizer("x /* c */ y");
        let mut t = Tokenizer::new(&chunked, true);
        let saved = t.remember();
        assert!(t.match_char('x'));
        t.recall(saved);
        assert!(t.take_comments().is_empty());
        assert!(t.match_char('x'));
        assert_eq!(t.take_comments().len(), 1);
    }

    #[test]
    fn regex_match_is_anchored_to_chunk() {
        let (chunked, _) = tokenizer("width: 10px");
        let mut t = Tokenizer::new(&chunked, true);
        assert_eq!(t.match_re(r"[a-z]+").as_deref(), Some("width"));
        assert_eq!(t.match_re(r"[a-z]+"), None);
        assert!(t.match_char(':'));
    }

    #[test]
    fn match_number_is_hand_rolled() {
        let (chunked, _) = tokenizer("-12.5px");
        let mut t = Tokenizer::new(&chunked, true);
        assert_eq!(t.match_number(true, true).as_deref(), Some("-12.5"));
        assert_eq!(t.match_unit().as_deref(), Some("px"));
    }

    #[test]
    fn match_number_without_decimals_stops_at_dot() {
        let (chunked, _) = tokenizer("12.5");
        let mut t = Tokenizer::new(&chunked, true);
        assert_eq!(t.match_number(false, false).as_deref(), Some("12"));
    }

    #[test]
    fn match_keyword_honors_first_char_rules() {
        let (chunked, _) = tokenizer("9abc");
        let mut t = Tokenizer::new(&chunked, true);
        assert_eq!(t.match_keyword(false, false), None);
        assert_eq!(t.match_keyword(false, true).as_deref(), Some("9abc"));
    }

    #[test]
    fn match_keyword_takes_at_prefixes() {
        let (chunked, _) = tokenizer("@@indirect");
        let mut t = Tokenizer::new(&chunked, true);
        assert_eq!(t.match_keyword(true, false).as_deref(), Some("@@indirect"));
    }

    #[test]
    fn quoted_string_chunk_is_consumed_whole() {
        let (chunked, _) = tokenizer(r#""hi \" there" x"#);
        let mut t = Tokenizer::new(&chunked, true);
        let s = t.get_quoted_string().unwrap().unwrap();
        assert_eq!(s, r#""hi \" there""#);
        assert!(t.match_char('x'));
    }

    #[test]
    fn match_until_respects_paren_balance() {
        let (chunked, _) = tokenizer("a(b;c);d");
        let mut t = Tokenizer::new(&chunked, true);
        let text = t
            .match_until(
                ';',
                UntilOptions {
                    include_delimiter: false,
                    balanced_parens: true,
                },
            )
            .unwrap();
        assert_eq!(text, "a(b;c)");
        assert!(t.match_char(';'));
    }

    #[test]
    fn match_balanced_returns_inner_text() {
        let (chunked, _) = tokenizer("(1 + (2 * 3)) rest");
        let mut t = Tokenizer::new(&chunked, true);
        assert_eq!(t.match_balanced('(', ')').as_deref(), Some("1 + (2 * 3)"));
        assert!(t.peek_str("rest"));
    }

    #[test]
    fn peek_after_comments_sees_past_comment_chunks() {
        let (chunked, _) = tokenizer("  /* a */  {");
        let t = Tokenizer::new(&chunked, true);
        assert!(t.peek_after_comments('{'));
    }

    #[test]
    fn get_comment_consumes_comment_chunks_directly() {
        let (chunked, _) = tokenizer("/* lead */x");
        let mut t = Tokenizer::new(&chunked, true);
        let comment = t.get_comment().unwrap();
        assert_eq!(comment.text, "/* lead */");
        assert!(t.match_char('x'));
    }
}
