//! CSS 输出缓冲。维护一个片段帧栈：`push` 开新帧收集局部输出，
//! `pop_and_append` 把整帧并回父帧，配合 `indent` 实现块体缩进。

/// 输出缓冲与排版开关。压缩模式下缩进与多余空白全部省略。
#[derive(Debug)]
pub struct Output {
    frames: Vec<Vec<String>>,
    pub compress: bool,
    pub keep_comments: bool,
}

impl Output {
    pub fn new(compress: bool, keep_comments: bool) -> Self {
        Self {
            frames: vec![Vec::new()],
            compress,
            keep_comments,
        }
    }

    fn current(&mut self) -> &mut Vec<String> {
        self.frames.last_mut().expect("输出帧栈不应为空")
    }

    pub fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop(&mut self) -> String {
        let frame = self.frames.pop().unwrap_or_default();
        frame.concat()
    }

    pub fn pop_and_append(&mut self) {
        let text = self.pop();
        if !text.is_empty() {
            self.add(text);
        }
    }

    pub fn add<S: Into<String>>(&mut self, text: S) {
        let text = text.into();
        if !text.is_empty() {
            self.current().push(text);
        }
    }

    pub fn add_char(&mut self, ch: char) {
        self.current().push(ch.to_string());
    }

    /// 惰性分隔符：只在条目之间输出，绝不尾随。
    pub fn append_many(&mut self, items: &[String], separator: &str) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.add(separator.to_string());
            }
            self.add(item.clone());
        }
    }

    /// 给当前帧的每一行加 `level` 级缩进。压缩模式下无操作。
    pub fn indent(&mut self, level: usize) {
        if self.compress || level == 0 {
            return;
        }
        let prefix = "  ".repeat(level);
        let text = self.current().concat();
        let mut indented = String::with_capacity(text.len() + prefix.len() * 4);
        for line in text.split_inclusive('\n') {
            if line != "\n" && !line.is_empty() {
                indented.push_str(&prefix);
            }
            indented.push_str(line);
        }
        self.reset(indented);
    }

    pub fn trim(&mut self) {
        let text = self.current().concat();
        self.reset(text.trim().to_string());
    }

    pub fn trim_right_char(&mut self, ch: char) {
        let text = self.current().concat();
        self.reset(text.trim_end_matches(ch).to_string());
    }

    /// 用单一字符串替换当前帧内容（事后空白压缩用）。
    pub fn reset(&mut self, text: String) {
        let frame = self.current();
        frame.clear();
        if !text.is_empty() {
            frame.push(text);
        }
    }

    pub fn ends_with(&self, ch: char) -> bool {
        self.frames
            .last()
            .and_then(|f| f.last())
            .map_or(false, |s| s.ends_with(ch))
    }

    pub fn frame_is_empty(&self) -> bool {
        self.frames.last().map_or(true, |f| f.is_empty())
    }

    pub fn finish(mut self) -> String {
        while self.frames.len() > 1 {
            self.pop_and_append();
        }
        self.frames.pop().unwrap_or_default().concat()
    }
}
