//! 解析前的分块预扫描：把源码切成 Text / Comment / QuotedString 三类连续片段，
//! 同时校验花括号配平。后续正则匹配都锚定在单个分块内，避免大输入上的回溯爆炸。

use crate::error::{ErrorKind, LessError, LessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Text,
    Comment,
    QuotedString,
}

/// 归一化源码中的一个连续片段，`start..end` 为字节区间。
#[derive(Debug, Clone)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub start: usize,
    pub end: usize,
    /// Text 分块因 `}` 闭合时置位。
    pub finished: bool,
}

/// 分块结果：归一化后的源码与覆盖全文的分块序列。
#[derive(Debug)]
pub struct ChunkedSource {
    pub source: String,
    pub chunks: Vec<Chunk>,
}

/// 行尾统一为 `\n`。
pub fn normalize(source: &str) -> String {
    if source.contains('\r') {
        source.replace("\r\n", "\n")
    } else {
        source.to_string()
    }
}

/// 按优化级别分块。级别 0 跳过预扫描，整个输入视作一个 Text 分块。
pub fn chunk(source: &str, optimization: u8) -> LessResult<ChunkedSource> {
    let normalized = normalize(source);
    if optimization == 0 {
        let len = normalized.len();
        return Ok(ChunkedSource {
            source: normalized,
            chunks: vec![Chunk {
                kind: ChunkKind::Text,
                start: 0,
                end: len,
                finished: false,
            }],
        });
    }

    let bytes = normalized.as_bytes();
    let len = bytes.len();
    let mut chunks = Vec::new();
    let mut open_braces: Vec<usize> = Vec::new();
    let mut paren_level = 0usize;
    let mut text_start = 0usize;
    let mut i = 0usize;

    let mut close_text = |chunks: &mut Vec<Chunk>, start: usize, end: usize, finished: bool| {
        if end > start {
            chunks.push(Chunk {
                kind: ChunkKind::Text,
                start,
                end,
                finished,
            });
        }
    };

    while i < len {
        match bytes[i] {
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                close_text(&mut chunks, text_start, i, false);
                let start = i;
                let mut end = None;
                let mut j = i + 2;
                while j + 1 < len {
                    if bytes[j] == b'*' && bytes[j + 1] == b'/' {
                        end = Some(j + 2);
                        break;
                    }
                    j += 1;
                }
                let end = end.ok_or_else(|| {
                    LessError::parse(ErrorKind::UnterminatedComment, "块注释未以 */ 结束", start)
                })?;
                chunks.push(Chunk {
                    kind: ChunkKind::Comment,
                    start,
                    end,
                    finished: false,
                });
                i = end;
                text_start = end;
            }
            // 参数括号内的 `//` 属于 url 等语法的一部分，不当作行注释。
            b'/' if i + 1 < len && bytes[i + 1] == b'/' && paren_level == 0 => {
                close_text(&mut chunks, text_start, i, false);
                let start = i;
                let mut end = len;
                let mut j = i + 2;
                while j < len {
                    if bytes[j] == b'\n' {
                        end = j;
                        break;
                    }
                    j += 1;
                }
                chunks.push(Chunk {
                    kind: ChunkKind::Comment,
                    start,
                    end,
                    finished: false,
                });
                i = end;
                text_start = end;
            }
            quote @ (b'"' | b'\'') => {
                close_text(&mut chunks, text_start, i, false);
                let start = i;
                let mut end = None;
                let mut j = i + 1;
                while j < len {
                    match bytes[j] {
                        b'\\' => j += 2,
                        c if c == quote => {
                            end = Some(j + 1);
                            break;
                        }
                        _ => j += 1,
                    }
                }
                let end = end.ok_or_else(|| {
                    LessError::parse(ErrorKind::UnterminatedString, "字符串缺少闭合引号", start)
                })?;
                chunks.push(Chunk {
                    kind: ChunkKind::QuotedString,
                    start,
                    end,
                    finished: false,
                });
                i = end;
                text_start = end;
            }
            b'{' => {
                open_braces.push(i);
                i += 1;
            }
            b'}' => {
                if open_braces.pop().is_none() {
                    return Err(LessError::parse(
                        ErrorKind::UnbalancedBraces,
                        "出现未匹配的 '}'",
                        i,
                    ));
                }
                i += 1;
                close_text(&mut chunks, text_start, i, true);
                text_start = i;
            }
            b'(' => {
                paren_level += 1;
                i += 1;
            }
            b')' => {
                paren_level = paren_level.saturating_sub(1);
                i += 1;
            }
            _ => i += 1,
        }
    }

    if let Some(pos) = open_braces.last() {
        return Err(LessError::parse(
            ErrorKind::UnbalancedBraces,
            "'{' 缺少匹配的 '}'",
            *pos,
        ));
    }

    close_text(&mut chunks, text_start, len, false);
    if chunks.is_empty() {
        chunks.push(Chunk {
            kind: ChunkKind::Text,
            start: 0,
            end: 0,
            finished: false,
        });
    }

    Ok(ChunkedSource {
        source: normalized,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<ChunkKind> {
        chunk(src, 1).unwrap().chunks.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn plain_text_is_single_chunk() {
        assert_eq!(kinds("a { color: red; }"), vec![ChunkKind::Text]);
    }

    #[test]
    fn comments_and_strings_split_out() {
        let ks = kinds("a /* c */ \"s\" b");
        assert_eq!(
            ks,
            vec![
                ChunkKind::Text,
                ChunkKind::Comment,
                ChunkKind::Text,
                ChunkKind::QuotedString,
                ChunkKind::Text,
            ]
        );
    }

    #[test]
    fn closing_brace_finishes_text_chunk() {
        let result = chunk(".a { x: 1; } .b {}", 1).unwrap();
        let finished: Vec<bool> = result.chunks.iter().map(|c| c.finished).collect();
        assert_eq!(finished, vec![true, true]);
    }

    #[test]
    fn crlf_is_normalized() {
        let result = chunk("a\r\nb", 1).unwrap();
        assert_eq!(result.source, "a\nb");
    }

    #[test]
    fn level_zero_skips_the_prepass() {
        let result = chunk("a /* c */ {}", 0).unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].kind, ChunkKind::Text);
    }

    #[test]
    fn unterminated_comment_is_rejected() {
        let err = chunk("a /* never", 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnterminatedComment);
        assert_eq!(err.index, 2);
    }

    #[test]
    fn unterminated_string_is_rejected() {
        let err = chunk("a: \"open;", 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnterminatedString);
    }

    #[test]
    fn unbalanced_braces_are_rejected() {
        assert_eq!(
            chunk(".a { x: 1;", 1).unwrap_err().kind,
            ErrorKind::UnbalancedBraces
        );
        assert_eq!(
            chunk(".a } b", 1).unwrap_err().kind,
            ErrorKind::UnbalancedBraces
        );
    }

    #[test]
    fn slashes_inside_parens_are_not_comments() {
        let ks = kinds("a: url(http://x/y) b");
        assert_eq!(ks, vec![ChunkKind::Text]);
    }

    #[test]
    fn escaped_quote_stays_inside_string() {
        let ks = kinds(r#"a: "he \" llo";"#);
        assert_eq!(
            ks,
            vec![ChunkKind::Text, ChunkKind::QuotedString, ChunkKind::Text]
        );
    }
}
