//! cmd-prompt 行解析
//!
//! 控制台里的命令行形如 `  # go test -run Foo`，补全前先在本地拆出命令名和参数。

use crate::protocol::CmdCompletionData;

/// 提示符
pub const PROMPT_MARKER: char = '#';

/// 解析命令行
///
/// `line` 为整行文本，`cursor` 为光标在行内的字符偏移。只解析光标之前的部分，
/// 光标越过行尾时按行尾处理；找不到提示符、引号不配对或没有任何 token 时返回 `None`。
pub fn parse(line: &str, cursor: usize) -> Option<CmdCompletionData> {
    let len = line.chars().count();
    let cursor = if cursor > len {
        tracing::debug!("cmd-prompt 光标越过行尾 ({} > {})，按行尾处理", cursor, len);
        len
    } else {
        cursor
    };
    let chars: Vec<char> = line.chars().take(cursor).collect();

    let mut i = chars.iter().position(|&c| c == PROMPT_MARKER)?;
    while i < chars.len() && (chars[i] == ' ' || chars[i] == PROMPT_MARKER) {
        i += 1;
    }

    let src: String = chars[i..].iter().collect();
    let pos = chars.len() - i;

    let mut tokens = match shell_words::split(&src) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("cmd-prompt 解析失败: {:?}: {}", src, e);
            return None;
        }
    };
    if tokens.is_empty() {
        return None;
    }

    let name = tokens.remove(0);
    Some(CmdCompletionData {
        pos,
        src,
        name,
        args: tokens,
    })
}
