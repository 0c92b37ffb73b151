//! 事件闸门
//!
//! 决定某个 buffer 上的事件是否可以触发 Agent 交互

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::types::ViewState;

/// 通配语言
pub const ALL_LANGS: &str = "*";

/// 事件闸门
pub struct EventGate {
    ready: AtomicBool,
    enabled_for_langs: RwLock<Vec<String>>,
}

impl Default for EventGate {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(false),
            enabled_for_langs: RwLock::new(vec![ALL_LANGS.to_string()]),
        }
    }
}

impl EventGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动完成后才放行事件
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// 替换语言白名单
    pub fn set_enabled_langs(&self, langs: Vec<String>) {
        *self.enabled_for_langs.write() = langs;
    }

    pub fn enabled_langs(&self) -> Vec<String> {
        self.enabled_for_langs.read().clone()
    }

    /// buffer 的语言是否启用
    pub fn enabled(&self, view: &ViewState) -> bool {
        if !self.is_ready() {
            return false;
        }

        let langs = self.enabled_for_langs.read();
        if langs.iter().any(|l| l == ALL_LANGS) {
            return true;
        }

        match view.lang.as_deref() {
            Some(lang) => langs.iter().any(|l| l == lang),
            None => false,
        }
    }

    /// 事件是否可以触发 Agent 交互
    pub fn can_trigger_event(&self, view: Option<&ViewState>, allow_console: bool) -> bool {
        let view = match view {
            Some(v) => v,
            None => return false,
        };

        if !self.enabled(view) {
            return false;
        }

        if allow_console && view.is_console {
            return true;
        }

        view.is_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ViewInfo;

    fn state(lang: &str, file: bool, console: bool) -> ViewState {
        let mut view = ViewInfo::file(1, "/x", lang, "");
        if !file {
            view.file_name = None;
        }
        view.is_console = console;
        ViewState::new(&view)
    }

    #[test]
    fn test_not_enabled_before_ready() {
        let gate = EventGate::new();
        assert!(!gate.enabled(&state("go", true, false)));
        gate.mark_ready();
        assert!(gate.enabled(&state("go", true, false)));
    }

    #[test]
    fn test_wildcard_enables_every_lang() {
        let gate = EventGate::new();
        gate.mark_ready();
        gate.set_enabled_langs(vec!["go".to_string(), "*".to_string()]);
        for lang in ["go", "rust", "python", ""] {
            assert!(gate.enabled(&state(lang, true, false)), "lang={}", lang);
        }
    }

    #[test]
    fn test_explicit_allow_list() {
        let gate = EventGate::new();
        gate.mark_ready();
        gate.set_enabled_langs(vec!["go".to_string(), "cmd-prompt".to_string()]);
        assert!(gate.enabled(&state("go", true, false)));
        assert!(gate.enabled(&state("cmd-prompt", false, true)));
        assert!(!gate.enabled(&state("rust", true, false)));

        let mut no_lang = state("go", true, false);
        no_lang.lang = None;
        assert!(!gate.enabled(&no_lang));
    }

    #[test]
    fn test_can_trigger_event() {
        let gate = EventGate::new();
        gate.mark_ready();

        assert!(!gate.can_trigger_event(None, true));
        assert!(gate.can_trigger_event(Some(&state("go", true, false)), false));

        // 既不是文件也不是控制台
        let scratch = state("go", false, false);
        assert!(!gate.can_trigger_event(Some(&scratch), false));
        assert!(!gate.can_trigger_event(Some(&scratch), true));

        // 控制台需要显式放行
        let console = state("cmd-prompt", false, true);
        assert!(!gate.can_trigger_event(Some(&console), false));
        assert!(gate.can_trigger_event(Some(&console), true));
    }
}
