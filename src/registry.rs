//! View 注册表
//!
//! 维护 buffer id → [`ViewState`] 的映射，与宿主通知保持同步。
//! 所有修改都在同一把锁内完成；读取返回副本，不把内部 map 暴露出去。

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{ViewId, ViewInfo, ViewState};

/// 关闭类事件会移除缓存
pub fn is_close_event(event: &str) -> bool {
    matches!(event, "pre_close" | "close")
}

#[derive(Default)]
struct Inner {
    views: HashMap<ViewId, ViewState>,
    /// 最近一次同步时宿主打开的 buffer
    open_ids: Vec<ViewId>,
}

/// View 注册表
#[derive(Default)]
pub struct ViewRegistry {
    inner: Mutex<Inner>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取缓存的 ViewState
    ///
    /// 提供 `observed` 时：没有缓存则创建，已有则原地刷新。
    pub fn view(&self, id: ViewId, observed: Option<&ViewInfo>) -> Option<ViewState> {
        let mut inner = self.inner.lock();

        if let Some(view) = observed {
            inner
                .views
                .entry(id)
                .and_modify(|state| state.sync(view))
                .or_insert_with(|| ViewState::new(view));
        }

        inner.views.get(&id).cloned()
    }

    /// 按宿主事件同步
    ///
    /// 关闭类事件移除缓存；其他事件刷新打开列表并刷新该 buffer。
    pub fn sync_on_event(&self, event: &str, view: &ViewInfo, open_ids: Vec<ViewId>) {
        if is_close_event(event) {
            self.remove(view.id);
            return;
        }

        let mut inner = self.inner.lock();
        inner.open_ids = open_ids;
        inner
            .views
            .entry(view.id)
            .and_modify(|state| state.sync(view))
            .or_insert_with(|| ViewState::new(view));
    }

    /// 移除缓存
    pub fn remove(&self, id: ViewId) -> Option<ViewState> {
        let removed = self.inner.lock().views.remove(&id);
        if removed.is_some() {
            tracing::trace!("🗑️ View removed: id={}", id);
        }
        removed
    }

    /// 最近一次同步时打开的 buffer
    pub fn open_ids(&self) -> Vec<ViewId> {
        self.inner.lock().open_ids.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
