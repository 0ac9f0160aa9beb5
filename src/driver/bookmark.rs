//! Bookmarks
//!
//! 인과적 일관성을 위한 북마크 추적

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

// ============================================================================
// BookmarkManager - 드라이버 공유 북마크
// ============================================================================

/// 여러 세션이 공유하는 북마크 저장소
///
/// 세션이 트랜잭션을 커밋하면 그 세션이 보냈던 북마크를 지우고 새 북마크를
/// 넣는다. 따라서 다른 세션은 항상 가장 최근 쓰기 이후를 읽는다.
#[derive(Debug, Default)]
pub struct BookmarkManager {
    bookmarks: RwLock<BTreeSet<String>>,
}

impl BookmarkManager {
    /// 초기 북마크로 생성
    pub fn new(initial: impl IntoIterator<Item = String>) -> Self {
        Self {
            bookmarks: RwLock::new(initial.into_iter().filter(|b| !b.is_empty()).collect()),
        }
    }

    /// 공유 핸들 생성
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 현재 북마크
    pub fn get_bookmarks(&self) -> Vec<String> {
        self.bookmarks.read().iter().cloned().collect()
    }

    /// `previous` 를 `new_bookmarks` 로 교체
    pub fn update_bookmarks(&self, previous: &[String], new_bookmarks: &[String]) {
        if new_bookmarks.is_empty() {
            return;
        }
        let mut bookmarks = self.bookmarks.write();
        for old in previous {
            bookmarks.remove(old);
        }
        bookmarks.extend(new_bookmarks.iter().filter(|b| !b.is_empty()).cloned());
    }
}

// ============================================================================
// BookmarkTracker - 세션 북마크
// ============================================================================

/// 세션 하나의 북마크. 마지막 커밋의 북마크가 이전 것을 대체한다.
#[derive(Debug, Clone, Default)]
pub struct BookmarkTracker {
    own: Arc<Mutex<Vec<String>>>,
    manager: Option<Arc<BookmarkManager>>,
}

impl BookmarkTracker {
    pub fn new(initial: Vec<String>, manager: Option<Arc<BookmarkManager>>) -> Self {
        let initial = initial.into_iter().filter(|b| !b.is_empty()).collect();
        Self {
            own: Arc::new(Mutex::new(initial)),
            manager,
        }
    }

    /// 세션 자체 북마크
    pub fn last_bookmarks(&self) -> Vec<String> {
        self.own.lock().clone()
    }

    /// 서버에 보낼 북마크: 세션 북마크와 공유 북마크의 합집합
    pub fn bookmarks_to_send(&self) -> Vec<String> {
        let mut all: BTreeSet<String> = self.own.lock().iter().cloned().collect();
        if let Some(manager) = &self.manager {
            all.extend(manager.get_bookmarks());
        }
        all.into_iter().collect()
    }

    /// 커밋으로 받은 북마크 반영
    pub fn update(&self, bookmark: &str) {
        if bookmark.is_empty() {
            return;
        }
        let new_bookmarks = vec![bookmark.to_string()];
        let previous = std::mem::replace(&mut *self.own.lock(), new_bookmarks.clone());
        if let Some(manager) = &self.manager {
            manager.update_bookmarks(&previous, &new_bookmarks);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_bookmark_wins() {
        let tracker = BookmarkTracker::new(vec!["bm1".to_string(), String::new()], None);
        assert_eq!(tracker.last_bookmarks(), vec!["bm1"]);
        tracker.update("bm2");
        tracker.update("");
        assert_eq!(tracker.last_bookmarks(), vec!["bm2"]);
    }

    #[test]
    fn test_sessions_share_through_manager() {
        let manager = BookmarkManager::shared();
        let writer = BookmarkTracker::new(vec![], Some(manager.clone()));
        let reader = BookmarkTracker::new(vec!["own".to_string()], Some(manager.clone()));

        writer.update("w1");
        assert_eq!(reader.bookmarks_to_send(), vec!["own", "w1"]);

        writer.update("w2");
        assert_eq!(manager.get_bookmarks(), vec!["w2"]);
        assert_eq!(reader.last_bookmarks(), vec!["own"]);
    }

    #[test]
    fn test_manager_initial_bookmarks() {
        let manager = BookmarkManager::new(vec!["a".to_string(), String::new()]);
        assert_eq!(manager.get_bookmarks(), vec!["a"]);
        manager.update_bookmarks(&["a".to_string()], &[]);
        assert_eq!(manager.get_bookmarks(), vec!["a"]);
    }
}
