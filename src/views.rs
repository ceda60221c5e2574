//! Read-side helpers over a task list: search, filters, display order and
//! statistics. Nothing here touches the cache.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::task::{Priority, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl StatusFilter {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => !task.completed,
            StatusFilter::Completed => task.completed,
        }
    }
}

/// Everything the list UI can narrow by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub search: String,
    pub status: StatusFilter,
    pub priority: Option<Priority>,
}

impl Filter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.matches(task)
            && self.priority.map(|p| p == task.priority).unwrap_or(true)
            && matches_search(task, &self.search)
    }

    /// Matching tasks in display order.
    pub fn apply(&self, list: &[Task]) -> Vec<Task> {
        let mut out: Vec<Task> = list.iter().filter(|t| self.matches(t)).cloned().collect();
        sort_for_display(&mut out);
        out
    }
}

/// Case-insensitive substring match on title, description and shopping
/// item texts. A blank query matches everything.
pub fn matches_search(task: &Task, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    task.title.to_lowercase().contains(&query)
        || task
            .description
            .as_deref()
            .map(|d| d.to_lowercase().contains(&query))
            .unwrap_or(false)
        || task.shopping_items().iter().any(|i| i.text.to_lowercase().contains(&query))
}

/// `order` ascending, ties broken by creation time.
pub fn sort_for_display(list: &mut [Task]) {
    list.sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    /// Rounded down; 0 for an empty list.
    pub completion_percent: u8,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    /// Open tasks whose due date is before `today`.
    pub overdue: usize,
    /// Open tasks due on `today`.
    pub due_today: usize,
}

pub fn stats(list: &[Task], today: NaiveDate) -> Stats {
    let mut s = Stats {
        total: list.len(),
        ..Default::default()
    };
    for task in list {
        if task.completed {
            s.completed += 1;
        } else {
            s.active += 1;
            match task.due_date {
                Some(due) if due < today => s.overdue += 1,
                Some(due) if due == today => s.due_today += 1,
                _ => {}
            }
        }
        match task.priority {
            Priority::Low => s.low += 1,
            Priority::Medium => s.medium += 1,
            Priority::High => s.high += 1,
        }
    }
    if s.total > 0 {
        s.completion_percent = (s.completed * 100 / s.total) as u8;
    }
    s
}

// ── Tests ──────────────────────────────────────────────────────
