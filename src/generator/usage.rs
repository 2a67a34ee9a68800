use std::collections::{HashMap, HashSet};

/// Tracks how often each food has been committed to the plan being decoded.
#[derive(Debug, Clone)]
pub struct PlanUsageCounter {
    cap: usize,
    totals: HashMap<u32, usize>,
    today: HashSet<u32>,
}

impl PlanUsageCounter {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            totals: HashMap::new(),
            today: HashSet::new(),
        }
    }

    pub fn start_day(&mut self) {
        self.today.clear();
    }

    pub fn count(&self, token: u32) -> usize {
        self.totals.get(&token).copied().unwrap_or(0)
    }

    pub fn is_capped(&self, token: u32) -> bool {
        self.count(token) >= self.cap
    }

    pub fn used_today(&self, token: u32) -> bool {
        self.today.contains(&token)
    }

    /// Neither capped nor already on today's menu.
    pub fn is_available(&self, token: u32) -> bool {
        !self.is_capped(token) && !self.used_today(token)
    }

    pub fn commit(&mut self, token: u32) {
        *self.totals.entry(token).or_insert(0) += 1;
        self.today.insert(token);
    }
}
