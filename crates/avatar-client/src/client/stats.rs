#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    tokens_issued: u64,
    sessions_stopped: u64,
    stop_failures: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_token(&mut self) {
        self.tokens_issued += 1;
    }

    pub(crate) fn record_stop(&mut self, success: bool) {
        if success {
            self.sessions_stopped += 1;
        } else {
            self.stop_failures += 1;
        }
    }

    pub fn tokens_issued(&self) -> u64 {
        self.tokens_issued
    }

    pub fn sessions_stopped(&self) -> u64 {
        self.sessions_stopped
    }

    pub fn stop_failures(&self) -> u64 {
        self.stop_failures
    }
}
