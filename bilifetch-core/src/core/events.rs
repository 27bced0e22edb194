use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum TransferStatus {
    Pending,
    Running,
    Complete { bytes: u64 },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransferProgress {
    pub file_name: String,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Absent when the origin sent no length.
    pub percent: Option<f64>,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub elapsed_secs: f64,
}

pub trait ProgressReporter: Send + Sync + 'static {
    fn report_status(&self, file_name: &str, status: &TransferStatus);
    fn report_progress(&self, progress: &TransferProgress);
}
