use std::fmt;

use crate::{reassembler::ReassemblyReport, util};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    pub segments_dispatched: u64,
    pub segments_written: u64,
    pub segments_lost: u64,
    pub bytes_written: u64,
}

impl SessionStatistics {
    pub fn new(segments_dispatched: u64, report: &ReassemblyReport) -> Self {
        Self {
            segments_dispatched,
            segments_written: report.written,
            segments_lost: report.lost.len() as u64,
            bytes_written: report.bytes_written,
        }
    }
}

impl fmt::Display for SessionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wrote {} of {} segments ({}), {} lost",
            self.segments_written,
            self.segments_dispatched,
            util::format_bytes(self.bytes_written),
            self.segments_lost
        )
    }
}
